//! Stamp variants and the startup-built image cache
//!
//! The cache is built once, eagerly, for every variant. After construction it
//! only hands out shared read-only buffers, so one `Arc<StampCache>` can be
//! read from any number of threads without locking.

pub mod artwork;
pub mod raster;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use artwork::{ArtworkSource, DirectoryArtwork, MemoryArtwork};

use crate::error::StampError;
use crate::geometry::Rect;
use crate::units::mm_to_pt;

/// Whose seal is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SealKind {
    #[serde(alias = "company")]
    CompanySeal,
    #[serde(alias = "individual")]
    IndividualSeal,
}

impl SealKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SealKind::CompanySeal => "company-seal",
            SealKind::IndividualSeal => "individual-seal",
        }
    }

    fn file_stem(self) -> &'static str {
        match self {
            SealKind::CompanySeal => "company_seal",
            SealKind::IndividualSeal => "individual_seal",
        }
    }
}

impl FromStr for SealKind {
    type Err = StampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "company" | "company-seal" | "company_seal" => Ok(SealKind::CompanySeal),
            "individual" | "individual-seal" | "individual_seal" => Ok(SealKind::IndividualSeal),
            other => Err(StampError::InvalidConfig(format!("Unknown seal type: {}", other))),
        }
    }
}

/// One pre-rendered stamp: a seal, optionally with the signature block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StampVariant {
    pub kind: SealKind,
    pub with_signature: bool,
}

impl StampVariant {
    pub const ALL: [StampVariant; 4] = [
        StampVariant::new(SealKind::CompanySeal, false),
        StampVariant::new(SealKind::CompanySeal, true),
        StampVariant::new(SealKind::IndividualSeal, false),
        StampVariant::new(SealKind::IndividualSeal, true),
    ];

    pub const fn new(kind: SealKind, with_signature: bool) -> Self {
        Self {
            kind,
            with_signature,
        }
    }

    /// Slot in the cache table
    fn index(self) -> usize {
        let base = match self.kind {
            SealKind::CompanySeal => 0,
            SealKind::IndividualSeal => 2,
        };
        base + self.with_signature as usize
    }

    pub fn file_name(self) -> String {
        if self.with_signature {
            format!("{}_signature.png", self.kind.file_stem())
        } else {
            format!("{}.png", self.kind.file_stem())
        }
    }

    /// Largest raster the artwork is downscaled to, in pixels
    pub fn max_raster_size(self) -> (u32, u32) {
        if self.with_signature {
            (250, 200)
        } else {
            (200, 200)
        }
    }

    /// Standard placement on an A4 page, in points (visual space)
    pub fn default_placement(self) -> Rect {
        let (w_mm, h_mm) = if self.with_signature {
            (46.4, 35.9)
        } else {
            (35.9, 35.9)
        };
        Rect::new(mm_to_pt(17.6), mm_to_pt(67.6), mm_to_pt(w_mm), mm_to_pt(h_mm))
    }
}

impl fmt::Display for StampVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.with_signature {
            write!(f, "{}+signature", self.kind.as_str())
        } else {
            f.write_str(self.kind.as_str())
        }
    }
}

#[derive(Debug, Clone)]
struct CachedStamp {
    bytes: Arc<[u8]>,
    width: u32,
    height: u32,
    placeholder: bool,
}

/// Immutable table of encoded stamp images, one per [`StampVariant`]
#[derive(Debug, Clone)]
pub struct StampCache {
    entries: Vec<CachedStamp>,
}

impl StampCache {
    /// Load, normalize and encode every variant.
    ///
    /// Any failure aborts the whole build. Missing artwork is replaced by the
    /// procedural placeholder only when `allow_placeholder` is set.
    pub fn build(source: &dyn ArtworkSource, allow_placeholder: bool) -> Result<Self, StampError> {
        let mut entries = Vec::with_capacity(StampVariant::ALL.len());

        for variant in StampVariant::ALL {
            let (image, placeholder) = match source.load(variant) {
                Ok(bytes) => {
                    let image = raster::decode_png(&bytes).map_err(|e| {
                        StampError::CacheInitializationFailure(format!("{}: {}", variant, e))
                    })?;
                    (image, false)
                }
                Err(StampError::ArtworkMissing(what)) if allow_placeholder => {
                    warn!(variant = %variant, missing = %what, "Artwork missing, using placeholder seal");
                    (artwork::placeholder_seal(), true)
                }
                Err(e) => {
                    return Err(StampError::CacheInitializationFailure(format!(
                        "{}: {}",
                        variant, e
                    )))
                }
            };

            let (max_w, max_h) = variant.max_raster_size();
            let image = raster::fit_within(image, max_w, max_h);
            let bytes = raster::encode_png(&image).map_err(|e| {
                StampError::CacheInitializationFailure(format!("{}: {}", variant, e))
            })?;

            debug!(
                variant = %variant,
                width = image.width(),
                height = image.height(),
                bytes = bytes.len(),
                "Cached stamp"
            );
            entries.push(CachedStamp {
                bytes: bytes.into(),
                width: image.width(),
                height: image.height(),
                placeholder,
            });
        }

        info!(variants = entries.len(), "Stamp cache ready");
        Ok(Self { entries })
    }

    /// Encoded PNG for a variant. Pure lookup, never re-encodes.
    pub fn get(&self, variant: StampVariant) -> Arc<[u8]> {
        Arc::clone(&self.entries[variant.index()].bytes)
    }

    /// Pixel size of the cached raster
    pub fn dimensions(&self, variant: StampVariant) -> (u32, u32) {
        let entry = &self.entries[variant.index()];
        (entry.width, entry.height)
    }

    pub fn is_placeholder(&self, variant: StampVariant) -> bool {
        self.entries[variant.index()].placeholder
    }

    /// Image bytes for one placement at the requested opacity.
    ///
    /// Full opacity returns the cached buffer itself. Anything lower decodes,
    /// scales alpha and re-encodes a private copy that is not cached.
    pub fn render(&self, variant: StampVariant, opacity: f64) -> Result<Arc<[u8]>, StampError> {
        if !(0.0..=1.0).contains(&opacity) {
            return Err(StampError::InvalidOpacity(opacity));
        }
        let cached = self.get(variant);
        if opacity == 1.0 {
            return Ok(cached);
        }
        Ok(raster::with_opacity(&cached, opacity)?.into())
    }
}
