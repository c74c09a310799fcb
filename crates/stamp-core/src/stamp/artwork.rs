//! Artwork providers feeding the stamp cache at build time

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::Rgba;

use super::raster::RgbaImage;
use super::StampVariant;
use crate::error::StampError;

/// Supplies raw source images (PNG bytes) for each stamp variant.
///
/// Only consulted while a [`StampCache`](super::StampCache) is being built.
pub trait ArtworkSource {
    fn load(&self, variant: StampVariant) -> Result<Vec<u8>, StampError>;
}

/// Artwork stored as PNG files in one directory
#[derive(Debug, Clone)]
pub struct DirectoryArtwork {
    root: PathBuf,
}

impl DirectoryArtwork {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, variant: StampVariant) -> PathBuf {
        self.root.join(variant.file_name())
    }
}

impl ArtworkSource for DirectoryArtwork {
    fn load(&self, variant: StampVariant) -> Result<Vec<u8>, StampError> {
        let path = self.path_for(variant);
        std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StampError::ArtworkMissing(path.display().to_string()),
            _ => StampError::CacheInitializationFailure(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )),
        })
    }
}

/// Artwork held in memory, keyed by variant
#[derive(Debug, Clone, Default)]
pub struct MemoryArtwork {
    images: HashMap<StampVariant, Vec<u8>>,
}

impl MemoryArtwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, variant: StampVariant, png: Vec<u8>) -> Self {
        self.images.insert(variant, png);
        self
    }

    /// Same image for every variant
    pub fn uniform(png: Vec<u8>) -> Self {
        StampVariant::ALL
            .iter()
            .fold(Self::new(), |art, &variant| art.with(variant, png.clone()))
    }
}

impl ArtworkSource for MemoryArtwork {
    fn load(&self, variant: StampVariant) -> Result<Vec<u8>, StampError> {
        self.images
            .get(&variant)
            .cloned()
            .ok_or_else(|| StampError::ArtworkMissing(variant.to_string()))
    }
}

const PLACEHOLDER_SIZE: u32 = 200;
const PLACEHOLDER_BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

/// Procedural stand-in seal: two concentric blue rings and a centre mark
/// on a transparent canvas.
pub fn placeholder_seal() -> RgbaImage {
    let mut image = RgbaImage::new(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE);
    let center = PLACEHOLDER_SIZE as f64 / 2.0;

    // (inner radius, outer radius) of each painted band
    let bands = [(77.0, 80.0), (64.0, 65.0), (0.0, 15.0)];

    for y in 0..PLACEHOLDER_SIZE {
        for x in 0..PLACEHOLDER_SIZE {
            let dx = x as f64 + 0.5 - center;
            let dy = y as f64 + 0.5 - center;
            let r = (dx * dx + dy * dy).sqrt();
            if bands.iter().any(|&(lo, hi)| r >= lo && r <= hi) {
                image.put_pixel(x, y, PLACEHOLDER_BLUE);
            }
        }
    }

    image
}
