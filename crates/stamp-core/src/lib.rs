//! Seal and signature stamping for PDF pages
//!
//! Places raster stamps onto pages so they appear where the caller intended
//! whatever the page's `/Rotate`, crop box or origin conventions.
//!
//! Pipeline, per page:
//! - `CoordinateNormalizer`: visual rect -> user-space rect (rotation, crop offset, clamping)
//! - `OverlayBuilder`: draws the stamp images onto a one-page overlay document
//! - `PageMerger`: composites the overlay onto the target page in place
//!
//! `BatchCoordinator` runs the pipeline over whole documents and batches, and
//! `StampCache` holds the pre-encoded stamp images shared by all requests.

pub mod batch;
pub mod config;
pub mod error;
pub mod geometry;
pub mod merge;
pub mod normalize;
pub mod overlay;
pub mod report;
pub mod stamp;
pub mod units;

pub use batch::{BatchCoordinator, DocumentFailure, DocumentJob, DocumentStage, PlacementRequest, StampOutcome};
pub use config::StampConfig;
pub use error::{ErrorKind, StampError};
pub use geometry::{PageGeometry, Rect, Rotation};
pub use merge::PageMerger;
pub use normalize::{ClampMode, CoordinateNormalizer, Normalized};
pub use overlay::{NormalizedPlacement, Overlay, OverlayBuilder};
pub use report::{BatchItemResult, PlacementOutcome, ProcessMetrics};
pub use stamp::{ArtworkSource, DirectoryArtwork, MemoryArtwork, SealKind, StampCache, StampVariant};
pub use units::Unit;

/// Geometry of every page, in page order
pub fn page_geometries(bytes: &[u8]) -> Result<Vec<PageGeometry>, StampError> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| StampError::DocumentDecodeFailure(e.to_string()))?;
    doc.get_pages()
        .values()
        .map(|&page_id| PageGeometry::from_page(&doc, page_id))
        .collect()
}
