use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StampError {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid image data: {0}")]
    InvalidImageData(String),

    #[error("Invalid opacity: {0}")]
    InvalidOpacity(f64),

    #[error("Page index {index} out of range (document has {page_count} pages)")]
    PageIndexOutOfRange { index: u32, page_count: u32 },

    #[error("Stamp cache initialization failed: {0}")]
    CacheInitializationFailure(String),

    #[error("Artwork missing: {0}")]
    ArtworkMissing(String),

    #[error("Document of {size} bytes exceeds the {limit} byte limit")]
    DocumentTooLarge { size: usize, limit: usize },

    #[error("Failed to decode document: {0}")]
    DocumentDecodeFailure(String),

    #[error("Page merge failed: {0}")]
    MergeFailure(String),

    #[error("Failed to serialize document: {0}")]
    SerializationFailure(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Wire-level identity of a [`StampError`], carried in result records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidGeometry,
    InvalidImageData,
    InvalidOpacity,
    PageIndexOutOfRange,
    CacheInitializationFailure,
    ArtworkMissing,
    DocumentTooLarge,
    DocumentDecodeFailure,
    MergeFailure,
    SerializationFailure,
    InvalidConfig,
}

impl ErrorKind {
    /// Same spelling as the serialized form
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidGeometry => "INVALID_GEOMETRY",
            ErrorKind::InvalidImageData => "INVALID_IMAGE_DATA",
            ErrorKind::InvalidOpacity => "INVALID_OPACITY",
            ErrorKind::PageIndexOutOfRange => "PAGE_INDEX_OUT_OF_RANGE",
            ErrorKind::CacheInitializationFailure => "CACHE_INITIALIZATION_FAILURE",
            ErrorKind::ArtworkMissing => "ARTWORK_MISSING",
            ErrorKind::DocumentTooLarge => "DOCUMENT_TOO_LARGE",
            ErrorKind::DocumentDecodeFailure => "DOCUMENT_DECODE_FAILURE",
            ErrorKind::MergeFailure => "MERGE_FAILURE",
            ErrorKind::SerializationFailure => "SERIALIZATION_FAILURE",
            ErrorKind::InvalidConfig => "INVALID_CONFIG",
        }
    }
}

impl StampError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StampError::InvalidGeometry(_) => ErrorKind::InvalidGeometry,
            StampError::InvalidImageData(_) => ErrorKind::InvalidImageData,
            StampError::InvalidOpacity(_) => ErrorKind::InvalidOpacity,
            StampError::PageIndexOutOfRange { .. } => ErrorKind::PageIndexOutOfRange,
            StampError::CacheInitializationFailure(_) => ErrorKind::CacheInitializationFailure,
            StampError::ArtworkMissing(_) => ErrorKind::ArtworkMissing,
            StampError::DocumentTooLarge { .. } => ErrorKind::DocumentTooLarge,
            StampError::DocumentDecodeFailure(_) => ErrorKind::DocumentDecodeFailure,
            StampError::MergeFailure(_) => ErrorKind::MergeFailure,
            StampError::SerializationFailure(_) => ErrorKind::SerializationFailure,
            StampError::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }

    /// Whether this error rejects a single placement rather than a document.
    pub fn is_item_level(&self) -> bool {
        matches!(
            self,
            StampError::InvalidGeometry(_)
                | StampError::InvalidImageData(_)
                | StampError::InvalidOpacity(_)
                | StampError::PageIndexOutOfRange { .. }
        )
    }
}
