use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::batch::{DocumentFailure, DocumentStage, StampOutcome};
use crate::error::{ErrorKind, StampError};
use crate::geometry::Rect;

/// Result of one placement request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementOutcome {
    /// Position of the request in the caller's list
    pub index: usize,
    pub page_index: u32,
    pub ok: bool,
    /// Final rect in page user space
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_rect: Option<Rect>,
    #[serde(default)]
    pub clamped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlacementOutcome {
    pub fn drawn(index: usize, page_index: u32, user_rect: Rect, clamped: bool) -> Self {
        Self {
            index,
            page_index,
            ok: true,
            user_rect: Some(user_rect),
            clamped,
            error_kind: None,
            error: None,
        }
    }

    pub fn failed(index: usize, page_index: u32, error: &StampError) -> Self {
        Self {
            index,
            page_index,
            ok: false,
            user_rect: None,
            clamped: false,
            error_kind: Some(error.kind()),
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessMetrics {
    pub input_size_bytes: usize,
    pub output_size_bytes: usize,
    pub page_count: u32,
    pub processing_time_ms: u64,
}

/// Result of one document in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub identifier: String,
    pub ok: bool,
    /// Stamped PDF, base64 on the wire
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_base64",
        deserialize_with = "deserialize_base64"
    )]
    pub output: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<DocumentStage>,
    #[serde(default)]
    pub placements: Vec<PlacementOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ProcessMetrics>,
}

impl BatchItemResult {
    pub fn success(identifier: impl Into<String>, outcome: StampOutcome) -> Self {
        Self {
            identifier: identifier.into(),
            ok: true,
            output: Some(outcome.output),
            error_kind: None,
            error: None,
            failed_stage: None,
            placements: outcome.placements,
            metrics: Some(outcome.metrics),
        }
    }

    pub fn failure(identifier: impl Into<String>, failure: DocumentFailure) -> Self {
        Self {
            identifier: identifier.into(),
            ok: false,
            output: None,
            error_kind: Some(failure.error.kind()),
            error: Some(failure.error.to_string()),
            failed_stage: Some(failure.stage),
            placements: failure.placements,
            metrics: None,
        }
    }

    pub fn from_result(
        identifier: impl Into<String>,
        result: Result<StampOutcome, DocumentFailure>,
    ) -> Self {
        match result {
            Ok(outcome) => Self::success(identifier, outcome),
            Err(failure) => Self::failure(identifier, failure),
        }
    }

    pub fn page_count(&self) -> Option<u32> {
        self.metrics.as_ref().map(|m| m.page_count)
    }
}

fn serialize_base64<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    match bytes {
        Some(b) => serializer.serialize_some(&BASE64.encode(b)),
        None => serializer.serialize_none(),
    }
}

fn deserialize_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
    let encoded: Option<String> = Option::deserialize(deserializer)?;
    encoded
        .map(|s| BASE64.decode(s).map_err(serde::de::Error::custom))
        .transpose()
}
