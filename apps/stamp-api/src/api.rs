//! API handlers for the stamp server
//!
//! Provides REST endpoints for:
//! - Health and keep-alive checks
//! - Standard stamp coordinates
//! - Page geometry of an uploaded document
//! - Stamping one document
//! - Batch stamping
//!
//! Handlers only translate units and encodings; all geometry lives in
//! `stamp-core`. The CPU-bound pipeline runs on the blocking pool.

use axum::{
    extract::{Query, State},
    Json,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use stamp_core::units::{A4_HEIGHT_PT, A4_WIDTH_PT};
use stamp_core::{
    page_geometries, DocumentJob, ErrorKind, PlacementOutcome, PlacementRequest, Rect, SealKind,
    StampError, StampVariant, Unit,
};
use tracing::{debug, info};

use crate::error::ServerError;
use crate::AppState;

const PDF_DATA_URL_PREFIX: &str = "data:application/pdf;base64,";

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Handler: GET /health
pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "stamp-api",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct PingResponse {
    pub status: &'static str,
}

/// Handler: GET /ping (keep-alive target for hosted front ends)
pub async fn handle_ping() -> Json<PingResponse> {
    Json(PingResponse { status: "alive" })
}

#[derive(Deserialize)]
pub struct CoordinatesQuery {
    #[serde(default = "default_seal_type")]
    pub seal_type: String,
    #[serde(default)]
    pub add_signature: bool,
}

fn default_seal_type() -> String {
    SealKind::CompanySeal.as_str().to_string()
}

#[derive(Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

#[derive(Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Serialize)]
pub struct CoordinatesResponse {
    pub success: bool,
    /// Points, visual space, A4
    pub coordinates: Rect,
    pub page_size: PageSize,
    /// Pixel size of the cached stamp, for previews
    pub image_size: ImageSize,
}

/// Handler: GET /api/coordinates
pub async fn handle_coordinates(
    State(state): State<AppState>,
    Query(query): Query<CoordinatesQuery>,
) -> Result<Json<CoordinatesResponse>, ServerError> {
    let variant = parse_variant(&query.seal_type, query.add_signature)?;
    let (width, height) = state.coordinator.cache().dimensions(variant);
    Ok(Json(CoordinatesResponse {
        success: true,
        coordinates: variant.default_placement(),
        page_size: PageSize {
            width: A4_WIDTH_PT,
            height: A4_HEIGHT_PT,
        },
        image_size: ImageSize { width, height },
    }))
}

#[derive(Deserialize)]
pub struct PageInfoRequest {
    #[serde(rename = "pdfData", alias = "pdf_data")]
    pub pdf_data: String,
}

/// One page as a client needs it to place stamps
#[derive(Serialize)]
pub struct PageInfo {
    pub index: usize,
    /// MediaBox size in points, before rotation
    pub width: f64,
    pub height: f64,
    pub rotation: u16,
    /// Size as displayed, after rotation
    pub visual_width: f64,
    pub visual_height: f64,
}

#[derive(Serialize)]
pub struct PageInfoResponse {
    pub success: bool,
    pub page_count: usize,
    pub pages: Vec<PageInfo>,
}

/// Handler: POST /api/page-info
pub async fn handle_page_info(
    State(state): State<AppState>,
    Json(req): Json<PageInfoRequest>,
) -> Result<Json<PageInfoResponse>, ServerError> {
    let document = decode_pdf_data(&req.pdf_data)?;
    let limit = state.coordinator.max_document_bytes();
    if document.len() > limit {
        return Err(StampError::DocumentTooLarge {
            size: document.len(),
            limit,
        }
        .into());
    }

    let geometries = tokio::task::spawn_blocking(move || page_geometries(&document))
        .await
        .map_err(|e| ServerError::Internal(format!("Page info task failed: {}", e)))??;

    let pages: Vec<PageInfo> = geometries
        .iter()
        .enumerate()
        .map(|(index, g)| {
            let (visual_width, visual_height) = g.visual_size();
            PageInfo {
                index,
                width: g.width_pt,
                height: g.height_pt,
                rotation: g.rotation.degrees(),
                visual_width,
                visual_height,
            }
        })
        .collect();

    Ok(Json(PageInfoResponse {
        success: true,
        page_count: pages.len(),
        pages,
    }))
}

/// One stamp in a single-document request
#[derive(Deserialize)]
pub struct PlacementBody {
    #[serde(default)]
    pub page_index: u32,
    #[serde(default = "default_seal_type")]
    pub seal_type: String,
    #[serde(default)]
    pub add_signature: bool,
    /// Visual rect; the variant's standard placement when absent
    pub rect: Option<Rect>,
    #[serde(default)]
    pub unit: Unit,
    pub opacity: Option<f64>,
}

#[derive(Deserialize)]
pub struct StampApiRequest {
    #[serde(default)]
    pub filename: Option<String>,
    /// Base64 PDF or a `data:` URL
    #[serde(rename = "pdfData", alias = "pdf_data")]
    pub pdf_data: String,
    pub placements: Vec<PlacementBody>,
}

#[derive(Serialize)]
pub struct StampApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_filename: Option<String>,
    /// Stamped PDF as a data URL
    #[serde(rename = "pdfData")]
    pub pdf_data: String,
    pub page_count: u32,
    pub placements: Vec<PlacementOutcome>,
}

/// Handler: POST /api/stamp
pub async fn handle_stamp(
    State(state): State<AppState>,
    Json(req): Json<StampApiRequest>,
) -> Result<Json<StampApiResponse>, ServerError> {
    let document = decode_pdf_data(&req.pdf_data)?;

    let placements = req
        .placements
        .iter()
        .map(|p| {
            let variant = parse_variant(&p.seal_type, p.add_signature)?;
            let rect = match p.rect {
                Some(rect) => p.unit.rect_to_points(rect),
                None => variant.default_placement(),
            };
            Ok(PlacementRequest::new(p.page_index, variant, rect).with_opacity(p.opacity.unwrap_or(1.0)))
        })
        .collect::<Result<Vec<_>, ServerError>>()?;

    info!(
        filename = req.filename.as_deref().unwrap_or("-"),
        bytes = document.len(),
        placements = placements.len(),
        "Stamp request"
    );

    let coordinator = state.coordinator.clone();
    let result = tokio::task::spawn_blocking(move || coordinator.stamp_document(&document, &placements))
        .await
        .map_err(|e| ServerError::Internal(format!("Stamp task failed: {}", e)))?;

    let outcome = result.map_err(|failure| {
        debug!(stage = ?failure.stage, "Stamp request failed");
        ServerError::Stamp(failure.error)
    })?;

    Ok(Json(StampApiResponse {
        success: true,
        output_filename: req.filename.as_deref().map(signed_filename),
        filename: req.filename,
        pdf_data: encode_pdf_data(&outcome.output),
        page_count: outcome.metrics.page_count,
        placements: outcome.placements,
    }))
}

#[derive(Deserialize)]
pub struct BatchFile {
    pub filename: String,
    #[serde(rename = "pdfData", alias = "pdf_data")]
    pub pdf_data: String,
}

#[derive(Deserialize)]
pub struct BatchProcessRequest {
    pub files: Vec<BatchFile>,
    #[serde(default = "default_seal_type")]
    pub seal_type: String,
    #[serde(default)]
    pub add_signature: bool,
    /// Points, visual space; the variant's standard placement when absent
    pub coordinates: Option<Rect>,
    pub page_index: Option<u32>,
    pub opacity: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchFileResult {
    pub filename: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_filename: Option<String>,
    #[serde(rename = "pdfData", skip_serializing_if = "Option::is_none")]
    pub pdf_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

#[derive(Serialize)]
pub struct BatchProcessResponse {
    pub success: bool,
    pub total_files: usize,
    pub processed_files: usize,
    pub results: Vec<BatchFileResult>,
}

/// Handler: POST /api/batch-process
///
/// A file that fails never fails the request; it gets its own failed entry.
pub async fn handle_batch_process(
    State(state): State<AppState>,
    Json(req): Json<BatchProcessRequest>,
) -> Result<Json<BatchProcessResponse>, ServerError> {
    let variant = parse_variant(&req.seal_type, req.add_signature)?;
    let placement = PlacementRequest::new(
        req.page_index.unwrap_or(0),
        variant,
        req.coordinates.unwrap_or_else(|| variant.default_placement()),
    )
    .with_opacity(req.opacity.unwrap_or(1.0));

    // Undecodable uploads fail here; the rest go to the coordinator
    let mut slots: Vec<Result<DocumentJob, BatchFileResult>> = Vec::with_capacity(req.files.len());
    for file in req.files {
        match decode_pdf_data(&file.pdf_data) {
            Ok(document) => slots.push(Ok(DocumentJob {
                identifier: file.filename,
                document,
                placements: vec![placement],
            })),
            Err(e) => slots.push(Err(BatchFileResult {
                filename: file.filename,
                success: false,
                output_filename: None,
                pdf_data: None,
                error: Some(e.to_string()),
                error_kind: Some(ErrorKind::DocumentDecodeFailure),
            })),
        }
    }

    let total_files = slots.len();
    info!(files = total_files, variant = %variant, "Batch request");

    let coordinator = state.coordinator.clone();
    let results = tokio::task::spawn_blocking(move || {
        let jobs: Vec<DocumentJob> = slots.iter().filter_map(|s| s.as_ref().ok()).cloned().collect();
        let mut processed = coordinator.process_batch(&jobs).into_iter();

        slots
            .into_iter()
            .map(|slot| match slot {
                Err(failed) => failed,
                Ok(job) => match processed.next() {
                    Some(item) => BatchFileResult {
                        output_filename: item.ok.then(|| signed_filename(&item.identifier)),
                        pdf_data: item.output.as_deref().map(encode_pdf_data),
                        filename: item.identifier,
                        success: item.ok,
                        error: item.error,
                        error_kind: item.error_kind,
                    },
                    None => BatchFileResult {
                        filename: job.identifier,
                        success: false,
                        output_filename: None,
                        pdf_data: None,
                        error: Some("Missing batch result".to_string()),
                        error_kind: None,
                    },
                },
            })
            .collect::<Vec<_>>()
    })
    .await
    .map_err(|e| ServerError::Internal(format!("Batch task failed: {}", e)))?;

    let processed_files = results.iter().filter(|r| r.success).count();
    Ok(Json(BatchProcessResponse {
        success: true,
        total_files,
        processed_files,
        results,
    }))
}

fn parse_variant(seal_type: &str, add_signature: bool) -> Result<StampVariant, ServerError> {
    let kind: SealKind = seal_type
        .parse()
        .map_err(|_| ServerError::InvalidRequest(format!("Unknown seal type: {}", seal_type)))?;
    Ok(StampVariant::new(kind, add_signature))
}

/// Accept raw base64 or a `data:...;base64,` URL
pub fn decode_pdf_data(data: &str) -> Result<Vec<u8>, ServerError> {
    let payload = match data.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, b64)| b64)
            .ok_or_else(|| ServerError::InvalidRequest("Malformed data URL".to_string()))?,
        None => data,
    };
    BASE64
        .decode(payload.trim())
        .map_err(|e| ServerError::InvalidRequest(format!("Invalid base64 PDF data: {}", e)))
}

pub fn encode_pdf_data(bytes: &[u8]) -> String {
    format!("{}{}", PDF_DATA_URL_PREFIX, BASE64.encode(bytes))
}

/// `contract.pdf` -> `contract_signed.pdf`
pub fn signed_filename(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if ext.eq_ignore_ascii_case("pdf") && !stem.is_empty() => {
            format!("{}_signed.{}", stem, ext)
        }
        _ => format!("{}_signed.pdf", name),
    }
}
