//! Per-document pipeline and batch fan-out
//!
//! Each document runs `Pending -> Normalizing -> Overlaying -> Merging -> Done`
//! or drops to `Failed` from whatever stage it reached. Failures are terminal
//! and never retried. Documents in a batch are independent: one failing
//! document yields one failed result and nothing else.

use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use lopdf::Document;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{StampConfig, DEFAULT_MAX_DOCUMENT_BYTES};
use crate::error::StampError;
use crate::geometry::{PageGeometry, Rect};
use crate::merge::PageMerger;
use crate::normalize::CoordinateNormalizer;
use crate::overlay::{NormalizedPlacement, Overlay, OverlayBuilder};
use crate::report::{BatchItemResult, PlacementOutcome, ProcessMetrics};
use crate::stamp::{StampCache, StampVariant};

fn full_opacity() -> f64 {
    1.0
}

/// Caller intent for one stamp, in visual space and points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementRequest {
    /// 0-based
    pub page_index: u32,
    pub variant: StampVariant,
    pub visual_rect: Rect,
    #[serde(default = "full_opacity")]
    pub opacity: f64,
}

impl PlacementRequest {
    pub fn new(page_index: u32, variant: StampVariant, visual_rect: Rect) -> Self {
        Self {
            page_index,
            variant,
            visual_rect,
            opacity: 1.0,
        }
    }

    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = opacity;
        self
    }
}

/// One document of a batch
#[derive(Debug, Clone)]
pub struct DocumentJob {
    pub identifier: String,
    pub document: Vec<u8>,
    pub placements: Vec<PlacementRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStage {
    Pending,
    Normalizing,
    Overlaying,
    Merging,
    Done,
    Failed,
}

/// A stamped document
#[derive(Debug, Clone)]
pub struct StampOutcome {
    pub output: Vec<u8>,
    pub placements: Vec<PlacementOutcome>,
    pub metrics: ProcessMetrics,
}

/// A document that could not be stamped
#[derive(Debug, Clone)]
pub struct DocumentFailure {
    /// Last stage entered before failing
    pub stage: DocumentStage,
    pub error: StampError,
    /// Per-placement results gathered before the failure
    pub placements: Vec<PlacementOutcome>,
}

/// Stage bookkeeping for one document run
struct Run {
    stage: DocumentStage,
}

impl Run {
    fn new() -> Self {
        Self {
            stage: DocumentStage::Pending,
        }
    }

    fn enter(&mut self, next: DocumentStage) {
        debug!(from = ?self.stage, to = ?next, "Document stage");
        self.stage = next;
    }

    fn fail(&self, error: StampError, placements: Vec<PlacementOutcome>) -> DocumentFailure {
        debug!(stage = ?self.stage, error = %error, "Document failed");
        DocumentFailure {
            stage: self.stage,
            error,
            placements,
        }
    }
}

/// Accepted placement waiting to be drawn
struct Pending {
    index: usize,
    user_rect: Rect,
    clamped: bool,
}

/// Runs the normalize, overlay and merge pipeline over documents
pub struct BatchCoordinator {
    cache: Arc<StampCache>,
    normalizer: CoordinateNormalizer,
    overlay: OverlayBuilder,
    merger: PageMerger,
    pool: rayon::ThreadPool,
    max_document_bytes: usize,
}

impl BatchCoordinator {
    /// `workers == 0` sizes the pool to the number of CPUs
    pub fn new(
        cache: Arc<StampCache>,
        normalizer: CoordinateNormalizer,
        workers: usize,
    ) -> Result<Self, StampError> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("stamp-batch-{}", i));
        if workers > 0 {
            builder = builder.num_threads(workers);
        }
        let pool = builder
            .build()
            .map_err(|e| StampError::InvalidConfig(format!("Batch worker pool: {}", e)))?;

        Ok(Self {
            cache,
            normalizer,
            overlay: OverlayBuilder::new(),
            merger: PageMerger::new(),
            pool,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        })
    }

    pub fn from_config(cache: Arc<StampCache>, config: &StampConfig) -> Result<Self, StampError> {
        Ok(Self::new(
            cache,
            CoordinateNormalizer::new(config.clamp_mode),
            config.batch_workers,
        )?
        .with_max_document_bytes(config.max_document_bytes))
    }

    /// Documents larger than `limit` fail with `DocumentTooLarge` before parsing
    pub fn with_max_document_bytes(mut self, limit: usize) -> Self {
        self.max_document_bytes = limit;
        self
    }

    pub fn max_document_bytes(&self) -> usize {
        self.max_document_bytes
    }

    pub fn cache(&self) -> &StampCache {
        &self.cache
    }

    pub fn normalizer(&self) -> &CoordinateNormalizer {
        &self.normalizer
    }

    /// Stamp every document, in parallel, returning results in input order
    pub fn process_batch(&self, jobs: &[DocumentJob]) -> Vec<BatchItemResult> {
        let started = Instant::now();

        let results: Vec<BatchItemResult> = self.pool.install(|| {
            jobs.par_iter()
                .map(|job| {
                    let result = self.stamp_document(&job.document, &job.placements);
                    if let Err(failure) = &result {
                        warn!(
                            document = %job.identifier,
                            stage = ?failure.stage,
                            error = %failure.error,
                            "Document failed"
                        );
                    }
                    BatchItemResult::from_result(job.identifier.clone(), result)
                })
                .collect()
        });

        let succeeded = results.iter().filter(|r| r.ok).count();
        info!(
            total = results.len(),
            succeeded,
            failed = results.len() - succeeded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch complete"
        );
        results
    }

    /// Stamp one document.
    ///
    /// Placement-level problems (bad geometry, bad image, bad opacity, missing
    /// page) are reported per placement and do not stop the document. A panic
    /// inside the PDF stack fails this document only.
    pub fn stamp_document(
        &self,
        bytes: &[u8],
        placements: &[PlacementRequest],
    ) -> Result<StampOutcome, DocumentFailure> {
        let mut run = Run::new();
        isolate(&mut run, |run| self.run_stages(run, bytes, placements))
    }

    fn run_stages(
        &self,
        run: &mut Run,
        bytes: &[u8],
        placements: &[PlacementRequest],
    ) -> Result<StampOutcome, DocumentFailure> {
        let started = Instant::now();

        if bytes.len() > self.max_document_bytes {
            return Err(run.fail(
                StampError::DocumentTooLarge {
                    size: bytes.len(),
                    limit: self.max_document_bytes,
                },
                Vec::new(),
            ));
        }

        let mut doc = Document::load_mem(bytes)
            .map_err(|e| run.fail(StampError::DocumentDecodeFailure(e.to_string()), Vec::new()))?;
        let pages = doc.get_pages();
        let page_count = pages.len() as u32;
        if page_count == 0 {
            return Err(run.fail(
                StampError::PageIndexOutOfRange {
                    index: 0,
                    page_count: 0,
                },
                Vec::new(),
            ));
        }

        // Normalize everything first so per-page work below sees only valid items
        run.enter(DocumentStage::Normalizing);
        let mut outcomes: Vec<Option<PlacementOutcome>> = vec![None; placements.len()];
        let mut geometries: HashMap<u32, PageGeometry> = HashMap::new();
        let mut by_page: BTreeMap<u32, (Vec<Pending>, Vec<NormalizedPlacement>)> = BTreeMap::new();
        let mut out_of_range = 0usize;

        for (index, request) in placements.iter().enumerate() {
            let page_index = request.page_index;
            // get_pages() numbers pages from 1
            let Some(&page_id) = page_index.checked_add(1).and_then(|n| pages.get(&n)) else {
                let error = StampError::PageIndexOutOfRange {
                    index: page_index,
                    page_count,
                };
                debug!(index, error = %error, "Placement rejected");
                outcomes[index] = Some(PlacementOutcome::failed(index, page_index, &error));
                out_of_range += 1;
                continue;
            };

            let geometry = match geometries.get(&page_index) {
                Some(g) => *g,
                None => {
                    let g = PageGeometry::from_page(&doc, page_id)
                        .map_err(|e| run.fail(e, collect_outcomes(&outcomes)))?;
                    geometries.insert(page_index, g);
                    g
                }
            };

            let prepared = self
                .normalizer
                .normalize(&geometry, request.visual_rect)
                .and_then(|n| Ok((n, self.cache.render(request.variant, request.opacity)?)));

            match prepared {
                Ok((normalized, image_bytes)) => {
                    let entry = by_page.entry(page_index).or_default();
                    entry.0.push(Pending {
                        index,
                        user_rect: normalized.rect,
                        clamped: normalized.clamped,
                    });
                    entry.1.push(NormalizedPlacement {
                        page_index,
                        image_bytes,
                        user_rect: normalized.rect,
                    });
                }
                Err(error) => {
                    debug!(index, page_index, error = %error, "Placement rejected");
                    outcomes[index] = Some(PlacementOutcome::failed(index, page_index, &error));
                }
            }
        }

        if !placements.is_empty() && out_of_range == placements.len() {
            let max_index = placements.iter().map(|p| p.page_index).max().unwrap_or(0);
            return Err(run.fail(
                StampError::PageIndexOutOfRange {
                    index: max_index,
                    page_count,
                },
                collect_outcomes(&outcomes),
            ));
        }

        run.enter(DocumentStage::Overlaying);
        let mut overlays: Vec<(u32, Overlay)> = Vec::with_capacity(by_page.len());
        for (page_index, (pending, items)) in by_page {
            let geometry = geometries[&page_index];
            let overlay = self
                .overlay
                .build(geometry.width_pt, geometry.height_pt, &items)
                .map_err(|e| run.fail(e, collect_outcomes(&outcomes)))?;

            for &i in &overlay.drawn {
                let p = &pending[i];
                outcomes[p.index] = Some(PlacementOutcome::drawn(p.index, page_index, p.user_rect, p.clamped));
            }
            for (i, error) in &overlay.rejected {
                let p = &pending[*i];
                outcomes[p.index] = Some(PlacementOutcome::failed(p.index, page_index, error));
            }

            if overlay.is_empty() {
                debug!(page_index, "Nothing drawable on page, skipping merge");
            } else {
                overlays.push((page_index, overlay));
            }
        }

        run.enter(DocumentStage::Merging);
        for (page_index, overlay) in overlays {
            let page_id = pages[&(page_index + 1)];
            self.merger
                .merge(&mut doc, page_id, overlay)
                .map_err(|e| run.fail(e, collect_outcomes(&outcomes)))?;
            debug!(page_index, "Page stamped");
        }

        let mut output = Vec::new();
        doc.save_to(&mut output).map_err(|e| {
            run.fail(
                StampError::SerializationFailure(e.to_string()),
                collect_outcomes(&outcomes),
            )
        })?;

        run.enter(DocumentStage::Done);
        let placements = collect_outcomes(&outcomes);
        Ok(StampOutcome {
            metrics: ProcessMetrics {
                input_size_bytes: bytes.len(),
                output_size_bytes: output.len(),
                page_count,
                processing_time_ms: started.elapsed().as_millis() as u64,
            },
            output,
            placements,
        })
    }
}

/// Run `stages`, turning a panic into a failure at the stage reached
fn isolate<F>(run: &mut Run, stages: F) -> Result<StampOutcome, DocumentFailure>
where
    F: FnOnce(&mut Run) -> Result<StampOutcome, DocumentFailure>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| stages(&mut *run))) {
        Ok(result) => result,
        Err(_) => {
            let error = match run.stage {
                DocumentStage::Pending => {
                    StampError::DocumentDecodeFailure("PDF parser panicked".to_string())
                }
                stage => StampError::MergeFailure(format!("Panicked while {:?}", stage)),
            };
            Err(run.fail(error, Vec::new()))
        }
    }
}

fn collect_outcomes(outcomes: &[Option<PlacementOutcome>]) -> Vec<PlacementOutcome> {
    outcomes.iter().flatten().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::normalize::ClampMode;
    use crate::stamp::raster::{encode_png, RgbaImage};
    use crate::stamp::{MemoryArtwork, SealKind};
    use image::Rgba;
    use lopdf::{dictionary, Object, Stream};

    fn coordinator() -> BatchCoordinator {
        let png = encode_png(&RgbaImage::from_pixel(4, 4, Rgba([0, 0, 255, 200]))).unwrap();
        let cache = StampCache::build(&MemoryArtwork::uniform(png), false).unwrap();
        BatchCoordinator::new(Arc::new(cache), CoordinateNormalizer::new(ClampMode::Lenient), 2).unwrap()
    }

    fn pdf(rotations: &[i64]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();
        for (i, rotate) in rotations.iter().enumerate() {
            let content = format!("BT /F1 12 Tf 50 700 Td (Page-{}) Tj ET", i + 1);
            let content_id = doc.add_object(Stream::new(lopdf::Dictionary::new(), content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
                "Rotate" => *rotate,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Count" => kids.len() as i64,
                "Kids" => kids,
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    fn seal() -> StampVariant {
        StampVariant::new(SealKind::CompanySeal, false)
    }

    #[test]
    fn test_stamp_rotated_page_reports_user_rect() {
        let outcome = coordinator()
            .stamp_document(
                &pdf(&[90]),
                &[PlacementRequest::new(0, seal(), Rect::new(20.0, 30.0, 50.0, 20.0))],
            )
            .unwrap();
        assert_eq!(outcome.placements.len(), 1);
        let placed = &outcome.placements[0];
        assert!(placed.ok);
        assert_eq!(placed.user_rect, Some(Rect::new(30.0, 525.0, 20.0, 50.0)));
        assert_eq!(outcome.metrics.page_count, 1);
    }

    #[test]
    fn test_item_errors_do_not_stop_document() {
        let outcome = coordinator()
            .stamp_document(
                &pdf(&[0, 0]),
                &[
                    PlacementRequest::new(0, seal(), Rect::new(20.0, 30.0, 50.0, 20.0)),
                    PlacementRequest::new(0, seal(), Rect::new(20.0, 30.0, 0.0, 20.0)),
                    PlacementRequest::new(7, seal(), Rect::new(20.0, 30.0, 50.0, 20.0)),
                    PlacementRequest::new(1, seal(), Rect::new(20.0, 30.0, 50.0, 20.0)).with_opacity(2.0),
                ],
            )
            .unwrap();
        let kinds: Vec<Option<ErrorKind>> = outcome.placements.iter().map(|p| p.error_kind).collect();
        assert_eq!(
            kinds,
            vec![
                None,
                Some(ErrorKind::InvalidGeometry),
                Some(ErrorKind::PageIndexOutOfRange),
                Some(ErrorKind::InvalidOpacity),
            ]
        );
        assert_eq!(
            outcome.placements.iter().map(|p| p.index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
    }

    #[test]
    fn test_all_placements_out_of_range_fails_document() {
        let failure = coordinator()
            .stamp_document(
                &pdf(&[0]),
                &[PlacementRequest::new(3, seal(), Rect::new(20.0, 30.0, 50.0, 20.0))],
            )
            .unwrap_err();
        assert_eq!(failure.stage, DocumentStage::Normalizing);
        assert!(matches!(
            failure.error,
            StampError::PageIndexOutOfRange {
                index: 3,
                page_count: 1
            }
        ));
    }

    #[test]
    fn test_garbage_document_fails_pending() {
        let failure = coordinator()
            .stamp_document(b"not a pdf at all", &[])
            .unwrap_err();
        assert_eq!(failure.stage, DocumentStage::Pending);
        assert_eq!(failure.error.kind(), ErrorKind::DocumentDecodeFailure);
    }

    #[test]
    fn test_no_placements_reserializes() {
        let outcome = coordinator().stamp_document(&pdf(&[0, 90]), &[]).unwrap();
        assert!(outcome.placements.is_empty());
        let doc = Document::load_mem(&outcome.output).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
    }

    #[test]
    fn test_batch_preserves_order() {
        let coordinator = coordinator();
        let jobs: Vec<DocumentJob> = (0..6)
            .map(|i| DocumentJob {
                identifier: format!("doc-{}.pdf", i),
                document: if i == 3 { b"%PDF-1.5 broken".to_vec() } else { pdf(&[0]) },
                placements: vec![PlacementRequest::new(0, seal(), Rect::new(20.0, 30.0, 50.0, 20.0))],
            })
            .collect();
        let results = coordinator.process_batch(&jobs);
        assert_eq!(results.len(), 6);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.identifier, format!("doc-{}.pdf", i));
            assert_eq!(result.ok, i != 3);
        }
    }

    #[test]
    fn test_oversized_document_fails_alone() {
        let small = pdf(&[0]);
        let large = pdf(&[0, 0, 0, 0]);
        assert!(large.len() > small.len());
        let coordinator = coordinator().with_max_document_bytes(small.len());

        let placement = PlacementRequest::new(0, seal(), Rect::new(20.0, 30.0, 50.0, 20.0));
        let jobs = vec![
            DocumentJob {
                identifier: "small.pdf".to_string(),
                document: small,
                placements: vec![placement],
            },
            DocumentJob {
                identifier: "large.pdf".to_string(),
                document: large,
                placements: vec![placement],
            },
        ];
        let results = coordinator.process_batch(&jobs);

        assert!(results[0].ok);
        assert!(!results[1].ok);
        assert_eq!(results[1].error_kind, Some(ErrorKind::DocumentTooLarge));
        assert_eq!(results[1].failed_stage, Some(DocumentStage::Pending));
    }

    #[test]
    fn test_panic_in_stage_fails_document() {
        let mut run = Run::new();
        let failure = isolate(&mut run, |run| {
            run.enter(DocumentStage::Merging);
            panic!("lopdf blew up");
        })
        .unwrap_err();
        assert_eq!(failure.stage, DocumentStage::Merging);
        assert_eq!(failure.error.kind(), ErrorKind::MergeFailure);

        let mut run = Run::new();
        let failure = isolate(&mut run, |_| panic!("bad xref")).unwrap_err();
        assert_eq!(failure.stage, DocumentStage::Pending);
        assert_eq!(failure.error.kind(), ErrorKind::DocumentDecodeFailure);
    }

    #[test]
    fn test_from_config_applies_size_limit() {
        let cache = coordinator().cache.clone();
        let config = StampConfig {
            max_document_bytes: 1024,
            ..StampConfig::default()
        };
        let coordinator = BatchCoordinator::from_config(cache, &config).unwrap();
        assert_eq!(coordinator.max_document_bytes(), 1024);
    }

    #[test]
    fn test_placement_request_defaults_opacity() {
        let json = r#"{"page_index":0,"variant":{"kind":"company-seal","with_signature":true},
            "visual_rect":{"x":1.0,"y":2.0,"width":3.0,"height":4.0}}"#;
        let request: PlacementRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.opacity, 1.0);
        assert!(request.variant.with_signature);
    }
}
