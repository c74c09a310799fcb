//! End-to-end tests: synthetic PDFs and PNG artwork through the full pipeline

use std::sync::Arc;

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use stamp_core::stamp::raster::{encode_png, RgbaImage};
use stamp_core::{
    BatchCoordinator, ClampMode, CoordinateNormalizer, DocumentJob, ErrorKind, MemoryArtwork,
    PageGeometry, PlacementRequest, Rect, Rotation, SealKind, StampCache, StampVariant,
};

// ============================================================
// Fixtures
// ============================================================

struct PageSpec {
    rotate: i64,
    media_box: [i64; 4],
    crop_box: Option<[i64; 4]>,
}

impl PageSpec {
    fn rotated(rotate: i64) -> Self {
        Self {
            rotate,
            media_box: [0, 0, 595, 842],
            crop_box: None,
        }
    }
}

fn build_pdf(pages: &[PageSpec]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::new();
    for (i, page_spec) in pages.iter().enumerate() {
        let content = format!("BT /F1 12 Tf 50 700 Td (Page-{}) Tj ET", i + 1);
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => page_spec.media_box.iter().map(|&v| v.into()).collect::<Vec<Object>>(),
            "Rotate" => page_spec.rotate,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            "Contents" => content_id,
        };
        if let Some(crop) = page_spec.crop_box {
            page.set("CropBox", crop.iter().map(|&v| v.into()).collect::<Vec<Object>>());
        }
        kids.push(Object::Reference(doc.add_object(page)));
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

fn seal_png() -> Vec<u8> {
    // Blue disc on transparent background
    let size = 32u32;
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let dx = x as f64 - 15.5;
            let dy = y as f64 - 15.5;
            if dx * dx + dy * dy <= 15.0 * 15.0 {
                pixels.extend_from_slice(&[0, 0, 255, 255]);
            } else {
                pixels.extend_from_slice(&[0, 0, 0, 0]);
            }
        }
    }
    encode_png(&RgbaImage::from_raw(size, size, pixels).unwrap()).unwrap()
}

fn cache() -> Arc<StampCache> {
    Arc::new(StampCache::build(&MemoryArtwork::uniform(seal_png()), false).unwrap())
}

fn coordinator(mode: ClampMode) -> BatchCoordinator {
    BatchCoordinator::new(cache(), CoordinateNormalizer::new(mode), 2).unwrap()
}

fn company() -> StampVariant {
    StampVariant::new(SealKind::CompanySeal, true)
}

fn page_dict(doc: &Document, index: u32) -> (ObjectId, &Dictionary) {
    let id = doc.get_pages()[&(index + 1)];
    (id, doc.get_object(id).and_then(Object::as_dict).unwrap())
}

fn number(object: &Object) -> f64 {
    match object {
        Object::Integer(i) => *i as f64,
        Object::Real(r) => *r as f64,
        other => panic!("not a number: {:?}", other),
    }
}

fn overlay_form<'a>(doc: &'a Document, index: u32, name: &str) -> &'a Stream {
    let (_, page) = page_dict(doc, index);
    let form_id = page
        .get(b"Resources")
        .and_then(Object::as_dict)
        .and_then(|r| r.get(b"XObject"))
        .and_then(Object::as_dict)
        .and_then(|x| x.get(name.as_bytes()))
        .and_then(Object::as_reference)
        .unwrap();
    doc.get_object(form_id).and_then(Object::as_stream).unwrap()
}

fn overlay_names(doc: &Document, index: u32) -> Vec<String> {
    let (_, page) = page_dict(doc, index);
    let resources = page.get(b"Resources").and_then(Object::as_dict).unwrap();
    match resources.get(b"XObject").and_then(Object::as_dict) {
        Ok(xobjects) => {
            let mut names: Vec<String> = xobjects
                .iter()
                .map(|(k, _)| String::from_utf8_lossy(k).into_owned())
                .collect();
            names.sort();
            names
        }
        Err(_) => Vec::new(),
    }
}

// ============================================================
// Rotation handling
// ============================================================

#[test]
fn stamps_every_rotation_without_touching_rotate() {
    let pdf = build_pdf(&[
        PageSpec::rotated(0),
        PageSpec::rotated(90),
        PageSpec::rotated(180),
        PageSpec::rotated(270),
    ]);
    let visual = Rect::new(20.0, 300.0, 50.0, 20.0);
    let placements: Vec<PlacementRequest> = (0..4)
        .map(|page| PlacementRequest::new(page, company(), visual))
        .collect();

    let outcome = coordinator(ClampMode::Lenient)
        .stamp_document(&pdf, &placements)
        .unwrap();
    assert!(outcome.placements.iter().all(|p| p.ok && !p.clamped));

    let rects: Vec<Rect> = outcome
        .placements
        .iter()
        .map(|p| p.user_rect.unwrap())
        .collect();
    assert_eq!(
        rects,
        vec![
            Rect::new(20.0, 300.0, 50.0, 20.0),
            Rect::new(300.0, 525.0, 20.0, 50.0),
            Rect::new(525.0, 522.0, 50.0, 20.0),
            Rect::new(522.0, 20.0, 20.0, 50.0),
        ]
    );

    let doc = Document::load_mem(&outcome.output).unwrap();
    let expected = [Rotation::Rot0, Rotation::Rot90, Rotation::Rot180, Rotation::Rot270];
    for (index, rotation) in expected.iter().enumerate() {
        let (page_id, _) = page_dict(&doc, index as u32);
        let geometry = PageGeometry::from_page(&doc, page_id).unwrap();
        assert_eq!(geometry.rotation, *rotation);
        assert_eq!((geometry.width_pt, geometry.height_pt), (595.0, 842.0));
        assert_eq!(overlay_names(&doc, index as u32), vec!["StampOverlay0".to_string()]);
    }
}

#[test]
fn rotated_scenario_lands_at_expected_user_rect() {
    let pdf = build_pdf(&[PageSpec::rotated(90)]);
    let outcome = coordinator(ClampMode::Lenient)
        .stamp_document(
            &pdf,
            &[PlacementRequest::new(0, company(), Rect::new(20.0, 30.0, 50.0, 20.0))],
        )
        .unwrap();
    assert_eq!(
        outcome.placements[0].user_rect,
        Some(Rect::new(30.0, 525.0, 20.0, 50.0))
    );
}

#[test]
fn crop_offset_shifts_placement() {
    let pdf = build_pdf(&[PageSpec {
        crop_box: Some([10, 20, 585, 822]),
        ..PageSpec::rotated(0)
    }]);
    let outcome = coordinator(ClampMode::Lenient)
        .stamp_document(
            &pdf,
            &[PlacementRequest::new(0, company(), Rect::new(50.0, 60.0, 40.0, 40.0))],
        )
        .unwrap();
    assert_eq!(
        outcome.placements[0].user_rect,
        Some(Rect::new(60.0, 80.0, 40.0, 40.0))
    );

    let doc = Document::load_mem(&outcome.output).unwrap();
    let (_, page) = page_dict(&doc, 0);
    assert!(page.get(b"CropBox").is_ok());
}

#[test]
fn offset_media_box_positions_form_at_media_origin() {
    let pdf = build_pdf(&[PageSpec {
        media_box: [100, 100, 695, 942],
        crop_box: Some([110, 120, 695, 942]),
        ..PageSpec::rotated(0)
    }]);
    let outcome = coordinator(ClampMode::Lenient)
        .stamp_document(
            &pdf,
            &[PlacementRequest::new(0, company(), Rect::new(50.0, 60.0, 40.0, 40.0))],
        )
        .unwrap();

    // Relative to the media box corner, shifted by the crop offset only
    assert_eq!(
        outcome.placements[0].user_rect,
        Some(Rect::new(60.0, 80.0, 40.0, 40.0))
    );

    let doc = Document::load_mem(&outcome.output).unwrap();
    let form = overlay_form(&doc, 0, "StampOverlay0");
    let matrix: Vec<f64> = form
        .dict
        .get(b"Matrix")
        .and_then(Object::as_array)
        .unwrap()
        .iter()
        .map(number)
        .collect();
    assert_eq!(matrix, vec![1.0, 0.0, 0.0, 1.0, 100.0, 100.0]);

    let bbox: Vec<f64> = form
        .dict
        .get(b"BBox")
        .and_then(Object::as_array)
        .unwrap()
        .iter()
        .map(number)
        .collect();
    assert_eq!(bbox, vec![0.0, 0.0, 595.0, 842.0]);

    let (_, page) = page_dict(&doc, 0);
    let media: Vec<f64> = page
        .get(b"MediaBox")
        .and_then(Object::as_array)
        .unwrap()
        .iter()
        .map(number)
        .collect();
    assert_eq!(media, vec![100.0, 100.0, 695.0, 942.0]);
}

// ============================================================
// Clamping
// ============================================================

#[test]
fn off_page_placement_is_clamped_not_rejected() {
    let pdf = build_pdf(&[PageSpec::rotated(0)]);
    let outcome = coordinator(ClampMode::Lenient)
        .stamp_document(
            &pdf,
            &[PlacementRequest::new(0, company(), Rect::new(695.0, 100.0, 50.0, 20.0))],
        )
        .unwrap();
    let placed = &outcome.placements[0];
    assert!(placed.ok);
    assert!(placed.clamped);
    assert_eq!(placed.user_rect, Some(Rect::new(545.0, 100.0, 50.0, 20.0)));
}

#[test]
fn strict_mode_rejects_off_page_item_only() {
    let pdf = build_pdf(&[PageSpec::rotated(0)]);
    let outcome = coordinator(ClampMode::Strict)
        .stamp_document(
            &pdf,
            &[
                PlacementRequest::new(0, company(), Rect::new(695.0, 100.0, 50.0, 20.0)),
                PlacementRequest::new(0, company(), Rect::new(100.0, 100.0, 50.0, 20.0)),
            ],
        )
        .unwrap();
    assert_eq!(outcome.placements[0].error_kind, Some(ErrorKind::InvalidGeometry));
    assert!(outcome.placements[1].ok);
}

// ============================================================
// Document assembly
// ============================================================

#[test]
fn pages_without_placements_are_copied_unchanged() {
    let pdf = build_pdf(&[PageSpec::rotated(0), PageSpec::rotated(90), PageSpec::rotated(0)]);
    let original = Document::load_mem(&pdf).unwrap();

    let outcome = coordinator(ClampMode::Lenient)
        .stamp_document(
            &pdf,
            &[PlacementRequest::new(1, company(), Rect::new(20.0, 30.0, 50.0, 20.0))],
        )
        .unwrap();
    let stamped = Document::load_mem(&outcome.output).unwrap();
    assert_eq!(stamped.get_pages().len(), 3);

    for index in [0u32, 2] {
        let (_, before) = page_dict(&original, index);
        let (_, after) = page_dict(&stamped, index);
        let before_contents = before.get(b"Contents").and_then(Object::as_reference).unwrap();
        let after_contents = after.get(b"Contents").and_then(Object::as_reference).unwrap();
        assert_eq!(before_contents, after_contents);

        let before_stream = original.get_object(before_contents).and_then(Object::as_stream).unwrap();
        let after_stream = stamped.get_object(after_contents).and_then(Object::as_stream).unwrap();
        assert_eq!(before_stream.content, after_stream.content);
        assert!(overlay_names(&stamped, index).is_empty());
    }

    // The stamped page keeps its original content inside the wrapper
    let (_, page) = page_dict(&stamped, 1);
    let contents = page.get(b"Contents").and_then(Object::as_array).unwrap();
    assert_eq!(contents.len(), 3);
}

#[test]
fn stamping_twice_stacks_overlays() {
    let pdf = build_pdf(&[PageSpec::rotated(180)]);
    let coordinator = coordinator(ClampMode::Lenient);
    let placement = [PlacementRequest::new(0, company(), Rect::new(20.0, 30.0, 50.0, 20.0))];

    let once = coordinator.stamp_document(&pdf, &placement).unwrap();
    let twice = coordinator.stamp_document(&once.output, &placement).unwrap();

    let doc = Document::load_mem(&twice.output).unwrap();
    assert_eq!(
        overlay_names(&doc, 0),
        vec!["StampOverlay0".to_string(), "StampOverlay1".to_string()]
    );
    let (page_id, _) = page_dict(&doc, 0);
    assert_eq!(
        PageGeometry::from_page(&doc, page_id).unwrap().rotation,
        Rotation::Rot180
    );
}

#[test]
fn partial_opacity_is_drawn() {
    let pdf = build_pdf(&[PageSpec::rotated(0)]);
    let outcome = coordinator(ClampMode::Lenient)
        .stamp_document(
            &pdf,
            &[PlacementRequest::new(0, company(), Rect::new(20.0, 30.0, 50.0, 20.0)).with_opacity(0.4)],
        )
        .unwrap();
    assert!(outcome.placements[0].ok);
}

// ============================================================
// Stamp cache
// ============================================================

#[test]
fn cache_returns_identical_bytes_across_calls() {
    let cache = cache();
    for variant in StampVariant::ALL {
        let first = cache.get(variant).to_vec();
        for _ in 0..1000 {
            assert_eq!(&*cache.get(variant), first.as_slice());
        }
    }
}

#[test]
fn cache_is_shared_across_threads() {
    let cache = cache();
    let expected = cache.get(company()).to_vec();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || cache.get(company()).to_vec())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

// ============================================================
// Batch isolation
// ============================================================

fn job(index: usize, document: Vec<u8>) -> DocumentJob {
    DocumentJob {
        identifier: format!("doc-{}.pdf", index),
        document,
        placements: vec![PlacementRequest::new(0, company(), Rect::new(20.0, 30.0, 50.0, 20.0))],
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn malformed_document_fails_alone((count, broken) in (1usize..6).prop_flat_map(|n| (Just(n), 0..n))) {
        let coordinator = coordinator(ClampMode::Lenient);
        let good = build_pdf(&[PageSpec::rotated(90)]);
        let jobs: Vec<DocumentJob> = (0..count)
            .map(|i| {
                if i == broken {
                    job(i, b"%PDF-1.4\n garbage without xref".to_vec())
                } else {
                    job(i, good.clone())
                }
            })
            .collect();

        let results = coordinator.process_batch(&jobs);
        prop_assert_eq!(results.len(), count);
        for (i, result) in results.iter().enumerate() {
            prop_assert_eq!(&result.identifier, &format!("doc-{}.pdf", i));
            prop_assert_eq!(result.ok, i != broken);
            if i != broken {
                prop_assert!(result.output.is_some());
            } else {
                prop_assert!(result.error_kind.is_some());
            }
        }
    }
}
