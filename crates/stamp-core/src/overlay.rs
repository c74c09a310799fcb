//! Overlay page construction
//!
//! Builds a one-page document that holds nothing but the stamp images, drawn
//! axis-aligned at their normalized user-space rectangles. Rotation has already
//! been resolved by the normalizer, so the overlay is never rotated itself.

use std::io::Write;
use std::sync::Arc;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use crate::error::StampError;
use crate::geometry::Rect;
use crate::stamp::raster;

/// A placement after normalization, ready to be drawn
#[derive(Debug, Clone)]
pub struct NormalizedPlacement {
    pub page_index: u32,
    pub image_bytes: Arc<[u8]>,
    pub user_rect: Rect,
}

/// A built overlay page plus the per-item draw results
#[derive(Debug)]
pub struct Overlay {
    pub document: Document,
    pub page_id: ObjectId,
    pub width_pt: f64,
    pub height_pt: f64,
    /// Indices (into the input items) that were drawn
    pub drawn: Vec<usize>,
    /// Indices that were skipped, with the reason
    pub rejected: Vec<(usize, StampError)>,
}

impl Overlay {
    pub fn is_empty(&self) -> bool {
        self.drawn.is_empty()
    }

    /// Serialize the overlay as a standalone PDF
    pub fn to_bytes(&mut self) -> Result<Vec<u8>, StampError> {
        let mut buffer = Vec::new();
        self.document
            .save_to(&mut buffer)
            .map_err(|e| StampError::SerializationFailure(e.to_string()))?;
        Ok(buffer)
    }
}

/// Draws normalized placements onto a fresh single-page document
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlayBuilder;

impl OverlayBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build the overlay page.
    ///
    /// Every item is decoded from its own buffer; a malformed image rejects
    /// only that item. The call itself fails only for an unusable page size.
    pub fn build(
        &self,
        page_width_pt: f64,
        page_height_pt: f64,
        items: &[NormalizedPlacement],
    ) -> Result<Overlay, StampError> {
        if !(page_width_pt.is_finite() && page_height_pt.is_finite())
            || page_width_pt <= 0.0
            || page_height_pt <= 0.0
        {
            return Err(StampError::InvalidGeometry(format!(
                "Overlay page size {}x{}",
                page_width_pt, page_height_pt
            )));
        }

        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();

        let mut xobjects = Dictionary::new();
        let mut operations = Vec::new();
        let mut drawn = Vec::new();
        let mut rejected = Vec::new();

        for (i, item) in items.iter().enumerate() {
            let image_id = match embed_image(&mut doc, &item.image_bytes) {
                Ok(id) => id,
                Err(e) => {
                    debug!(item = i, error = %e, "Skipping stamp with unusable image");
                    rejected.push((i, e));
                    continue;
                }
            };

            let name = format!("Stamp{}", i);
            xobjects.set(name.clone(), image_id);
            operations.extend(draw_image_ops(&name, item.user_rect));
            drawn.push(i);
        }

        let content = Content { operations }
            .encode()
            .map_err(|e| StampError::SerializationFailure(format!("Overlay content: {}", e)))?;
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                Object::Real(page_width_pt as f32),
                Object::Real(page_height_pt as f32),
            ],
            "Resources" => dictionary! { "XObject" => xobjects },
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        debug!(
            drawn = drawn.len(),
            rejected = rejected.len(),
            "Built overlay page"
        );

        Ok(Overlay {
            document: doc,
            page_id,
            width_pt: page_width_pt,
            height_pt: page_height_pt,
            drawn,
            rejected,
        })
    }
}

/// `q w 0 0 h x y cm /Name Do Q`
fn draw_image_ops(name: &str, rect: Rect) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![
                Object::Real(rect.width as f32),
                0.into(),
                0.into(),
                Object::Real(rect.height as f32),
                Object::Real(rect.x as f32),
                Object::Real(rect.y as f32),
            ],
        ),
        Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
        Operation::new("Q", vec![]),
    ]
}

/// Decode PNG bytes and add them as an RGB image XObject with a soft mask
fn embed_image(doc: &mut Document, png: &[u8]) -> Result<ObjectId, StampError> {
    let image = raster::decode_png(png)?;
    let (rgb, alpha) = raster::split_alpha(&image);

    let mut image_dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => image.width() as i64,
        "Height" => image.height() as i64,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
        "Filter" => "FlateDecode",
    };

    if raster::has_transparency(&image) {
        let smask_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => image.width() as i64,
                "Height" => image.height() as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            deflate(&alpha)?,
        ));
        image_dict.set("SMask", smask_id);
    }

    Ok(doc.add_object(Stream::new(image_dict, deflate(&rgb)?)))
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, StampError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| StampError::SerializationFailure(format!("Deflate: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| StampError::SerializationFailure(format!("Deflate: {}", e)))
}
