//! Page geometry model
//!
//! Reads a page's physical size, crop-box offset and rotation from the
//! document model and exposes them as a normalized, read-only value.

use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StampError;

/// Inheritable page attributes are looked up at most this many levels up
/// the page tree; deeper chains are treated as malformed.
const MAX_INHERITANCE_DEPTH: usize = 32;

/// US Letter, used when a page tree carries no MediaBox at all
const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

/// Axis-aligned rectangle in points, origin bottom-left
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn top(&self) -> f64 {
        self.y + self.height
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }
}

/// Canonical page rotations (clockwise, as stored in `/Rotate`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
    #[default]
    Rot0,
    Rot90,
    Rot180,
    Rot270,
}

impl Rotation {
    /// Map a stored `/Rotate` value onto a canonical rotation.
    ///
    /// Multiples of 90 are reduced modulo 360, so `-90` reads as 270.
    /// Anything else only appears in malformed files and reads as 0.
    pub fn from_degrees(degrees: i64) -> Self {
        match degrees.rem_euclid(360) {
            0 => Rotation::Rot0,
            90 => Rotation::Rot90,
            180 => Rotation::Rot180,
            270 => Rotation::Rot270,
            other => {
                warn!(rotation = degrees, reduced = other, "Non-canonical page rotation, treating as 0");
                Rotation::Rot0
            }
        }
    }

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Rot0 => 0,
            Rotation::Rot90 => 90,
            Rotation::Rot180 => 180,
            Rotation::Rot270 => 270,
        }
    }

    /// True when the viewer shows the page with width and height exchanged
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Rot90 | Rotation::Rot270)
    }
}

/// Normalized geometry of one page, in points.
///
/// `width_pt`/`height_pt` are the unrotated media box dimensions. The crop
/// offset is the displacement of the crop box's lower-left corner from the
/// media box's lower-left corner. `media_origin` is the media box's own
/// lower-left corner in raw user space (almost always `(0, 0)`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub width_pt: f64,
    pub height_pt: f64,
    pub rotation: Rotation,
    pub crop_offset_x_pt: f64,
    pub crop_offset_y_pt: f64,
    pub media_origin: (f64, f64),
}

impl PageGeometry {
    /// Geometry of an unrotated, uncropped page
    pub fn new(width_pt: f64, height_pt: f64) -> Self {
        Self {
            width_pt,
            height_pt,
            rotation: Rotation::Rot0,
            crop_offset_x_pt: 0.0,
            crop_offset_y_pt: 0.0,
            media_origin: (0.0, 0.0),
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_crop_offset(mut self, x: f64, y: f64) -> Self {
        self.crop_offset_x_pt = x;
        self.crop_offset_y_pt = y;
        self
    }

    /// Page size as the viewer displays it, after rotation
    pub fn visual_size(&self) -> (f64, f64) {
        if self.rotation.swaps_axes() {
            (self.height_pt, self.width_pt)
        } else {
            (self.width_pt, self.height_pt)
        }
    }

    /// Read the geometry of a page from the document
    pub fn from_page(doc: &Document, page_id: ObjectId) -> Result<Self, StampError> {
        let page_dict = doc
            .get_object(page_id)
            .and_then(Object::as_dict)
            .map_err(|e| {
                StampError::DocumentDecodeFailure(format!("Page {:?} is not a dictionary: {}", page_id, e))
            })?;

        let media_box = match inherited_attribute(doc, page_dict, b"MediaBox") {
            Some(obj) => parse_box(doc, obj)?,
            None => DEFAULT_MEDIA_BOX,
        };
        let crop_box = match inherited_attribute(doc, page_dict, b"CropBox") {
            Some(obj) => Some(parse_box(doc, obj)?),
            None => None,
        };
        let rotation = match inherited_attribute(doc, page_dict, b"Rotate") {
            Some(obj) => Rotation::from_degrees(extract_number(doc, obj)?.round() as i64),
            None => Rotation::Rot0,
        };

        let (crop_offset_x_pt, crop_offset_y_pt) = match crop_box {
            Some(crop) => (crop[0] - media_box[0], crop[1] - media_box[1]),
            None => (0.0, 0.0),
        };

        Ok(Self {
            width_pt: media_box[2] - media_box[0],
            height_pt: media_box[3] - media_box[1],
            rotation,
            crop_offset_x_pt,
            crop_offset_y_pt,
            media_origin: (media_box[0], media_box[1]),
        })
    }
}

/// Look up an inheritable page attribute, walking the `Parent` chain
pub(crate) fn inherited_attribute<'a>(
    doc: &'a Document,
    page_dict: &'a Dictionary,
    key: &[u8],
) -> Option<&'a Object> {
    let mut current = page_dict;
    for _ in 0..MAX_INHERITANCE_DEPTH {
        if let Ok(value) = current.get(key) {
            return Some(value);
        }
        let parent_id = current.get(b"Parent").and_then(Object::as_reference).ok()?;
        current = doc.get_object(parent_id).and_then(Object::as_dict).ok()?;
    }
    None
}

/// Parse a PDF rectangle array into normalized `[llx, lly, urx, ury]`
fn parse_box(doc: &Document, obj: &Object) -> Result<[f64; 4], StampError> {
    let arr = match obj {
        Object::Array(a) => a,
        Object::Reference(id) => doc
            .get_object(*id)
            .and_then(Object::as_array)
            .map_err(|e| StampError::DocumentDecodeFailure(format!("Unresolvable page box: {}", e)))?,
        _ => {
            return Err(StampError::DocumentDecodeFailure(
                "Page box is not an array".to_string(),
            ))
        }
    };

    if arr.len() != 4 {
        return Err(StampError::DocumentDecodeFailure(format!(
            "Page box has {} elements, expected 4",
            arr.len()
        )));
    }

    let mut values = [0.0f64; 4];
    for (i, obj) in arr.iter().enumerate() {
        values[i] = extract_number(doc, obj)?;
    }

    // Corners may be stored in any order
    Ok([
        values[0].min(values[2]),
        values[1].min(values[3]),
        values[0].max(values[2]),
        values[1].max(values[3]),
    ])
}

fn extract_number(doc: &Document, obj: &Object) -> Result<f64, StampError> {
    match obj {
        Object::Integer(i) => Ok(*i as f64),
        Object::Real(r) => Ok(*r as f64),
        Object::Reference(id) => {
            let resolved = doc
                .get_object(*id)
                .map_err(|e| StampError::DocumentDecodeFailure(format!("Failed to resolve: {}", e)))?;
            extract_number(doc, resolved)
        }
        _ => Err(StampError::DocumentDecodeFailure(
            "Expected number in page attribute".to_string(),
        )),
    }
}
