//! Physical unit conversion
//!
//! PDF user space is measured in points (1/72 inch). Callers that think in
//! millimetres or screen pixels convert here before reaching the normalizer.

use serde::{Deserialize, Serialize};

use crate::geometry::Rect;

pub const POINTS_PER_INCH: f64 = 72.0;
pub const MM_PER_INCH: f64 = 25.4;

/// Millimetres to points
pub const MM_TO_PT: f64 = POINTS_PER_INCH / MM_PER_INCH;
/// Points to millimetres
pub const PT_TO_MM: f64 = MM_PER_INCH / POINTS_PER_INCH;

/// CSS reference pixel density
pub const CSS_DPI: f64 = 96.0;

/// A4 portrait in points
pub const A4_WIDTH_PT: f64 = 595.0;
pub const A4_HEIGHT_PT: f64 = 842.0;

pub fn mm_to_pt(mm: f64) -> f64 {
    mm * MM_TO_PT
}

pub fn pt_to_mm(pt: f64) -> f64 {
    pt * PT_TO_MM
}

/// Convert pixels at the given density to points
pub fn px_to_pt(px: f64, dpi: f64) -> f64 {
    px * POINTS_PER_INCH / dpi
}

/// Measurement units accepted at the request boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    /// Points (1/72 inch), PDF native
    #[default]
    #[serde(alias = "point")]
    Pt,
    #[serde(alias = "millimeter")]
    Mm,
    #[serde(alias = "inch")]
    In,
    /// CSS pixels at 96 dpi
    #[serde(alias = "pixel")]
    Px,
}

impl Unit {
    pub fn to_points(self, value: f64) -> f64 {
        match self {
            Unit::Pt => value,
            Unit::Mm => mm_to_pt(value),
            Unit::In => value * POINTS_PER_INCH,
            Unit::Px => px_to_pt(value, CSS_DPI),
        }
    }

    pub fn from_points(self, points: f64) -> f64 {
        match self {
            Unit::Pt => points,
            Unit::Mm => pt_to_mm(points),
            Unit::In => points / POINTS_PER_INCH,
            Unit::Px => points * CSS_DPI / POINTS_PER_INCH,
        }
    }

    /// Convert a whole rect expressed in this unit to points
    pub fn rect_to_points(self, rect: Rect) -> Rect {
        Rect::new(
            self.to_points(rect.x),
            self.to_points(rect.y),
            self.to_points(rect.width),
            self.to_points(rect.height),
        )
    }
}
