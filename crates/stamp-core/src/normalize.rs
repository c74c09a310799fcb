//! Visual-space to user-space coordinate normalization
//!
//! Callers express placements in "visual" space: the page as a viewer shows
//! it after applying `/Rotate`, origin bottom-left, in points. Content streams
//! are drawn in the page's unrotated user space. The normalizer maps one into
//! the other so an axis-aligned blit lands where the caller meant it, then
//! shifts by the crop-box offset and keeps the result on the page.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StampError;
use crate::geometry::{PageGeometry, Rect, Rotation};

/// A rect may be at most this many times the matching page dimension
const MAX_PAGE_MULTIPLE: f64 = 2.0;

/// What to do with a placement that falls (partly) off the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClampMode {
    /// Slide the rect back onto the page
    #[default]
    Lenient,
    /// Reject it with `InvalidGeometry`
    Strict,
}

/// Result of normalizing one visual rect
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalized {
    pub rect: Rect,
    /// True when clamping moved the rect
    pub clamped: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinateNormalizer {
    clamp_mode: ClampMode,
}

impl CoordinateNormalizer {
    pub fn new(clamp_mode: ClampMode) -> Self {
        Self { clamp_mode }
    }

    pub fn clamp_mode(&self) -> ClampMode {
        self.clamp_mode
    }

    /// Map a visual rect into the page's user space.
    pub fn normalize(&self, page: &PageGeometry, visual: Rect) -> Result<Normalized, StampError> {
        if !visual.is_finite() {
            return Err(StampError::InvalidGeometry(format!(
                "Non-finite placement {:?}",
                visual
            )));
        }

        let user = self.project(page, visual);
        validate_size(page, &user)?;

        let clamped = clamp_to_page(page, user);
        let moved = clamped != user;
        if moved {
            match self.clamp_mode {
                ClampMode::Lenient => {
                    warn!(
                        from_x = user.x,
                        from_y = user.y,
                        to_x = clamped.x,
                        to_y = clamped.y,
                        "Placement clamped onto page"
                    );
                }
                ClampMode::Strict => {
                    return Err(StampError::InvalidGeometry(format!(
                        "Placement {:?} falls outside the {}x{} page",
                        user, page.width_pt, page.height_pt
                    )));
                }
            }
        }

        Ok(Normalized {
            rect: clamped,
            clamped: moved,
        })
    }

    /// Rotation mapping plus crop offset, without validation or clamping
    pub fn project(&self, page: &PageGeometry, visual: Rect) -> Rect {
        let mut user = rotate_into_user_space(page, visual);
        user.x += page.crop_offset_x_pt;
        user.y += page.crop_offset_y_pt;
        user
    }

    /// Inverse of [`project`](Self::project).
    ///
    /// Clamping is not reversible, so for [`normalize`](Self::normalize)
    /// output this is exact only when `clamped` is false.
    pub fn to_visual(&self, page: &PageGeometry, user: Rect) -> Rect {
        let u = Rect {
            x: user.x - page.crop_offset_x_pt,
            y: user.y - page.crop_offset_y_pt,
            ..user
        };
        let (w, h) = (page.width_pt, page.height_pt);
        match page.rotation {
            Rotation::Rot0 => u,
            Rotation::Rot90 => Rect {
                x: w - (u.y + u.height),
                y: u.x,
                width: u.height,
                height: u.width,
            },
            Rotation::Rot180 => Rect {
                x: w - (u.x + u.width),
                y: h - (u.y + u.height),
                width: u.width,
                height: u.height,
            },
            Rotation::Rot270 => Rect {
                x: u.y,
                y: h - (u.x + u.width),
                width: u.height,
                height: u.width,
            },
        }
    }
}

fn rotate_into_user_space(page: &PageGeometry, v: Rect) -> Rect {
    let (w, h) = (page.width_pt, page.height_pt);
    match page.rotation {
        Rotation::Rot0 => v,
        Rotation::Rot90 => Rect {
            x: v.y,
            y: w - (v.x + v.width),
            width: v.height,
            height: v.width,
        },
        Rotation::Rot180 => Rect {
            x: w - (v.x + v.width),
            y: h - (v.y + v.height),
            width: v.width,
            height: v.height,
        },
        Rotation::Rot270 => Rect {
            x: h - (v.y + v.height),
            y: v.x,
            width: v.height,
            height: v.width,
        },
    }
}

fn validate_size(page: &PageGeometry, user: &Rect) -> Result<(), StampError> {
    if user.width <= 0.0 || user.height <= 0.0 {
        return Err(StampError::InvalidGeometry(format!(
            "Non-positive size {}x{}",
            user.width, user.height
        )));
    }
    if user.width > page.width_pt * MAX_PAGE_MULTIPLE
        || user.height > page.height_pt * MAX_PAGE_MULTIPLE
    {
        return Err(StampError::InvalidGeometry(format!(
            "Size {}x{} exceeds twice the {}x{} page",
            user.width, user.height, page.width_pt, page.height_pt
        )));
    }
    Ok(())
}

/// Clamp into `[0, page - size]` on both axes.
///
/// A rect wider than the page pins to 0 rather than panicking on an
/// inverted range.
pub fn clamp_to_page(page: &PageGeometry, rect: Rect) -> Rect {
    let max_x = page.width_pt - rect.width;
    let max_y = page.height_pt - rect.height;
    Rect {
        x: rect.x.min(max_x).max(0.0),
        y: rect.y.min(max_y).max(0.0),
        ..rect
    }
}
