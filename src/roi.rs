//! Region-of-interest selection.
//!
//! Maps a detection's bounding-box center to a fixed-size crop window. Only the
//! window position is clamped to the frame; its size never changes.

use crate::detect::BoundingBox;

/// Integer crop rectangle `[x, x + width) x [y, y + height)` in frame pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    pub fn fits_within(&self, frame_width: u32, frame_height: u32) -> bool {
        self.x
            .checked_add(self.width)
            .is_some_and(|right| right <= frame_width)
            && self
                .y
                .checked_add(self.height)
                .is_some_and(|bottom| bottom <= frame_height)
    }
}

/// Compute a `crop_width x crop_height` window centered on `bbox`, shifted as needed to
/// stay inside the frame.
///
/// Precondition: `frame_width >= crop_width` and `frame_height >= crop_height`. The
/// policy engine never calls this otherwise; if it is violated the window is pinned
/// to the origin and will not fit the frame.
pub fn select_roi(
    bbox: &BoundingBox,
    frame_width: u32,
    frame_height: u32,
    crop_width: u32,
    crop_height: u32,
) -> Roi {
    let (center_x, center_y) = bbox.center();
    Roi {
        x: clamp_axis(center_x, crop_width, frame_width),
        y: clamp_axis(center_y, crop_height, frame_height),
        width: crop_width,
        height: crop_height,
    }
}

/// Start coordinate of a window of `extent` centered on `center`, clamped so that
/// `[start, start + extent)` lies in `[0, frame_extent)`.
fn clamp_axis(center: f32, extent: u32, frame_extent: u32) -> u32 {
    // Truncate the center to whole pixels before shifting.
    let center = center.floor() as i64;
    let start = center - i64::from(extent / 2);
    let max_start = i64::from(frame_extent.saturating_sub(extent));
    start.clamp(0, max_start) as u32
}
