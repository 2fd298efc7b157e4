//! Per-region stylization.
//!
//! A [`RegionTransformer`] paints over one detected region in place. The
//! pipeline applies it to every region in detection order; later regions
//! simply overwrite earlier pixels where they overlap.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::rect::Rect;

use crate::detect::Region;

pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);

/// Paints over a single region of an image.
///
/// Implementations must only write pixels; they never resize the image.
pub trait RegionTransformer: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, image: &mut RgbImage, region: Region);
}

/// The "duke" glyph: black upper half, white lower half, red disc.
///
/// The disc centre x-coordinate is `x + h/2`, derived from the region
/// height rather than its width. Non-square regions therefore get an
/// off-centre disc.
#[derive(Clone, Copy, Debug, Default)]
pub struct DukeMask;

impl DukeMask {
    /// Disc centre and radius for `region`.
    pub fn disc(region: Region) -> ((i64, i64), i64) {
        let Region {
            x,
            y,
            width: w,
            height: h,
        } = region;
        let (x, y, w, h) = (x as i64, y as i64, w as i64, h as i64);
        ((x + h / 2, y + h / 2), (w + h) / 12)
    }
}

impl RegionTransformer for DukeMask {
    fn name(&self) -> &'static str {
        "duke"
    }

    fn apply(&self, image: &mut RgbImage, region: Region) {
        let Region {
            x,
            y,
            width: w,
            height: h,
        } = region;
        let upper = h / 2;

        fill_rect(image, x, y, w, upper, BLACK);
        fill_rect(image, x, y + upper, w, h - upper, WHITE);

        let ((cx, cy), radius) = Self::disc(region);
        if let (Ok(cx), Ok(cy), Ok(radius)) =
            (i32::try_from(cx), i32::try_from(cy), i32::try_from(radius))
        {
            draw_filled_circle_mut(image, (cx, cy), radius, RED);
        }
        log::debug!(
            "masked region x={} y={} w={} h={} disc=({}, {}) r={}",
            x,
            y,
            w,
            h,
            cx,
            cy,
            radius
        );
    }
}

/// Solid fill of the half-open rectangle starting at (`x`, `y`).
/// Zero-sized rectangles are a no-op.
fn fill_rect(image: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    if w == 0 || h == 0 {
        return;
    }
    let (Ok(x), Ok(y)) = (i32::try_from(x), i32::try_from(y)) else {
        return;
    };
    draw_filled_rect_mut(image, Rect::at(x, y).of_size(w, h), color);
}
