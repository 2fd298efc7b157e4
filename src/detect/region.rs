/// Axis-aligned rectangle in image pixel coordinates.
///
/// Detectors only hand out regions that lie inside the image they were run on;
/// use [`Region::clipped`] to bring raw detector output into bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clip a raw detection to a `bounds_w` x `bounds_h` image.
    ///
    /// Returns `None` when the rectangle lies entirely outside the image.
    /// A rectangle that touches the image but has no area survives as a
    /// degenerate region.
    pub fn clipped(
        x: i64,
        y: i64,
        width: i64,
        height: i64,
        bounds_w: u32,
        bounds_h: u32,
    ) -> Option<Self> {
        let (x0, x1) = clip_span(x, width, bounds_w)?;
        let (y0, y1) = clip_span(y, height, bounds_h)?;
        Some(Self::new(x0, y0, x1 - x0, y1 - y0))
    }

    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True when the region sits inside a `width` x `height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x as u64 + self.width as u64 <= width as u64
            && self.y as u64 + self.height as u64 <= height as u64
    }
}

fn clip_span(start: i64, len: i64, bound: u32) -> Option<(u32, u32)> {
    let bound = bound as i64;
    let end = start.saturating_add(len.max(0));
    if start > bound || end < 0 {
        return None;
    }
    let lo = start.clamp(0, bound);
    let hi = end.clamp(lo, bound);
    Some((lo as u32, hi as u32))
}
