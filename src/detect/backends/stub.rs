use image::RgbImage;

use crate::detect::backend::RegionDetector;
use crate::detect::region::Region;
use crate::error::Result;

/// Stub backend for testing. Reports a fixed list of regions for every image.
#[derive(Clone, Debug, Default)]
pub struct StubDetector {
    regions: Vec<Region>,
}

impl StubDetector {
    pub fn new(regions: Vec<Region>) -> Self {
        Self { regions }
    }

    /// A detector that never finds anything.
    pub fn empty() -> Self {
        Self::default()
    }
}

impl RegionDetector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<Region>> {
        let (width, height) = image.dimensions();
        Ok(self
            .regions
            .iter()
            .filter_map(|r| {
                Region::clipped(
                    r.x as i64,
                    r.y as i64,
                    r.width as i64,
                    r.height as i64,
                    width,
                    height,
                )
            })
            .collect())
    }
}
