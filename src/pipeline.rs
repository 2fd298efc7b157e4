use std::sync::Arc;

use image::RgbImage;

use crate::detect::RegionDetector;
use crate::error::Result;
use crate::transform::RegionTransformer;

/// Output of one pipeline run. Lives only as long as the invocation that produced it.
#[derive(Debug)]
pub struct DetectionResult {
    pub image: RgbImage,
    pub region_count: usize,
}

/// Detector → per-region transformer, in detection order.
#[derive(Clone)]
pub struct DetectionPipeline {
    detector: Arc<dyn RegionDetector>,
    transformer: Arc<dyn RegionTransformer>,
}

impl DetectionPipeline {
    pub fn new(detector: Arc<dyn RegionDetector>, transformer: Arc<dyn RegionTransformer>) -> Self {
        Self {
            detector,
            transformer,
        }
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    pub fn transformer_name(&self) -> &'static str {
        self.transformer.name()
    }

    /// Detect once, then transform every region in place.
    ///
    /// A detector failure is returned before the image is touched.
    pub fn run(&self, mut image: RgbImage) -> Result<DetectionResult> {
        let regions = self.detector.detect(&image)?;
        let (width, height) = image.dimensions();
        for region in &regions {
            debug_assert!(
                region.fits_within(width, height),
                "{} returned {region:?} outside a {width}x{height} image",
                self.detector.name()
            );
            self.transformer.apply(&mut image, *region);
        }
        Ok(DetectionResult {
            image,
            region_count: regions.len(),
        })
    }
}
