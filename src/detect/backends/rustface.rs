use image::RgbImage;

use crate::detect::backend::RegionDetector;
use crate::detect::region::Region;
use crate::error::Result;

/// Scan parameters handed to every rustface engine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScanSettings {
    pub min_face_size: u32,
    pub score_thresh: f64,
    pub pyramid_scale_factor: f32,
    pub slide_window_step: (u32, u32),
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            min_face_size: 20,
            score_thresh: 2.0,
            pyramid_scale_factor: 0.8,
            slide_window_step: (4, 4),
        }
    }
}

/// Face detector backed by the `rustface` crate (SeetaFace engine).
///
/// Holds the parsed model read-only. Each `detect` call builds a short-lived
/// engine from a copy of the model, so concurrent calls never share mutable
/// state. Construct through [`crate::detect::DetectorBuilder`].
pub struct RustfaceDetector {
    model: rustface::Model,
    settings: ScanSettings,
}

impl RustfaceDetector {
    pub(crate) fn from_model(model: rustface::Model, settings: ScanSettings) -> Self {
        Self { model, settings }
    }

    pub fn settings(&self) -> ScanSettings {
        self.settings
    }
}

impl RegionDetector for RustfaceDetector {
    fn name(&self) -> &'static str {
        "rustface"
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<Region>> {
        let (width, height) = image.dimensions();
        let gray = image::imageops::grayscale(image);

        let mut engine = rustface::create_detector_with_model(self.model.clone());
        engine.set_min_face_size(self.settings.min_face_size);
        engine.set_score_thresh(self.settings.score_thresh);
        engine.set_pyramid_scale_factor(self.settings.pyramid_scale_factor);
        let (step_x, step_y) = self.settings.slide_window_step;
        engine.set_slide_window_step(step_x, step_y);

        let faces = engine.detect(&rustface::ImageData::new(gray.as_raw(), width, height));

        let regions: Vec<Region> = faces
            .iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                Region::clipped(
                    bbox.x() as i64,
                    bbox.y() as i64,
                    bbox.width() as i64,
                    bbox.height() as i64,
                    width,
                    height,
                )
            })
            .collect();

        log::info!("{} faces are detected", regions.len());
        Ok(regions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::DetectorBuilder;

    fn detector() -> RustfaceDetector {
        DetectorBuilder::new().build().expect("bundled model loads")
    }

    #[test]
    fn finds_faces_inside_image_bounds() {
        let image = image::open(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/faces.png"
        ))
        .expect("fixture decodes")
        .to_rgb8();
        let (width, height) = image.dimensions();

        let regions = detector().detect(&image).unwrap();
        assert!(!regions.is_empty());
        for region in &regions {
            assert!(region.fits_within(width, height), "{region:?} out of bounds");
            assert!(!region.is_degenerate());
        }
    }

    #[test]
    fn images_below_min_face_size_yield_nothing() {
        let detector = detector();
        for (w, h) in [(1, 1), (19, 19), (40, 3)] {
            let image = RgbImage::from_pixel(w, h, image::Rgb([128, 128, 128]));
            assert_eq!(detector.detect(&image).unwrap(), Vec::new(), "{w}x{h}");
        }
    }
}
