use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};

use crate::detect::backends::{RustfaceDetector, ScanSettings};
use crate::error::{DukerError, Result};

/// SeetaFace frontal model compiled into the binary, used when no
/// classifier file is configured.
static BUNDLED_CLASSIFIER: &[u8] = include_bytes!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/model/seeta_fd_frontal_v1.0.bin"
));

/// Name reported for the bundled model in logs and errors.
const BUNDLED_CLASSIFIER_NAME: &str = "bundled:seeta_fd_frontal_v1.0.bin";

/// Smallest face size the SeetaFace cascade accepts.
pub const MIN_FACE_SIZE_FLOOR: u32 = 20;

/// One-step construction of a ready-to-use [`RustfaceDetector`].
///
/// `build` loads the configured classifier file (or the bundled model when
/// none is set) and either returns a detector that needs no further
/// initialisation or fails with [`DukerError::DetectorUnavailable`].
#[derive(Clone, Debug)]
pub struct DetectorBuilder {
    classifier_file: Option<PathBuf>,
    settings: ScanSettings,
}

impl Default for DetectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBuilder {
    pub fn new() -> Self {
        Self {
            classifier_file: None,
            settings: ScanSettings::default(),
        }
    }

    pub fn classifier_file(mut self, path: impl AsRef<Path>) -> Self {
        self.classifier_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn min_face_size(mut self, size: u32) -> Self {
        self.settings.min_face_size = size;
        self
    }

    pub fn score_thresh(mut self, thresh: f64) -> Self {
        self.settings.score_thresh = thresh;
        self
    }

    pub fn pyramid_scale_factor(mut self, factor: f32) -> Self {
        self.settings.pyramid_scale_factor = factor;
        self
    }

    pub fn slide_window_step(mut self, step_x: u32, step_y: u32) -> Self {
        self.settings.slide_window_step = (step_x, step_y);
        self
    }

    /// Configured classifier file, `None` for the bundled model.
    pub fn classifier_path(&self) -> Option<&Path> {
        self.classifier_file.as_deref()
    }

    /// Human-readable classifier source for logs.
    pub fn classifier_source(&self) -> PathBuf {
        self.classifier_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(BUNDLED_CLASSIFIER_NAME))
    }

    pub fn build(&self) -> Result<RustfaceDetector> {
        self.check_settings()?;

        let model = match &self.classifier_file {
            Some(path) => {
                log::info!("load {}", path.display());
                let file = File::open(path).map_err(|e| self.unavailable(e.to_string()))?;
                rustface::read_model(BufReader::new(file))
            }
            None => rustface::read_model(Cursor::new(BUNDLED_CLASSIFIER)),
        }
        .map_err(|e| self.unavailable(format!("invalid SeetaFace model: {e}")))?;

        Ok(RustfaceDetector::from_model(model, self.settings))
    }

    fn check_settings(&self) -> Result<()> {
        let s = &self.settings;
        if s.min_face_size < MIN_FACE_SIZE_FLOOR {
            return Err(self.unavailable(format!(
                "min face size must be at least {MIN_FACE_SIZE_FLOOR}, got {}",
                s.min_face_size
            )));
        }
        if !(s.pyramid_scale_factor > 0.0 && s.pyramid_scale_factor < 1.0) {
            return Err(self.unavailable(format!(
                "pyramid scale factor must be in (0, 1), got {}",
                s.pyramid_scale_factor
            )));
        }
        if s.slide_window_step.0 == 0 || s.slide_window_step.1 == 0 {
            return Err(self.unavailable("slide window step must be positive".to_string()));
        }
        Ok(())
    }

    fn unavailable(&self, reason: String) -> DukerError {
        DukerError::DetectorUnavailable {
            path: self.classifier_source(),
            reason,
        }
    }
}
