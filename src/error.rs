use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the detect → transform → emit pipeline.
#[derive(Debug, Error)]
pub enum DukerError {
    /// The classifier could not be loaded. Raised only while building a detector.
    #[error("detector unavailable: failed to load classifier {}: {reason}", path.display())]
    DetectorUnavailable { path: PathBuf, reason: String },

    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("failed to encode image: {0}")]
    Encode(String),

    #[error("detection failed: {0}")]
    Detection(String),

    /// Broadcast sink unreachable. Logged by the dispatcher, never returned from it.
    #[error("failed to publish broadcast: {0}")]
    Publish(String),

    #[error("job queue is full")]
    QueueFull,

    #[error("job queue is closed")]
    QueueClosed,
}

impl DukerError {
    /// HTTP status the synchronous API answers with for this failure.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Decode(_) => 400,
            Self::DetectorUnavailable { .. } | Self::QueueFull | Self::QueueClosed => 503,
            Self::Encode(_) | Self::Detection(_) | Self::Publish(_) => 500,
        }
    }

    /// Stable short code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DetectorUnavailable { .. } => "detector_unavailable",
            Self::Decode(_) => "decode_error",
            Self::Encode(_) => "encode_error",
            Self::Detection(_) => "detection_failed",
            Self::Publish(_) => "publish_failure",
            Self::QueueFull => "queue_full",
            Self::QueueClosed => "queue_closed",
        }
    }
}

pub type Result<T> = std::result::Result<T, DukerError>;
