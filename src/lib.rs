//! Duker: face masking service.
//!
//! Images come in over HTTP or an MQTT queue topic. Each one is decoded,
//! faces are located with a SeetaFace cascade, and every face is painted
//! over with the duke glyph: black upper half, white lower half, red disc.
//! The result is answered to the caller, broadcast as base64 PNG, or
//! discarded.
//!
//! # Module Structure
//!
//! - `detect`: `RegionDetector` trait, rustface backend, fixed-region stub
//! - `transform`: `RegionTransformer` trait and the `DukeMask` glyph
//! - `pipeline`: detect once, transform every region in order
//! - `dispatch`: Respond / Broadcast / Discard sinks and encodings
//! - `service`: decode + pipeline + dispatch behind one call
//! - `worker`: bounded job queue and worker pool for queued jobs
//! - `transport`: MQTT link for the queue and broadcast topics
//! - `api`: HTTP/1.1 front-end
//! - `config`: `dukerd` configuration (JSON file + env overrides)

pub mod api;
pub mod config;
pub mod detect;
pub mod dispatch;
pub mod error;
pub mod pipeline;
pub mod service;
pub mod transform;
pub mod transport;
pub mod worker;

pub use detect::{DetectorBuilder, Region, RegionDetector, RustfaceDetector, StubDetector};
pub use dispatch::{Broadcaster, Dispatched, Dispatcher, Emitted, Encoding, Sink};
pub use error::{DukerError, Result};
pub use pipeline::{DetectionPipeline, DetectionResult};
pub use service::{decode, FaceService};
pub use transform::{DukeMask, RegionTransformer};
pub use worker::{JobQueue, JobSender, WorkerConfig, WorkerPool};
