//! Output sinks for pipeline results.
//!
//! The caller picks a [`Sink`] per invocation:
//! - `Respond`: encode and hand the bytes back to the caller
//! - `Broadcast`: encode as base64 PNG and publish to the broadcast topic
//! - `Discard`: emit nothing
//!
//! Broadcast is fire-and-forget. A publish that fails is logged and the job
//! still succeeds.

use std::io::Cursor;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, RgbImage};

use crate::error::{DukerError, Result};
use crate::pipeline::DetectionResult;

pub const DEFAULT_BROADCAST_TOPIC: &str = "topic/faces";

/// Raster encodings the respond sink can produce.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Png,
    Jpeg,
    Bmp,
}

impl Encoding {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Bmp => "image/bmp",
        }
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Bmp => ImageFormat::Bmp,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/bmp" | "image/x-bmp" => Some(Self::Bmp),
            _ => None,
        }
    }

    /// Name or file extension, e.g. `png`, `jpg`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "bmp" => Some(Self::Bmp),
            _ => None,
        }
    }

    /// Pick an encoding from an HTTP `Accept` header.
    ///
    /// Missing or wildcard headers select PNG. Media ranges are tried in
    /// descending `q` order; `q=0` entries are ignored. Returns `None` when
    /// nothing offered is acceptable.
    pub fn negotiate(accept: Option<&str>) -> Option<Self> {
        let Some(accept) = accept.filter(|a| !a.trim().is_empty()) else {
            return Some(Self::default());
        };

        let mut ranges: Vec<(&str, f32)> = accept
            .split(',')
            .filter_map(|entry| {
                let mut params = entry.split(';');
                let mime = params.next()?.trim();
                let q = params
                    .filter_map(|p| p.trim().strip_prefix("q="))
                    .find_map(|q| q.trim().parse::<f32>().ok())
                    .unwrap_or(1.0);
                Some((mime, q))
            })
            .filter(|(_, q)| *q > 0.0)
            .collect();
        ranges.sort_by(|a, b| b.1.total_cmp(&a.1));

        ranges.into_iter().find_map(|(mime, _)| match mime {
            "*/*" | "image/*" => Some(Self::default()),
            other => Self::from_mime(other),
        })
    }
}

/// Where a pipeline result goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sink {
    Respond(Encoding),
    Broadcast,
    Discard,
}

/// Publish-only channel with zero or more passive subscribers.
pub trait Broadcaster: Send + Sync {
    /// Hand one opaque payload to the channel. Must not block on subscribers.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> anyhow::Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedImage {
    pub encoding: Encoding,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Emitted {
    Body(EncodedImage),
    /// Broadcast attempted. `delivered` is false when publishing failed.
    Broadcast { topic: String, delivered: bool },
    Discarded,
}

/// What the dispatcher did with one pipeline result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dispatched {
    pub region_count: usize,
    pub emitted: Emitted,
}

#[derive(Clone)]
pub struct Dispatcher {
    broadcaster: Option<Arc<dyn Broadcaster>>,
    topic: String,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Dispatcher without a broadcast channel. Broadcasts are dropped with a warning.
    pub fn new() -> Self {
        Self {
            broadcaster: None,
            topic: DEFAULT_BROADCAST_TOPIC.to_string(),
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn dispatch(&self, result: DetectionResult, sink: Sink) -> Result<Dispatched> {
        let DetectionResult {
            image,
            region_count,
        } = result;
        let emitted = match sink {
            Sink::Respond(encoding) => Emitted::Body(EncodedImage {
                encoding,
                bytes: encode(&image, encoding)?,
            }),
            Sink::Broadcast => {
                let payload = broadcast_payload(&image)?;
                let delivered = self.publish(payload);
                Emitted::Broadcast {
                    topic: self.topic.clone(),
                    delivered,
                }
            }
            Sink::Discard => Emitted::Discarded,
        };
        Ok(Dispatched {
            region_count,
            emitted,
        })
    }

    fn publish(&self, payload: Vec<u8>) -> bool {
        let len = payload.len();
        let outcome = match &self.broadcaster {
            Some(broadcaster) => broadcaster
                .publish(&self.topic, payload)
                .map_err(|e| DukerError::Publish(format!("{e:#}"))),
            None => Err(DukerError::Publish("no broadcast channel configured".into())),
        };
        match outcome {
            Ok(()) => {
                log::info!("broadcast {} bytes to {}", len, self.topic);
                true
            }
            Err(e) => {
                log::warn!("{} (topic {})", e, self.topic);
                false
            }
        }
    }
}

/// Encode `image` in the requested raster format.
pub fn encode(image: &RgbImage, encoding: Encoding) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, encoding.image_format())
        .map_err(|e| DukerError::Encode(e.to_string()))?;
    Ok(out.into_inner())
}

/// Base64 (standard alphabet) of the PNG encoding, as published on the broadcast topic.
pub fn broadcast_payload(image: &RgbImage) -> Result<Vec<u8>> {
    let png = encode(image, Encoding::Png)?;
    Ok(STANDARD.encode(png).into_bytes())
}
