use std::sync::Arc;

use image::RgbImage;

use crate::detect::RegionDetector;
use crate::dispatch::{Dispatched, Dispatcher, Sink};
use crate::error::{DukerError, Result};
use crate::pipeline::DetectionPipeline;
use crate::transform::DukeMask;

/// Decode → detect → transform → dispatch.
///
/// Every entry path (HTTP upload, queued payload, pass-through) goes through
/// [`FaceService::handle`]; the sink is the only thing that differs.
#[derive(Clone)]
pub struct FaceService {
    pipeline: DetectionPipeline,
    dispatcher: Dispatcher,
}

impl FaceService {
    pub fn new(pipeline: DetectionPipeline, dispatcher: Dispatcher) -> Self {
        Self {
            pipeline,
            dispatcher,
        }
    }

    /// Service that masks faces with [`DukeMask`] and has no broadcast channel.
    pub fn with_detector(detector: Arc<dyn RegionDetector>) -> Self {
        Self::new(
            DetectionPipeline::new(detector, Arc::new(DukeMask)),
            Dispatcher::new(),
        )
    }

    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn pipeline(&self) -> &DetectionPipeline {
        &self.pipeline
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Decode an encoded image payload and run it to `sink`.
    pub fn handle(&self, payload: &[u8], sink: Sink) -> Result<Dispatched> {
        let image = decode(payload)?;
        self.handle_image(image, sink)
    }

    pub fn handle_image(&self, image: RgbImage, sink: Sink) -> Result<Dispatched> {
        let result = self.pipeline.run(image)?;
        self.dispatcher.dispatch(result, sink)
    }
}

/// Decode any supported raster format into an owned RGB buffer.
pub fn decode(payload: &[u8]) -> Result<RgbImage> {
    if payload.is_empty() {
        return Err(DukerError::Decode("empty payload".into()));
    }
    let image = image::load_from_memory(payload).map_err(|e| DukerError::Decode(e.to_string()))?;
    if image.width() == 0 || image.height() == 0 {
        return Err(DukerError::Decode("image dimensions are zero".into()));
    }
    Ok(image.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Region, StubDetector};
    use crate::dispatch::{encode, Emitted, Encoding};
    use crate::transform::{BLACK, RED};

    fn service(regions: Vec<Region>) -> FaceService {
        FaceService::with_detector(Arc::new(StubDetector::new(regions)))
    }

    #[test]
    fn handle_masks_and_responds() {
        let input = encode(&RgbImage::new(60, 60), Encoding::Png).unwrap();
        let dispatched = service(vec![Region::new(10, 10, 24, 24)])
            .handle(&input, Sink::Respond(Encoding::Png))
            .unwrap();
        assert_eq!(dispatched.region_count, 1);

        let Emitted::Body(body) = dispatched.emitted else {
            panic!("expected a body");
        };
        let output = decode(&body.bytes).unwrap();
        assert_eq!(*output.get_pixel(10, 10), BLACK);
        assert_eq!(*output.get_pixel(22, 22), RED);
    }

    #[test]
    fn garbage_payload_is_a_decode_error() {
        let err = service(vec![])
            .handle(b"definitely not an image", Sink::Discard)
            .unwrap_err();
        assert!(matches!(err, DukerError::Decode(_)));
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn empty_payload_is_a_decode_error() {
        let err = service(vec![]).handle(&[], Sink::Discard).unwrap_err();
        assert!(matches!(err, DukerError::Decode(_)));
    }

    #[test]
    fn pass_through_discards() {
        let input = encode(&RgbImage::new(8, 8), Encoding::Bmp).unwrap();
        let dispatched = service(vec![Region::new(0, 0, 4, 4)])
            .handle(&input, Sink::Discard)
            .unwrap();
        assert_eq!(dispatched.emitted, Emitted::Discarded);
        assert_eq!(dispatched.region_count, 1);
    }
}
