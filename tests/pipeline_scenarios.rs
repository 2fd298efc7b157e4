use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{Rgb, RgbImage};

use duker::dispatch::encode;
use duker::transform::{BLACK, RED, WHITE};
use duker::worker::WorkerConfig;
use duker::{
    decode, Broadcaster, DetectorBuilder, Dispatcher, DukerError, Emitted, Encoding, FaceService,
    JobQueue, Region, Sink, StubDetector, WorkerPool,
};

#[derive(Default)]
struct Recorder {
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl Broadcaster for Recorder {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> anyhow::Result<()> {
        self.published
            .lock()
            .map_err(|_| anyhow!("recorder lock poisoned"))?
            .push((topic.to_string(), payload));
        Ok(())
    }
}

struct BrokerDown;

impl Broadcaster for BrokerDown {
    fn publish(&self, _topic: &str, _payload: Vec<u8>) -> anyhow::Result<()> {
        Err(anyhow!("connection refused"))
    }
}

fn service(regions: Vec<Region>) -> FaceService {
    FaceService::with_detector(Arc::new(StubDetector::new(regions)))
}

fn gray_png(width: u32, height: u32) -> Vec<u8> {
    encode(
        &RgbImage::from_pixel(width, height, Rgb([120, 120, 120])),
        Encoding::Png,
    )
    .unwrap()
}

#[test]
fn reference_square_on_100x100() {
    let dispatched = service(vec![Region::new(10, 10, 20, 20)])
        .handle(&gray_png(100, 100), Sink::Respond(Encoding::Png))
        .unwrap();
    assert_eq!(dispatched.region_count, 1);
    let Emitted::Body(body) = dispatched.emitted else {
        panic!("expected a body");
    };
    let out = decode(&body.bytes).unwrap();
    assert_eq!(out.dimensions(), (100, 100));

    for y in 10..20 {
        for x in 10..30 {
            if (x as i64 - 20).pow(2) + (y as i64 - 20).pow(2) > 16 {
                assert_eq!(*out.get_pixel(x, y), BLACK, "({x}, {y}) should be black");
            }
        }
    }
    for y in 20..30 {
        for x in 10..30 {
            if (x as i64 - 20).pow(2) + (y as i64 - 20).pow(2) > 16 {
                assert_eq!(*out.get_pixel(x, y), WHITE, "({x}, {y}) should be white");
            }
        }
    }
    assert_eq!(*out.get_pixel(20, 20), RED);
    assert_eq!(*out.get_pixel(23, 20), RED);
    assert_eq!(*out.get_pixel(20, 17), RED);
    assert_eq!(*out.get_pixel(9, 9), Rgb([120, 120, 120]));
    assert_eq!(*out.get_pixel(30, 30), Rgb([120, 120, 120]));
}

#[test]
fn unreadable_classifier_is_detector_unavailable() {
    let err = DetectorBuilder::new()
        .classifier_file("/nonexistent/haarcascade.bin")
        .build()
        .err()
        .expect("build must fail");
    assert!(matches!(err, DukerError::DetectorUnavailable { .. }));
    assert!(err.to_string().contains("/nonexistent/haarcascade.bin"));
}

#[test]
fn broadcast_with_broker_down_still_succeeds() {
    let service = service(vec![Region::new(0, 0, 8, 8)])
        .with_dispatcher(Dispatcher::new().with_broadcaster(Arc::new(BrokerDown)));
    let dispatched = service.handle(&gray_png(16, 16), Sink::Broadcast).unwrap();
    assert_eq!(dispatched.region_count, 1);
    assert_eq!(
        dispatched.emitted,
        Emitted::Broadcast {
            topic: "topic/faces".into(),
            delivered: false
        }
    );
}

#[test]
fn jpeg_and_bmp_inputs_are_accepted() {
    let image = RgbImage::from_pixel(24, 24, Rgb([10, 200, 10]));
    for encoding in [Encoding::Jpeg, Encoding::Bmp] {
        let payload = encode(&image, encoding).unwrap();
        let dispatched = service(vec![Region::new(2, 2, 12, 12)])
            .handle(&payload, Sink::Respond(Encoding::Bmp))
            .unwrap();
        let Emitted::Body(body) = dispatched.emitted else {
            panic!("expected a body");
        };
        assert_eq!(body.encoding, Encoding::Bmp);
        assert_eq!(*decode(&body.bytes).unwrap().get_pixel(2, 2), BLACK);
    }
}

#[test]
fn worker_pool_broadcasts_queued_jobs() {
    let recorder = Arc::new(Recorder::default());
    let dispatcher = Dispatcher::new()
        .with_broadcaster(recorder.clone())
        .with_topic("faces/test");
    let cfg = WorkerConfig {
        workers: 2,
        queue_capacity: 8,
    };
    let pool = WorkerPool::spawn(cfg, |_| {
        Ok(service(vec![Region::new(4, 4, 16, 16)]).with_dispatcher(dispatcher.clone()))
    })
    .unwrap();

    let sender = pool.sender().unwrap();
    for _ in 0..3 {
        sender.enqueue(gray_png(32, 32)).unwrap();
    }
    sender.enqueue(b"not an image".to_vec()).unwrap();
    drop(sender);

    let deadline = Instant::now() + Duration::from_secs(10);
    while recorder.published.lock().unwrap().len() < 3 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    pool.shutdown().unwrap();

    let published = recorder.published.lock().unwrap();
    assert_eq!(published.len(), 3);
    for (topic, payload) in published.iter() {
        assert_eq!(topic, "faces/test");
        let png = STANDARD.decode(payload).unwrap();
        let image = decode(&png).unwrap();
        assert_eq!(*image.get_pixel(4, 4), BLACK);
    }
}

#[test]
fn full_queue_rejects_jobs() {
    struct Blocking(Mutex<()>);
    impl duker::RegionDetector for Blocking {
        fn name(&self) -> &'static str {
            "blocking"
        }
        fn detect(&self, _image: &RgbImage) -> duker::Result<Vec<Region>> {
            let _held = self.0.lock().map_err(|_| DukerError::Detection("poisoned".into()))?;
            Ok(Vec::new())
        }
    }

    let detector = Arc::new(Blocking(Mutex::new(())));
    let gate = detector.0.lock().unwrap();
    let cfg = WorkerConfig {
        workers: 1,
        queue_capacity: 1,
    };
    let shared = detector.clone();
    let pool =
        WorkerPool::spawn(cfg, move |_| Ok(FaceService::with_detector(shared.clone()))).unwrap();
    let sender = pool.sender().unwrap();

    // The first job occupies the worker, the second fills the queue.
    sender.enqueue(gray_png(8, 8)).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut rejected = false;
    while Instant::now() < deadline {
        match sender.enqueue(gray_png(8, 8)) {
            Ok(()) => std::thread::sleep(Duration::from_millis(10)),
            Err(DukerError::QueueFull) => {
                rejected = true;
                break;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(rejected, "queue never reported full");

    drop(gate);
    drop(sender);
    pool.shutdown().unwrap();
}
