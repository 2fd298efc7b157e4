use anyhow::Result;
use image::{Rgb, RgbImage};
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use duker::api::{ApiConfig, ApiHandle, ApiServer};
use duker::dispatch::encode;
use duker::transform::{BLACK, WHITE};
use duker::{decode, DukerError, Encoding, FaceService, JobQueue, Region, StubDetector};

const BOUNDARY: &str = "------------------------dukerTestBoundary";

#[derive(Default)]
struct RecordingQueue {
    jobs: Mutex<Vec<Vec<u8>>>,
    full: bool,
}

impl JobQueue for RecordingQueue {
    fn enqueue(&self, payload: Vec<u8>) -> std::result::Result<(), DukerError> {
        if self.full {
            return Err(DukerError::QueueFull);
        }
        self.jobs
            .lock()
            .map_err(|_| DukerError::QueueClosed)?
            .push(payload);
        Ok(())
    }
}

struct TestApi {
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new(queue: Option<Arc<dyn JobQueue>>) -> Result<Self> {
        Self::with_limit(queue, ApiConfig::default().max_upload_bytes)
    }

    fn with_limit(queue: Option<Arc<dyn JobQueue>>, max_upload_bytes: usize) -> Result<Self> {
        let service =
            FaceService::with_detector(Arc::new(StubDetector::new(vec![Region::new(0, 0, 8, 8)])));
        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            max_upload_bytes,
        };
        let api_handle = ApiServer::new(api_config, service, queue).spawn()?;
        Ok(Self {
            api_handle: Some(api_handle),
        })
    }

    fn connect(&self) -> Result<TcpStream> {
        let handle = self
            .api_handle
            .as_ref()
            .expect("test API handle should be initialized");
        Ok(TcpStream::connect(handle.addr)?)
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    encode(
        &RgbImage::from_pixel(width, height, Rgb([90, 90, 90])),
        Encoding::Png,
    )
    .unwrap()
}

fn multipart_body(field: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"face.png\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn post(path: &str, extra_headers: &str, body: &[u8]) -> Vec<u8> {
    let mut request = format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n{extra_headers}\r\n",
        body.len()
    )
    .into_bytes();
    request.extend_from_slice(body);
    request
}

fn send(api: &TestApi, request: &[u8]) -> Result<(String, Vec<u8>)> {
    let mut stream = api.connect()?;
    stream.write_all(request)?;
    read_response(&mut stream)
}

fn read_response(stream: &mut TcpStream) -> Result<(String, Vec<u8>)> {
    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;
    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .unwrap_or(response.len());
    let headers = String::from_utf8_lossy(&response[..split]).to_string();
    let body = response.get(split + 4..).unwrap_or_default().to_vec();
    Ok((headers, body))
}

#[test]
fn root_says_hello() -> Result<()> {
    let api = TestApi::new(None)?;
    let (headers, body) = send(&api, b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("200 OK"));
    assert_eq!(body, b"Hello World!");
    Ok(())
}

#[test]
fn health_endpoint_reports_ok() -> Result<()> {
    let api = TestApi::new(None)?;
    let (headers, body) = send(&api, b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("200 OK"));
    let value: Value = serde_json::from_slice(&body)?;
    assert_eq!(value["status"], "ok");
    Ok(())
}

#[test]
fn multipart_upload_returns_masked_png() -> Result<()> {
    let api = TestApi::new(None)?;
    let body = multipart_body("file", &png(32, 32));
    let content_type = format!("Content-Type: multipart/form-data; boundary={BOUNDARY}\r\n");
    let (headers, body) = send(&api, &post("/duker", &content_type, &body))?;

    assert!(headers.contains("200 OK"), "{headers}");
    assert!(headers.contains("Content-Type: image/png"));
    assert!(headers.contains("X-Face-Count: 1"));
    let image = decode(&body)?;
    assert_eq!(image.dimensions(), (32, 32));
    assert_eq!(*image.get_pixel(0, 0), BLACK);
    assert_eq!(*image.get_pixel(0, 7), WHITE);
    Ok(())
}

#[test]
fn raw_body_upload_honours_accept() -> Result<()> {
    let api = TestApi::new(None)?;
    let request = post(
        "/duker",
        "Content-Type: image/png\r\nAccept: image/jpeg;q=0.4, image/bmp\r\n",
        &png(16, 16),
    );
    let (headers, body) = send(&api, &request)?;
    assert!(headers.contains("200 OK"));
    assert!(headers.contains("Content-Type: image/bmp"));
    assert_eq!(&body[..2], b"BM");
    Ok(())
}

#[test]
fn unacceptable_accept_is_406() -> Result<()> {
    let api = TestApi::new(None)?;
    let request = post("/duker", "Accept: application/json\r\n", &png(8, 8));
    let (headers, body) = send(&api, &request)?;
    assert!(headers.contains("406 Not Acceptable"));
    let value: Value = serde_json::from_slice(&body)?;
    assert_eq!(value["error"], "not_acceptable");
    Ok(())
}

#[test]
fn undecodable_upload_is_400() -> Result<()> {
    let api = TestApi::new(None)?;
    let (headers, body) = send(&api, &post("/duker", "", b"this is not an image"))?;
    assert!(headers.contains("400 Bad Request"));
    let value: Value = serde_json::from_slice(&body)?;
    assert_eq!(value["error"], "decode_error");
    Ok(())
}

#[test]
fn multipart_without_file_part_is_400() -> Result<()> {
    let api = TestApi::new(None)?;
    let body = multipart_body("avatar", &png(8, 8));
    let content_type = format!("Content-Type: multipart/form-data; boundary={BOUNDARY}\r\n");
    let (headers, body) = send(&api, &post("/duker", &content_type, &body))?;
    assert!(headers.contains("400 Bad Request"));
    let value: Value = serde_json::from_slice(&body)?;
    assert_eq!(value["error"], "missing_file");
    Ok(())
}

#[test]
fn detect_discards_and_reports_count() -> Result<()> {
    let api = TestApi::new(None)?;
    let (headers, body) = send(&api, &post("/detect", "", &png(12, 12)))?;
    assert!(headers.contains("204 No Content"));
    assert!(headers.contains("X-Face-Count: 1"));
    assert!(body.is_empty());
    Ok(())
}

#[test]
fn queue_accepts_job() -> Result<()> {
    let queue = Arc::new(RecordingQueue::default());
    let api = TestApi::new(Some(queue.clone() as Arc<dyn JobQueue>))?;
    let payload = png(10, 10);
    let body = multipart_body("file", &payload);
    let content_type = format!("Content-Type: multipart/form-data; boundary={BOUNDARY}\r\n");
    let (headers, body) = send(&api, &post("/queue", &content_type, &body))?;

    assert!(headers.contains("202 Accepted"));
    let value: Value = serde_json::from_slice(&body)?;
    assert_eq!(value["status"], "queued");
    assert_eq!(*queue.jobs.lock().unwrap(), vec![payload]);
    Ok(())
}

#[test]
fn queue_full_or_absent_is_503() -> Result<()> {
    let full = Arc::new(RecordingQueue {
        full: true,
        ..RecordingQueue::default()
    });
    let api = TestApi::new(Some(full as Arc<dyn JobQueue>))?;
    let (headers, body) = send(&api, &post("/queue", "", &png(4, 4)))?;
    assert!(headers.contains("503 Service Unavailable"));
    let value: Value = serde_json::from_slice(&body)?;
    assert_eq!(value["error"], "queue_full");
    drop(api);

    let api = TestApi::new(None)?;
    let (headers, _) = send(&api, &post("/queue", "", &png(4, 4)))?;
    assert!(headers.contains("503 Service Unavailable"));
    Ok(())
}

#[test]
fn oversized_upload_is_413() -> Result<()> {
    let api = TestApi::with_limit(None, 1024)?;
    let request = "POST /duker HTTP/1.1\r\nHost: localhost\r\nContent-Length: 4096\r\n\r\n";
    let (headers, _) = send(&api, request.as_bytes())?;
    assert!(headers.contains("413 Payload Too Large"));
    Ok(())
}

#[test]
fn expect_continue_is_answered_before_body() -> Result<()> {
    let api = TestApi::new(None)?;
    let payload = png(8, 8);
    let mut stream = api.connect()?;
    let head = format!(
        "POST /detect HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\nExpect: 100-continue\r\n\r\n",
        payload.len()
    );
    stream.write_all(head.as_bytes())?;

    let interim = b"HTTP/1.1 100 Continue\r\n\r\n";
    let mut buf = vec![0u8; interim.len()];
    stream.read_exact(&mut buf)?;
    assert_eq!(buf, interim);

    stream.write_all(&payload)?;
    let (headers, _) = read_response(&mut stream)?;
    assert!(headers.contains("204 No Content"));
    Ok(())
}

#[test]
fn unknown_route_and_wrong_method() -> Result<()> {
    let api = TestApi::new(None)?;
    let (headers, _) = send(&api, b"GET /missing HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("404 Not Found"));
    let (headers, _) = send(&api, b"GET /duker HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("405 Method Not Allowed"));
    Ok(())
}
