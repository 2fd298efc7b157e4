//! HTTP front-end for the face service.
//!
//! Plain HTTP/1.1 over `std::net`, one request per connection, handled on
//! the server thread.

mod multipart;

pub use multipart::{MultipartError, Part};

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::DEFAULT_MAX_UPLOAD_BYTES;
use crate::dispatch::{Emitted, Encoding, Sink};
use crate::error::DukerError;
use crate::service::FaceService;
use crate::worker::JobQueue;

const MAX_HEADER_BYTES: usize = 16 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_upload_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    service: FaceService,
    queue: Option<Arc<dyn JobQueue>>,
}

impl ApiServer {
    /// `queue` backs `POST /queue`; without one that route answers 503.
    pub fn new(cfg: ApiConfig, service: FaceService, queue: Option<Arc<dyn JobQueue>>) -> Self {
        Self {
            cfg,
            service,
            queue,
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("duker-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, &self, shutdown_thread) {
                    log::error!("duker api stopped: {}", err);
                }
            })?;
        log::info!("duker api listening on http://{}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, server: &ApiServer, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, server) {
                    log::warn!("duker api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, server: &ApiServer) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let request = match read_request(&mut stream, server.cfg.max_upload_bytes)? {
        Ok(request) => request,
        Err(rejection) => {
            write_json_response(&mut stream, rejection.status, &error_body(rejection.code))?;
            return Err(anyhow!("{}", rejection.code));
        }
    };
    log::debug!(
        "{} {} ({} body bytes)",
        request.method,
        request.path,
        request.body.len()
    );

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => write_response(&mut stream, 200, "text/plain", b"Hello World!", &[]),
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("POST", "/duker") => duker(&mut stream, server, &request),
        ("POST", "/queue") => enqueue(&mut stream, server, &request),
        ("POST", "/detect") => detect(&mut stream, server, &request),
        (_, "/" | "/health" | "/duker" | "/queue" | "/detect") => {
            write_json_response(&mut stream, 405, &error_body("method_not_allowed"))
        }
        _ => write_json_response(&mut stream, 404, &error_body("not_found")),
    }
}

fn duker(stream: &mut TcpStream, server: &ApiServer, request: &HttpRequest) -> Result<()> {
    let Some(encoding) = Encoding::negotiate(request.header("accept")) else {
        return write_json_response(stream, 406, &error_body("not_acceptable"));
    };
    let Some(payload) = upload(stream, request)? else {
        return Ok(());
    };
    match server.service.handle(payload, Sink::Respond(encoding)) {
        Ok(dispatched) => {
            let Emitted::Body(body) = dispatched.emitted else {
                return Err(anyhow!("respond sink produced no body"));
            };
            write_response(
                stream,
                200,
                body.encoding.content_type(),
                &body.bytes,
                &[("X-Face-Count", dispatched.region_count.to_string())],
            )
        }
        Err(err) => write_pipeline_error(stream, err),
    }
}

fn enqueue(stream: &mut TcpStream, server: &ApiServer, request: &HttpRequest) -> Result<()> {
    let Some(queue) = server.queue.as_ref() else {
        return write_json_response(stream, 503, &error_body("queue_unavailable"));
    };
    let Some(payload) = upload(stream, request)? else {
        return Ok(());
    };
    if payload.is_empty() {
        return write_json_response(stream, 400, &error_body("empty_payload"));
    }
    match queue.enqueue(payload.to_vec()) {
        Ok(()) => {
            log::info!("queued {} bytes", payload.len());
            write_json_response(stream, 202, r#"{"status":"queued"}"#)
        }
        Err(err) => write_pipeline_error(stream, err),
    }
}

fn detect(stream: &mut TcpStream, server: &ApiServer, request: &HttpRequest) -> Result<()> {
    let Some(payload) = upload(stream, request)? else {
        return Ok(());
    };
    match server.service.handle(payload, Sink::Discard) {
        Ok(dispatched) => write_response(
            stream,
            204,
            "text/plain",
            &[],
            &[("X-Face-Count", dispatched.region_count.to_string())],
        ),
        Err(err) => write_pipeline_error(stream, err),
    }
}

/// Image bytes of an upload: the `file` part of a multipart form, or the raw body.
///
/// Writes the error response itself and returns `None` when the form is unusable.
fn upload<'a>(stream: &mut TcpStream, request: &'a HttpRequest) -> Result<Option<&'a [u8]>> {
    let Some(boundary) = request.header("content-type").and_then(multipart::boundary) else {
        return Ok(Some(request.body.as_slice()));
    };
    let parts = match multipart::parse(&request.body, &boundary) {
        Ok(parts) => parts,
        Err(err) => {
            log::warn!("rejected upload: {}", err);
            write_json_response(stream, 400, &error_body("malformed_multipart"))?;
            return Ok(None);
        }
    };
    match multipart::find_part(&parts, "file") {
        Some(part) => {
            log::debug!(
                "upload part {:?} ({}, {} bytes)",
                part.filename.as_deref().unwrap_or("-"),
                part.content_type.as_deref().unwrap_or("no content type"),
                part.data.len()
            );
            Ok(Some(part.data))
        }
        None => {
            write_json_response(stream, 400, &error_body("missing_file"))?;
            Ok(None)
        }
    }
}

fn write_pipeline_error(stream: &mut TcpStream, err: DukerError) -> Result<()> {
    let status = err.http_status();
    if status >= 500 {
        log::error!("request failed: {}", err);
    } else {
        log::warn!("request rejected: {}", err);
    }
    let body = serde_json::json!({
        "error": err.code(),
        "message": err.to_string(),
    });
    write_response(stream, status, "application/json", body.to_string().as_bytes(), &[])
}

struct Rejection {
    status: u16,
    code: &'static str,
}

fn reject(status: u16, code: &'static str) -> Result<std::result::Result<HttpRequest, Rejection>> {
    Ok(Err(Rejection { status, code }))
}

/// Outer `Err` for transport failures, inner `Err` for requests answered with an error status.
fn read_request(
    stream: &mut TcpStream,
    max_body_bytes: usize,
) -> Result<std::result::Result<HttpRequest, Rejection>> {
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return reject(431, "headers_too_large");
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(raw_path)) = (parts.next(), parts.next()) else {
        return reject(400, "bad_request");
    };
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let mut request = HttpRequest {
        method: method.to_string(),
        path: raw_path.split('?').next().unwrap_or(raw_path).to_string(),
        headers,
        body: Vec::new(),
    };

    if request.header("transfer-encoding").is_some() {
        return reject(411, "length_required");
    }
    let content_length = match request.header("content-length") {
        None => 0,
        Some(value) => match value.parse::<usize>() {
            Ok(len) => len,
            Err(_) => return reject(400, "bad_content_length"),
        },
    };
    if content_length > max_body_bytes {
        return reject(413, "payload_too_large");
    }

    let mut body = data.split_off(header_end + 4);
    if body.len() < content_length
        && request
            .header("expect")
            .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
    {
        stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
    }
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!(
                "connection closed after {} of {} body bytes",
                body.len(),
                content_length
            ));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);
    request.body = body;
    Ok(Ok(request))
}

fn error_body(code: &str) -> String {
    serde_json::json!({ "error": code }).to_string()
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes(), &[])
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
    extra_headers: &[(&str, String)],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        202 => "HTTP/1.1 202 Accepted",
        204 => "HTTP/1.1 204 No Content",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        406 => "HTTP/1.1 406 Not Acceptable",
        411 => "HTTP/1.1 411 Length Required",
        413 => "HTTP/1.1 413 Payload Too Large",
        431 => "HTTP/1.1 431 Request Header Fields Too Large",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let mut header = format!("{status_line}\r\n");
    if status != 204 {
        header.push_str(&format!(
            "Content-Type: {content_type}\r\nContent-Length: {}\r\n",
            body.len()
        ));
    }
    for (name, value) in extra_headers {
        header.push_str(&format!("{name}: {value}\r\n"));
    }
    header.push_str("Cache-Control: no-store\r\nConnection: close\r\n\r\n");
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}
