//! Shared test helpers for ocrtap-core integration tests.
//!
//! [`mock_wda`] stands up a small HTTP server that behaves like
//! WebDriverAgent: it hands out session ids, rejects stale ones with
//! `invalid session id`, serves a PNG screenshot and records every request.
//! Individual routes can be overridden, and the current session can be
//! expired on demand to exercise session recreation.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use base64::Engine;
use image::{DynamicImage, ImageFormat, RgbImage};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use ocrtap_core::element::Frame;
use ocrtap_core::ocr::{OcrEngine, OcrError, TextMatch};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A white PNG of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255])));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

pub fn text_at(text: &str, x: f64, y: f64, w: f64, h: f64) -> TextMatch {
    TextMatch::new(text, Frame::new(x, y, w, h), 0.9)
}

/// OCR engine returning canned results: each call takes the next frame,
/// and the last frame repeats.
pub struct FixedOcr {
    frames: Mutex<Vec<Vec<TextMatch>>>,
    calls: AtomicUsize,
}

impl FixedOcr {
    pub fn new(matches: Vec<TextMatch>) -> Self {
        Self::sequence(vec![matches])
    }

    pub fn sequence(frames: Vec<Vec<TextMatch>>) -> Self {
        Self {
            frames: Mutex::new(frames),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrEngine for FixedOcr {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn recognize(&self, _image: &DynamicImage) -> Result<Vec<TextMatch>, OcrError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let frames = self.frames.lock().unwrap();
        let index = n.min(frames.len().saturating_sub(1));
        Ok(frames.get(index).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Mock WebDriverAgent
// ---------------------------------------------------------------------------

/// One request the mock received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Value,
}

impl RecordedRequest {
    /// Path with the `/session/<id>` prefix removed, e.g. `/wda/tap/0`.
    pub fn route(&self) -> String {
        match self.path.strip_prefix("/session/") {
            Some(rest) => match rest.find('/') {
                Some(i) => rest[i..].to_string(),
                None => String::new(),
            },
            None => self.path.clone(),
        }
    }

    pub fn session(&self) -> Option<String> {
        let rest = self.path.strip_prefix("/session/")?;
        Some(rest.split('/').next().unwrap_or_default().to_string())
    }
}

pub struct MockState {
    requests: Mutex<Vec<RecordedRequest>>,
    sessions_created: AtomicUsize,
    current_session: Mutex<Option<String>>,
    overrides: Mutex<HashMap<String, (u16, Value)>>,
    screenshot_b64: String,
    window: (f64, f64),
    ready: Mutex<bool>,
}

/// Handle to a running mock.
#[derive(Clone)]
pub struct MockWda {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockWda {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Requests whose session-relative route equals `route`.
    pub fn requests_to(&self, route: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.route() == route)
            .collect()
    }

    pub fn sessions_created(&self) -> usize {
        self.state.sessions_created.load(Ordering::SeqCst)
    }

    pub fn current_session(&self) -> Option<String> {
        self.state.current_session.lock().unwrap().clone()
    }

    /// Forgets the current session, as if WDA restarted.
    pub fn expire_session(&self) {
        *self.state.current_session.lock().unwrap() = None;
    }

    /// Replies to `"<METHOD> <route>"` (session prefix stripped) with a
    /// fixed status and `value`.
    pub fn respond(&self, key: &str, status: u16, value: Value) {
        self.state
            .overrides
            .lock()
            .unwrap()
            .insert(key.to_string(), (status, value));
    }

    pub fn set_ready(&self, ready: bool) {
        *self.state.ready.lock().unwrap() = ready;
    }
}

/// Starts a mock WDA with a `px_width` x `px_height` screenshot and a
/// window of `window` points.
pub async fn mock_wda(px_width: u32, px_height: u32, window: (f64, f64)) -> MockWda {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(MockState {
        requests: Mutex::new(Vec::new()),
        sessions_created: AtomicUsize::new(0),
        current_session: Mutex::new(None),
        overrides: Mutex::new(HashMap::new()),
        screenshot_b64: base64::engine::general_purpose::STANDARD.encode(png_bytes(px_width, px_height)),
        window,
        ready: Mutex::new(true),
    });

    let server_state = Arc::clone(&state);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let state = Arc::clone(&server_state);
            tokio::spawn(async move {
                let _ = handle_connection(stream, state).await;
            });
        }
    });

    MockWda { addr, state }
}

async fn handle_connection(stream: TcpStream, state: Arc<MockState>) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);
    loop {
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).await? == 0 {
            return Ok(());
        }
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let path = parts.next().unwrap_or_default().to_string();

        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await?;
            if line == "\r\n" || line.is_empty() {
                break;
            }
            let lower = line.to_ascii_lowercase();
            if let Some(v) = lower.strip_prefix("content-length:") {
                content_length = v.trim().parse().unwrap_or(0);
            }
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).await?;
        let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

        let request = RecordedRequest { method, path, body };
        state.requests.lock().unwrap().push(request.clone());
        let (status, payload) = route(&state, &request);

        let text = payload.to_string();
        let response = format!(
            "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{text}",
            text.len()
        );
        let stream = reader.get_mut();
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await?;
    }
}

fn invalid_session() -> (u16, Value) {
    (
        404,
        json!({
            "value": { "error": "invalid session id", "message": "Session does not exist" },
            "sessionId": null
        }),
    )
}

fn route(state: &MockState, req: &RecordedRequest) -> (u16, Value) {
    let key = format!("{} {}", req.method, req.route());
    if let Some((status, value)) = state.overrides.lock().unwrap().get(&key).cloned() {
        return (status, json!({ "value": value, "sessionId": req.session() }));
    }

    match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/status") => {
            let ready = *state.ready.lock().unwrap();
            return (
                200,
                json!({
                    "value": {
                        "ready": ready,
                        "message": if ready { "WebDriverAgent is ready to accept commands" } else { "not ready" },
                        "state": if ready { "success" } else { "starting" },
                        "os": { "name": "iOS", "version": "17.4" },
                        "ios": { "ip": "192.168.1.20" }
                    },
                    "sessionId": null
                }),
            );
        }
        ("POST", "/session") => {
            let n = state.sessions_created.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("session-{n}");
            *state.current_session.lock().unwrap() = Some(id.clone());
            return (
                200,
                json!({ "value": { "sessionId": id, "capabilities": {} }, "sessionId": id }),
            );
        }
        ("GET", "/screenshot") => {
            return (200, json!({ "value": state.screenshot_b64, "sessionId": null }));
        }
        ("POST", "/wda/homescreen") => return (200, json!({ "value": null })),
        _ => {}
    }

    let Some(session) = req.session() else {
        return (404, json!({ "value": { "error": "unknown command", "message": req.path } }));
    };
    if state.current_session.lock().unwrap().as_deref() != Some(session.as_str()) {
        return invalid_session();
    }

    let value = match (req.method.as_str(), req.route().as_str()) {
        ("DELETE", "") => {
            *state.current_session.lock().unwrap() = None;
            Value::Null
        }
        ("GET", "/window/size") => json!({ "width": state.window.0, "height": state.window.1 }),
        ("GET", "/screenshot") => json!(state.screenshot_b64),
        ("GET", "/wda/activeAppInfo") => json!({
            "bundleId": "com.apple.Preferences",
            "name": "Settings",
            "pid": 312
        }),
        ("GET", "/source") => json!("<XCUIElementTypeApplication name=\"Settings\"/>"),
        ("POST", "/element") => {
            return (
                404,
                json!({
                    "value": { "error": "no such element", "message": "unable to find element" },
                    "sessionId": session
                }),
            );
        }
        ("POST", "/elements") => json!([]),
        ("GET", "/wda/locked") => json!(false),
        _ => Value::Null,
    };
    (200, json!({ "value": value, "sessionId": session }))
}
