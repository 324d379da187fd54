//! In-memory driver and OCR fakes for unit tests.

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};

use crate::driver::{AutomationDriver, DriverError};
use crate::element::{ElementRef, Frame, Size};
use crate::ocr::{OcrEngine, OcrError, TextMatch};
use crate::protocol::{ActiveApp, ButtonName, Locator, WdaStatus};

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255])));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png).unwrap();
    out
}

/// Records every gesture as a short string, e.g. `tap 10,20`.
pub struct FakeDriver {
    pub calls: Mutex<Vec<String>>,
    pub window: Size,
    screenshot: Vec<u8>,
    screenshot_failures: AtomicUsize,
    labels: HashMap<String, ElementRef>,
    pub active_bundle: Mutex<String>,
}

impl FakeDriver {
    /// A 3x display: 300x600 pixel screenshots, 100x200 point window.
    pub fn new() -> Self {
        Self::with_screen(300, 600, Size { width: 100.0, height: 200.0 })
    }

    pub fn with_screen(px_width: u32, px_height: u32, window: Size) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            window,
            screenshot: png_bytes(px_width, px_height),
            screenshot_failures: AtomicUsize::new(0),
            labels: HashMap::new(),
            active_bundle: Mutex::new("com.apple.springboard".into()),
        }
    }

    /// The next `n` screenshots fail with a connection error.
    pub fn fail_screenshots(self, n: usize) -> Self {
        self.screenshot_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_label(mut self, label: &str, id: &str) -> Self {
        self.labels.insert(label.to_string(), ElementRef(id.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than screenshots and window size queries.
    pub fn actions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c != "screenshot" && c != "window_size")
            .collect()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl AutomationDriver for FakeDriver {
    async fn connect(&self) -> Result<(), DriverError> {
        self.record("connect");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn status(&self) -> Result<WdaStatus, DriverError> {
        Ok(WdaStatus {
            ready: true,
            message: None,
            ios_version: Some("17.4".into()),
            ip: None,
        })
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        self.record("disconnect");
        Ok(())
    }

    async fn tap_location(&self, x: i32, y: i32) -> Result<(), DriverError> {
        self.record(format!("tap {x},{y}"));
        Ok(())
    }

    async fn double_tap(&self, x: i32, y: i32) -> Result<(), DriverError> {
        self.record(format!("double_tap {x},{y}"));
        Ok(())
    }

    async fn long_press(&self, x: i32, y: i32, duration: f64) -> Result<(), DriverError> {
        self.record(format!("long_press {x},{y} {duration}"));
        Ok(())
    }

    async fn swipe(&self, sx: i32, sy: i32, ex: i32, ey: i32, duration: f64) -> Result<(), DriverError> {
        self.record(format!("swipe {sx},{sy}->{ex},{ey} {duration}"));
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), DriverError> {
        self.record(format!("type {text}"));
        Ok(())
    }

    async fn press_button(&self, button: ButtonName) -> Result<(), DriverError> {
        self.record(format!("press {button}"));
        Ok(())
    }

    async fn home(&self) -> Result<(), DriverError> {
        self.record("home");
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        self.record("screenshot");
        let failures = self.screenshot_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.screenshot_failures.store(failures - 1, Ordering::SeqCst);
            return Err(DriverError::ConnectionLost("screenshot refused".into()));
        }
        Ok(self.screenshot.clone())
    }

    async fn window_size(&self) -> Result<Size, DriverError> {
        self.record("window_size");
        Ok(self.window)
    }

    async fn launch_app(&self, bundle_id: &str) -> Result<(), DriverError> {
        self.record(format!("launch {bundle_id}"));
        *self.active_bundle.lock().unwrap() = bundle_id.to_string();
        Ok(())
    }

    async fn terminate_app(&self, bundle_id: &str) -> Result<(), DriverError> {
        self.record(format!("terminate {bundle_id}"));
        Ok(())
    }

    async fn active_app(&self) -> Result<ActiveApp, DriverError> {
        Ok(ActiveApp {
            bundle_id: self.active_bundle.lock().unwrap().clone(),
            name: None,
            pid: None,
        })
    }

    async fn find_element(&self, using: Locator, value: &str) -> Result<Option<ElementRef>, DriverError> {
        self.record(format!("find {} {value}", using.as_str()));
        Ok(self.labels.get(value).cloned())
    }

    async fn find_elements(&self, _using: Locator, value: &str) -> Result<Vec<ElementRef>, DriverError> {
        Ok(self.labels.get(value).cloned().into_iter().collect())
    }

    async fn element_click(&self, element: &ElementRef) -> Result<(), DriverError> {
        self.record(format!("click {element}"));
        Ok(())
    }

    async fn element_text(&self, _element: &ElementRef) -> Result<String, DriverError> {
        Ok(String::new())
    }

    async fn element_rect(&self, _element: &ElementRef) -> Result<Frame, DriverError> {
        Ok(Frame::new(0.0, 0.0, 10.0, 10.0))
    }

    async fn page_source(&self) -> Result<String, DriverError> {
        Ok("<XCUIElementTypeApplication/>".into())
    }

    async fn set_clipboard(&self, _text: &str) -> Result<(), DriverError> {
        Ok(())
    }

    async fn get_clipboard(&self) -> Result<String, DriverError> {
        Ok(String::new())
    }

    async fn lock(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn unlock(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn is_locked(&self) -> Result<bool, DriverError> {
        Ok(false)
    }
}

/// Returns queued results in order; the last one repeats.
pub struct ScriptedOcr {
    frames: Mutex<VecDeque<Vec<TextMatch>>>,
    last: Mutex<Vec<TextMatch>>,
    pub runs: AtomicUsize,
}

impl ScriptedOcr {
    pub fn new(frames: Vec<Vec<TextMatch>>) -> Self {
        Self {
            frames: Mutex::new(frames.into()),
            last: Mutex::new(Vec::new()),
            runs: AtomicUsize::new(0),
        }
    }

    pub fn fixed(matches: Vec<TextMatch>) -> Self {
        Self::new(vec![matches])
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl OcrEngine for ScriptedOcr {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn recognize(&self, _image: &DynamicImage) -> Result<Vec<TextMatch>, OcrError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.frames.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(last.clone())
    }
}

/// Always fails as if the engine were not installed.
pub struct MissingOcr;

impl OcrEngine for MissingOcr {
    fn name(&self) -> &'static str {
        "missing"
    }

    fn recognize(&self, _image: &DynamicImage) -> Result<Vec<TextMatch>, OcrError> {
        Err(OcrError::EngineUnavailable("not installed".into()))
    }
}

pub fn text(text: &str, x: f64, y: f64, w: f64, h: f64) -> TextMatch {
    TextMatch::new(text, Frame::new(x, y, w, h), 0.9)
}
