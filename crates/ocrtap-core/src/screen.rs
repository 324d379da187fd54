//! Screenshot + OCR with a one-snapshot cache.
//!
//! [`ScreenReader`] owns the pixel side of automation: it captures the
//! screen through an [`AutomationDriver`], runs the current [`OcrEngine`] on
//! a blocking thread and keeps the latest [`Snapshot`] so that several
//! lookups can share one OCR pass.
//!
//! OCR boxes are in screenshot pixels while WDA gestures take points; see
//! [`ScreenReader::tap_point`] for the conversion.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use image::DynamicImage;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::driver::{AutomationDriver, DriverError};
use crate::ocr::{self, OcrEngine, OcrError, TextMatch, TextQuery};

/// Default [`ScreenReader::wait_for_text`] timeout.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors from OCR-driven automation.
#[derive(Error, Debug)]
pub enum AutomationError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Ocr(#[from] OcrError),

    /// No recognised text matched.
    #[error("text {0} not found on screen")]
    TextNotFound(String),

    /// Polling gave up.
    #[error("timed out after {elapsed_ms}ms waiting for text {query}{}", last_error_suffix(.last_error))]
    Timeout {
        query: String,
        elapsed_ms: u64,
        last_error: Option<String>,
    },

    /// A native element lookup found nothing.
    #[error("element with label '{0}' not found")]
    ElementNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(" (last error: {e})"),
        None => String::new(),
    }
}

impl From<image::ImageError> for AutomationError {
    fn from(err: image::ImageError) -> Self {
        AutomationError::Ocr(OcrError::Image(err))
    }
}

impl AutomationError {
    /// Whether polling should keep going after this error.
    ///
    /// A missing OCR engine or bad input will not fix itself; everything
    /// else (dropped connections, expired sessions, a failed OCR run) might.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            AutomationError::Ocr(OcrError::EngineUnavailable(_))
                | AutomationError::Ocr(OcrError::Unsupported(_))
                | AutomationError::InvalidArgument(_)
        )
    }
}

/// One captured screen and what OCR found on it.
#[derive(Debug)]
pub struct Snapshot {
    pub image: DynamicImage,
    /// The PNG exactly as WDA returned it.
    pub png: Vec<u8>,
    pub matches: Vec<TextMatch>,
}

/// Captures the screen and finds text on it.
pub struct ScreenReader {
    driver: Arc<dyn AutomationDriver>,
    engine: RwLock<Arc<dyn OcrEngine>>,
    snapshot: Mutex<Option<Arc<Snapshot>>>,
    scale_override: Option<f64>,
    detected_scale: Mutex<Option<f64>>,
}

impl ScreenReader {
    pub fn new(driver: Arc<dyn AutomationDriver>, engine: Arc<dyn OcrEngine>) -> Self {
        Self {
            driver,
            engine: RwLock::new(engine),
            snapshot: Mutex::new(None),
            scale_override: None,
            detected_scale: Mutex::new(None),
        }
    }

    /// Pins the pixel-per-point factor instead of detecting it.
    pub fn with_scale(mut self, scale: Option<f64>) -> Self {
        self.scale_override = scale.filter(|s| *s > 0.0 && s.is_finite());
        self
    }

    pub fn driver(&self) -> &Arc<dyn AutomationDriver> {
        &self.driver
    }

    /// The engine used for the next OCR pass.
    pub fn engine(&self) -> Arc<dyn OcrEngine> {
        match self.engine.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swaps the OCR engine. The cached snapshot is discarded.
    pub async fn set_engine(&self, engine: Arc<dyn OcrEngine>) {
        info!(engine = engine.name(), "OCR engine changed");
        match self.engine.write() {
            Ok(mut guard) => *guard = engine,
            Err(poisoned) => *poisoned.into_inner() = engine,
        }
        self.snapshot.lock().await.take();
    }

    /// The last snapshot, if any.
    pub async fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.lock().await.clone()
    }

    /// Screenshot without OCR. Does not touch the cache.
    pub async fn capture(&self) -> Result<DynamicImage, AutomationError> {
        let png = self.driver.screenshot().await?;
        let image = tokio::task::spawn_blocking(move || image::load_from_memory(&png))
            .await
            .map_err(|e| OcrError::EngineFailed(e.to_string()))??;
        Ok(image)
    }

    /// Takes a screenshot, runs OCR and replaces the cache.
    #[instrument(skip(self), level = "debug")]
    pub async fn refresh(&self) -> Result<Arc<Snapshot>, AutomationError> {
        let png = self.driver.screenshot().await?;
        let engine = self.engine();
        let started = std::time::Instant::now();

        let snapshot = tokio::task::spawn_blocking(move || -> Result<Snapshot, OcrError> {
            let image = image::load_from_memory(&png)?;
            let matches = engine.recognize(&image)?;
            Ok(Snapshot { image, png, matches })
        })
        .await
        .map_err(|e| OcrError::EngineFailed(e.to_string()))??;

        debug!(
            count = snapshot.matches.len(),
            width = snapshot.image.width(),
            ocr_ms = started.elapsed().as_millis() as u64,
            "screen recognised"
        );
        let snapshot = Arc::new(snapshot);
        *self.snapshot.lock().await = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    async fn current(&self, refresh: bool) -> Result<Arc<Snapshot>, AutomationError> {
        if !refresh {
            if let Some(snapshot) = self.snapshot.lock().await.clone() {
                return Ok(snapshot);
            }
        }
        self.refresh().await
    }

    /// Recognised text; cached unless `refresh` is set or nothing is cached.
    pub async fn matches(&self, refresh: bool) -> Result<Vec<TextMatch>, AutomationError> {
        Ok(self.current(refresh).await?.matches.clone())
    }

    pub async fn find_text(
        &self,
        query: &TextQuery,
        refresh: bool,
    ) -> Result<Option<TextMatch>, AutomationError> {
        let snapshot = self.current(refresh).await?;
        Ok(ocr::find_text(&snapshot.matches, query).cloned())
    }

    pub async fn find_all_text(
        &self,
        query: &TextQuery,
        refresh: bool,
    ) -> Result<Vec<TextMatch>, AutomationError> {
        let snapshot = self.current(refresh).await?;
        Ok(ocr::find_all_text(&snapshot.matches, query)
            .into_iter()
            .cloned()
            .collect())
    }

    pub async fn all_text(&self, refresh: bool) -> Result<Vec<String>, AutomationError> {
        let snapshot = self.current(refresh).await?;
        Ok(snapshot.matches.iter().map(|m| m.text.clone()).collect())
    }

    pub async fn text_exists(&self, query: &TextQuery, refresh: bool) -> Result<bool, AutomationError> {
        Ok(self.find_text(query, refresh).await?.is_some())
    }

    /// Pixels per point.
    ///
    /// A pinned scale wins. Otherwise it is screenshot width over window
    /// width, detected once; anything non-positive falls back to 1.0.
    pub async fn scale(&self) -> Result<f64, AutomationError> {
        if let Some(scale) = self.scale_override {
            return Ok(scale);
        }
        let mut detected = self.detected_scale.lock().await;
        if let Some(scale) = *detected {
            return Ok(scale);
        }

        let cached_width = self.snapshot.lock().await.as_ref().map(|s| s.image.width());
        let pixel_width = match cached_width {
            Some(width) => width,
            None => self.capture().await?.width(),
        };
        let window = self.driver.window_size().await?;
        let ratio = f64::from(pixel_width) / window.width;
        let scale = if ratio > 0.0 && ratio.is_finite() { ratio } else { 1.0 };
        debug!(pixel_width, window_width = window.width, scale, "screen scale detected");
        *detected = Some(scale);
        Ok(scale)
    }

    /// Center of `m` in WDA points.
    pub async fn tap_point(&self, m: &TextMatch) -> Result<(i32, i32), AutomationError> {
        let scale = self.scale().await?;
        Ok(m.frame.scaled(scale).center().rounded())
    }

    /// Taps the first match, if any.
    pub async fn tap_text(
        &self,
        query: &TextQuery,
        refresh: bool,
    ) -> Result<Option<TextMatch>, AutomationError> {
        let Some(found) = self.find_text(query, refresh).await? else {
            return Ok(None);
        };
        self.tap_match(&found).await?;
        Ok(Some(found))
    }

    async fn tap_match(&self, m: &TextMatch) -> Result<(), AutomationError> {
        let (x, y) = self.tap_point(m).await?;
        debug!(text = %m.text, x, y, "tapping text");
        self.driver.tap_location(x, y).await?;
        Ok(())
    }

    /// Polls fresh screenshots until `query` appears.
    ///
    /// Always makes at least one attempt. Transient errors are logged and
    /// polling continues; the last one is reported if time runs out.
    #[instrument(skip(self, query), fields(query = %query), level = "debug")]
    pub async fn wait_for_text(
        &self,
        query: &TextQuery,
        timeout: Duration,
        interval: Duration,
    ) -> Result<TextMatch, AutomationError> {
        let start = Instant::now();
        let mut last_error: Option<String> = None;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.refresh().await {
                Ok(snapshot) => {
                    if let Some(found) = ocr::find_text(&snapshot.matches, query) {
                        debug!(attempts, elapsed_ms = start.elapsed().as_millis() as u64, "text appeared");
                        return Ok(found.clone());
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(attempt = attempts, error = %e, "screen read failed, still polling");
                    last_error = Some(e.to_string());
                }
                Err(e) => return Err(e),
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(AutomationError::Timeout {
                    query: query.to_string(),
                    elapsed_ms: elapsed.as_millis() as u64,
                    last_error,
                });
            }
            tokio::time::sleep(interval.min(timeout - elapsed)).await;
        }
    }

    /// [`wait_for_text`](Self::wait_for_text), then tap the match.
    pub async fn wait_and_tap_text(
        &self,
        query: &TextQuery,
        timeout: Duration,
        interval: Duration,
    ) -> Result<TextMatch, AutomationError> {
        let found = self.wait_for_text(query, timeout, interval).await?;
        self.tap_match(&found).await?;
        Ok(found)
    }

    /// Writes the screenshot with every OCR box outlined, plus a JSON file
    /// of the same stem listing each box's text, confidence and frame.
    pub async fn save_annotated(&self, path: &Path, refresh: bool) -> Result<(), AutomationError> {
        let snapshot = self.current(refresh).await?;
        let boxes = snapshot.matches.len();

        let image_path = path.to_path_buf();
        let annotated = Arc::clone(&snapshot);
        tokio::task::spawn_blocking(move || {
            ocr::annotate(&annotated.image, &annotated.matches).save(&image_path)
        })
        .await
        .map_err(|e| OcrError::EngineFailed(e.to_string()))?
        .map_err(OcrError::from)?;

        let labels_path = labels_path(path);
        let labels = serde_json::to_vec_pretty(&snapshot.matches)
            .map_err(|e| AutomationError::InvalidArgument(e.to_string()))?;
        tokio::fs::write(&labels_path, labels).await?;

        info!(
            path = %path.display(),
            labels = %labels_path.display(),
            boxes,
            "annotated screenshot saved"
        );
        Ok(())
    }

    /// Writes the cached screenshot, or a fresh one when `refresh` is set or
    /// nothing is cached. The fresh capture skips OCR.
    pub async fn save_screenshot(&self, path: &Path, refresh: bool) -> Result<(), AutomationError> {
        let cached = if refresh { None } else { self.snapshot().await };
        let png = match cached {
            Some(snapshot) => snapshot.png.clone(),
            None => self.driver.screenshot().await?,
        };
        tokio::fs::write(path, png).await?;
        info!(path = %path.display(), "screenshot saved");
        Ok(())
    }
}

/// `shot.png` -> `shot.json`.
fn labels_path(image_path: &Path) -> PathBuf {
    image_path.with_extension("json")
}
