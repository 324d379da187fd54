//! High-level automation façade.
//!
//! [`Automator`] combines a driver and a [`ScreenReader`] into the calls a
//! test script actually wants: tap some text, wait for a screen, scroll
//! until something shows up. Every gesture is followed by a short settle
//! delay so the UI has time to react before the next screenshot.
//!
//! Text lookups always take a fresh screenshot.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ocrtap_core::automator::{Automator, AutomatorSettings};
//! use ocrtap_core::driver::Direction;
//! use ocrtap_core::ocr::tesseract::TesseractEngine;
//! use ocrtap_core::wda_driver::WdaDriver;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = Arc::new(WdaDriver::new("http://localhost:8100")?);
//! let auto = Automator::new(driver, Arc::new(TesseractEngine::new()), AutomatorSettings::default());
//!
//! auto.connect().await?;
//! auto.launch_app("com.apple.Preferences").await?;
//! auto.tap_text("General").await?;
//! if auto.scroll_to_text("Reset", Direction::Up, 5).await? {
//!     auto.tap_text("Reset").await?;
//! }
//! auto.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::driver::{AutomationDriver, Direction};
use crate::element::Point;
use crate::ocr::{MatchMode, OcrEngine, TextMatch, TextQuery};
use crate::protocol::{ButtonName, Locator};
pub use crate::screen::AutomationError;
use crate::screen::ScreenReader;

/// WDA key code for select-all when sent as `\u{e009}a`.
const SELECT_ALL: &str = "\u{e009}a";
/// WDA key code for backspace.
const BACKSPACE: &str = "\u{e003}";
const CLEAR_STEP_DELAY: Duration = Duration::from_millis(100);

/// Timing and matching knobs for [`Automator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomatorSettings {
    /// Pause after every gesture.
    pub action_delay_ms: u64,
    /// How long text lookups wait by default.
    pub default_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Swipe gesture length in seconds.
    pub swipe_duration: f64,
    /// Points travelled by an up/down swipe.
    pub swipe_distance_vertical: i32,
    /// Points travelled by a left/right swipe.
    pub swipe_distance_horizontal: i32,
    /// Pause after each scroll in [`Automator::scroll_to_text`].
    pub scroll_settle_ms: u64,
    /// Pause after launching an app.
    pub launch_settle_ms: u64,
    /// OCR results below this confidence never match.
    pub min_confidence: f32,
    pub match_mode: MatchMode,
}

impl Default for AutomatorSettings {
    fn default() -> Self {
        Self {
            action_delay_ms: 300,
            default_timeout_ms: 10_000,
            poll_interval_ms: 500,
            swipe_duration: 0.5,
            swipe_distance_vertical: 300,
            swipe_distance_horizontal: 200,
            scroll_settle_ms: 500,
            launch_settle_ms: 1_000,
            min_confidence: 0.5,
            match_mode: MatchMode::Contains,
        }
    }
}

impl AutomatorSettings {
    pub fn action_delay(&self) -> Duration {
        Duration::from_millis(self.action_delay_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// No settle pauses and fast polling.
    pub fn no_delays() -> Self {
        Self {
            action_delay_ms: 0,
            scroll_settle_ms: 0,
            launch_settle_ms: 0,
            poll_interval_ms: 10,
            ..Self::default()
        }
    }

    fn swipe_distance(&self, direction: Direction) -> i32 {
        if direction.is_vertical() {
            self.swipe_distance_vertical
        } else {
            self.swipe_distance_horizontal
        }
    }
}

/// Start and end points of a swipe of `distance` points through `center`.
pub fn swipe_endpoints(center: Point, direction: Direction, distance: i32) -> ((i32, i32), (i32, i32)) {
    let cx = center.x.floor() as i32;
    let cy = center.y.floor() as i32;
    let half = distance / 2;
    match direction {
        Direction::Up => ((cx, cy + half), (cx, cy - half)),
        Direction::Down => ((cx, cy - half), (cx, cy + half)),
        Direction::Left => ((cx + half, cy), (cx - half, cy)),
        Direction::Right => ((cx - half, cy), (cx + half, cy)),
    }
}

/// Screenshot → OCR → match → tap.
pub struct Automator {
    driver: Arc<dyn AutomationDriver>,
    screen: ScreenReader,
    settings: AutomatorSettings,
}

impl Automator {
    pub fn new(
        driver: Arc<dyn AutomationDriver>,
        engine: Arc<dyn OcrEngine>,
        settings: AutomatorSettings,
    ) -> Self {
        let screen = ScreenReader::new(Arc::clone(&driver), engine);
        Self::with_screen(screen, settings)
    }

    /// Uses a pre-built reader, e.g. one with a pinned coordinate scale.
    pub fn with_screen(screen: ScreenReader, settings: AutomatorSettings) -> Self {
        Self {
            driver: Arc::clone(screen.driver()),
            screen,
            settings,
        }
    }

    pub fn driver(&self) -> &Arc<dyn AutomationDriver> {
        &self.driver
    }

    pub fn screen(&self) -> &ScreenReader {
        &self.screen
    }

    pub fn settings(&self) -> &AutomatorSettings {
        &self.settings
    }

    /// A query for `text` using the configured match mode and threshold.
    pub fn query(&self, text: &str) -> TextQuery {
        TextQuery::new(text, self.settings.match_mode).with_min_confidence(self.settings.min_confidence)
    }

    /// Swaps the OCR engine at runtime.
    pub async fn set_engine(&self, engine: Arc<dyn OcrEngine>) {
        self.screen.set_engine(engine).await;
    }

    async fn settle(&self) {
        let delay = self.settings.action_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    // -- session ------------------------------------------------------------

    /// Checks WDA health and opens a session.
    pub async fn connect(&self) -> Result<(), AutomationError> {
        self.driver.connect().await?;
        info!("connected to device");
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), AutomationError> {
        self.driver.disconnect().await?;
        info!("disconnected from device");
        Ok(())
    }

    // -- gestures -----------------------------------------------------------

    pub async fn tap(&self, x: i32, y: i32) -> Result<(), AutomationError> {
        self.driver.tap_location(x, y).await?;
        self.settle().await;
        Ok(())
    }

    pub async fn double_tap(&self, x: i32, y: i32) -> Result<(), AutomationError> {
        self.driver.double_tap(x, y).await?;
        self.settle().await;
        Ok(())
    }

    /// Press and hold for `duration` seconds (1.0 is typical).
    pub async fn long_press(&self, x: i32, y: i32, duration: f64) -> Result<(), AutomationError> {
        self.driver.long_press(x, y, duration).await?;
        self.settle().await;
        Ok(())
    }

    /// Waits up to the default timeout for `text`, then taps its center.
    pub async fn tap_text(&self, text: &str) -> Result<TextMatch, AutomationError> {
        self.tap_text_with(&self.query(text), self.settings.default_timeout())
            .await
    }

    #[instrument(skip(self, query), fields(query = %query), level = "debug")]
    pub async fn tap_text_with(
        &self,
        query: &TextQuery,
        timeout: Duration,
    ) -> Result<TextMatch, AutomationError> {
        let found = self
            .screen
            .wait_and_tap_text(query, timeout, self.settings.poll_interval())
            .await?;
        info!(text = %found.text, "tapped text");
        self.settle().await;
        Ok(found)
    }

    /// Taps `text` if it is on screen right now. No waiting.
    pub async fn tap_if_exists(&self, text: &str) -> Result<bool, AutomationError> {
        let tapped = self.screen.tap_text(&self.query(text), true).await?;
        if tapped.is_some() {
            self.settle().await;
        }
        Ok(tapped.is_some())
    }

    /// Swipes through the window center by the configured distance.
    pub async fn swipe(&self, direction: Direction) -> Result<(), AutomationError> {
        self.swipe_by(direction, self.settings.swipe_distance(direction))
            .await
    }

    pub async fn swipe_by(&self, direction: Direction, distance: i32) -> Result<(), AutomationError> {
        if distance <= 0 {
            return Err(AutomationError::InvalidArgument(format!(
                "swipe distance must be positive, got {distance}"
            )));
        }
        let window = self.driver.window_size().await?;
        let (from, to) = swipe_endpoints(window.center(), direction, distance);
        debug!(%direction, ?from, ?to, "swipe");
        self.swipe_between(from, to, self.settings.swipe_duration)
            .await
    }

    pub async fn swipe_between(
        &self,
        from: (i32, i32),
        to: (i32, i32),
        duration: f64,
    ) -> Result<(), AutomationError> {
        self.driver
            .swipe(from.0, from.1, to.0, to.1, duration)
            .await?;
        self.settle().await;
        Ok(())
    }

    // -- keyboard and buttons -----------------------------------------------

    /// Types into the focused field, optionally clearing it first.
    pub async fn type_text(&self, text: &str, clear_first: bool) -> Result<(), AutomationError> {
        if clear_first {
            self.driver.type_text(SELECT_ALL).await?;
            tokio::time::sleep(CLEAR_STEP_DELAY).await;
            self.driver.type_text(BACKSPACE).await?;
            tokio::time::sleep(CLEAR_STEP_DELAY).await;
        }
        self.driver.type_text(text).await?;
        self.settle().await;
        Ok(())
    }

    pub async fn press_home(&self) -> Result<(), AutomationError> {
        self.driver.home().await?;
        self.settle().await;
        Ok(())
    }

    pub async fn press_button(&self, button: ButtonName) -> Result<(), AutomationError> {
        self.driver.press_button(button).await?;
        self.settle().await;
        Ok(())
    }

    // -- apps ---------------------------------------------------------------

    pub async fn launch_app(&self, bundle_id: &str) -> Result<(), AutomationError> {
        self.driver.launch_app(bundle_id).await?;
        tokio::time::sleep(Duration::from_millis(self.settings.launch_settle_ms)).await;
        info!(bundle_id, "launched");
        Ok(())
    }

    pub async fn close_app(&self, bundle_id: &str) -> Result<(), AutomationError> {
        self.driver.terminate_app(bundle_id).await?;
        self.settle().await;
        info!(bundle_id, "closed");
        Ok(())
    }

    /// Bundle id of the foreground app.
    pub async fn current_app(&self) -> Result<String, AutomationError> {
        Ok(self.driver.active_app().await?.bundle_id)
    }

    // -- screen state -------------------------------------------------------

    /// Waits for `text`; `None` uses the default timeout.
    pub async fn wait_for_text(
        &self,
        text: &str,
        timeout: Option<Duration>,
    ) -> Result<TextMatch, AutomationError> {
        let timeout = timeout.unwrap_or_else(|| self.settings.default_timeout());
        self.screen
            .wait_for_text(&self.query(text), timeout, self.settings.poll_interval())
            .await
    }

    pub async fn text_exists(&self, text: &str) -> Result<bool, AutomationError> {
        self.screen.text_exists(&self.query(text), true).await
    }

    /// Every piece of text on screen, in engine order.
    pub async fn all_text(&self) -> Result<Vec<String>, AutomationError> {
        self.screen.all_text(true).await
    }

    /// Where `text` is, in points.
    pub async fn find_text_location(&self, text: &str) -> Result<Option<(i32, i32)>, AutomationError> {
        match self.screen.find_text(&self.query(text), true).await? {
            Some(found) => Ok(Some(self.screen.tap_point(&found).await?)),
            None => Ok(None),
        }
    }

    /// Swipes in `direction` until `text` is visible.
    ///
    /// Checks before each of up to `max_scrolls` swipes and once more after
    /// the last one, so `max_scrolls == 0` is a single check.
    #[instrument(skip(self), level = "debug")]
    pub async fn scroll_to_text(
        &self,
        text: &str,
        direction: Direction,
        max_scrolls: u32,
    ) -> Result<bool, AutomationError> {
        let settle = Duration::from_millis(self.settings.scroll_settle_ms);
        for scroll in 0..max_scrolls {
            if self.text_exists(text).await? {
                debug!(scrolls = scroll, "text visible");
                return Ok(true);
            }
            self.swipe(direction).await?;
            tokio::time::sleep(settle).await;
        }
        let found = self.text_exists(text).await?;
        if !found {
            debug!(max_scrolls, "text not found after scrolling");
        }
        Ok(found)
    }

    // -- screenshots --------------------------------------------------------

    /// Captures the screen, optionally writing it to `save_path`.
    pub async fn screenshot(&self, save_path: Option<&Path>) -> Result<DynamicImage, AutomationError> {
        let image = self.screen.capture().await?;
        if let Some(path) = save_path {
            image.save(path)?;
            debug!(path = %path.display(), "screenshot saved");
        }
        Ok(image)
    }

    /// Saves a fresh screenshot with OCR boxes drawn on it.
    pub async fn screenshot_with_boxes(&self, path: &Path) -> Result<(), AutomationError> {
        self.screen.save_annotated(path, true).await
    }

    // -- native lookup ------------------------------------------------------

    /// Taps an element by accessibility id. Faster than OCR when the app
    /// sets labels.
    pub async fn tap_element_by_label(&self, label: &str) -> Result<bool, AutomationError> {
        let Some(element) = self
            .driver
            .find_element(Locator::AccessibilityId, label)
            .await?
        else {
            return Ok(false);
        };
        self.driver.element_click(&element).await?;
        self.settle().await;
        Ok(true)
    }

    // -- utilities ----------------------------------------------------------

    pub async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Runs `op` up to `max_attempts` times, sleeping `delay` after each
    /// failure. Returns the last error if every attempt fails.
    pub async fn retry<T, E, F, Fut>(
        &self,
        max_attempts: u32,
        delay: Duration,
        op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        retry(max_attempts, delay, op).await
    }
}

/// Free-standing form of [`Automator::retry`].
///
/// `max_attempts` of zero is treated as one.
pub async fn retry<T, E, F, Fut>(max_attempts: u32, delay: Duration, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                warn!(attempt, max_attempts = attempts, error = %e, "attempt failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
