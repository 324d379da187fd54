//! Runs [`ActionType`]s against an [`Automator`].
//!
//! [`ActionExecutor::execute`] never fails: every outcome is folded into an
//! [`ExecutionResult`] so that a script runner can log it and decide whether
//! to continue. [`ActionExecutor::run_script`] does exactly that and writes
//! one [`ActionLog`] JSON line per step when given a log file.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ocrtap_core::action::ActionType;
//! use ocrtap_core::automator::{Automator, AutomatorSettings};
//! use ocrtap_core::executor::ActionExecutor;
//! use ocrtap_core::ocr::tesseract::TesseractEngine;
//! use ocrtap_core::wda_driver::WdaDriver;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = Arc::new(WdaDriver::new("http://localhost:8100")?);
//! let auto = Automator::new(driver, Arc::new(TesseractEngine::new()), AutomatorSettings::default());
//! let executor = ActionExecutor::new(Arc::new(auto));
//!
//! let result = executor
//!     .execute(ActionType::TapText { text: "General".into(), exact: false, timeout_ms: None })
//!     .await;
//! println!("{}: {}", result.success, result.message);
//! # Ok(())
//! # }
//! ```

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::action::{ActionLog, ActionResult, ActionType};
use crate::automator::{AutomationError, Automator};
use crate::ocr::{MatchMode, TextQuery};

/// Outcome of a single action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Human-readable description.
    pub message: String,
    /// Structured output, e.g. the matched text and its box.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ExecutionResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<AutomationError> for ExecutionResult {
    fn from(err: AutomationError) -> Self {
        ExecutionResult::failure(err.to_string())
    }
}

/// Totals for a [`run_script`](ActionExecutor::run_script) call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    /// Steps not run because an earlier one failed.
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<ExecutionResult>,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Executes actions through an [`Automator`].
pub struct ActionExecutor {
    automator: Arc<Automator>,
}

impl ActionExecutor {
    pub fn new(automator: Arc<Automator>) -> Self {
        Self { automator }
    }

    pub fn automator(&self) -> &Arc<Automator> {
        &self.automator
    }

    fn query(&self, text: &str, exact: bool) -> TextQuery {
        let mut query = self.automator.query(text);
        if exact {
            query.mode = MatchMode::Exact;
        }
        query
    }

    /// Executes one action.
    pub async fn execute(&self, action: ActionType) -> ExecutionResult {
        let span = info_span!("execute_action", action = action.name());
        async {
            let start = Instant::now();
            let result = match self.execute_inner(action).await {
                Ok(result) => result,
                Err(e) => e.into(),
            };
            debug!(
                elapsed_ms = start.elapsed().as_millis() as u64,
                success = result.success,
                "action complete"
            );
            result
        }
        .instrument(span)
        .await
    }

    async fn execute_inner(&self, action: ActionType) -> Result<ExecutionResult, AutomationError> {
        let auto = &self.automator;
        let result = match action {
            ActionType::Tap { x, y } => {
                if let Some(rejected) = check_coordinates(x, y) {
                    return Ok(rejected);
                }
                auto.tap(x, y).await?;
                ExecutionResult::success(format!("Tapped at ({x}, {y})"))
            }

            ActionType::TapText {
                ref text,
                exact,
                timeout_ms,
            } => {
                let timeout = timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| auto.settings().default_timeout());
                let found = auto.tap_text_with(&self.query(text, exact), timeout).await?;
                ExecutionResult::success(format!("Tapped '{}'", found.text))
                    .with_data(json!(found))
            }

            ActionType::TapIfExists { ref text } => {
                if auto.tap_if_exists(text).await? {
                    ExecutionResult::success(format!("Tapped '{text}'"))
                        .with_data(json!({ "tapped": true }))
                } else {
                    ExecutionResult::success(format!("'{text}' not on screen, skipped"))
                        .with_data(json!({ "tapped": false }))
                }
            }

            ActionType::TapLabel { ref label } => {
                if auto.tap_element_by_label(label).await? {
                    ExecutionResult::success(format!("Tapped element with label '{label}'"))
                } else {
                    ExecutionResult::failure(format!("No element with label '{label}'"))
                }
            }

            ActionType::DoubleTap { x, y } => {
                if let Some(rejected) = check_coordinates(x, y) {
                    return Ok(rejected);
                }
                auto.double_tap(x, y).await?;
                ExecutionResult::success(format!("Double tapped at ({x}, {y})"))
            }

            ActionType::LongPress { x, y, duration } => {
                if let Some(rejected) = check_coordinates(x, y) {
                    return Ok(rejected);
                }
                auto.long_press(x, y, duration).await?;
                ExecutionResult::success(format!("Long pressed at ({x}, {y}) for {duration:.1}s"))
            }

            ActionType::Swipe {
                direction,
                distance,
            } => {
                match distance {
                    Some(d) => auto.swipe_by(direction, d).await?,
                    None => auto.swipe(direction).await?,
                }
                ExecutionResult::success(format!("Swiped {direction}"))
            }

            ActionType::TypeText {
                ref text,
                clear_first,
            } => {
                auto.type_text(text, clear_first).await?;
                ExecutionResult::success(format!("Typed '{text}'"))
            }

            ActionType::PressButton { button } => {
                auto.press_button(button).await?;
                ExecutionResult::success(format!("Pressed {button}"))
            }

            ActionType::LaunchApp { ref bundle_id } => {
                auto.launch_app(bundle_id).await?;
                ExecutionResult::success(format!("Launched {bundle_id}"))
            }

            ActionType::CloseApp { ref bundle_id } => {
                auto.close_app(bundle_id).await?;
                ExecutionResult::success(format!("Closed {bundle_id}"))
            }

            ActionType::WaitForText {
                ref text,
                exact,
                timeout_ms,
            } => {
                let timeout = timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| auto.settings().default_timeout());
                let start = Instant::now();
                let found = auto
                    .screen()
                    .wait_for_text(&self.query(text, exact), timeout, auto.settings().poll_interval())
                    .await?;
                let elapsed_ms = start.elapsed().as_millis() as u64;
                ExecutionResult::success(format!("'{}' appeared after {elapsed_ms}ms", found.text))
                    .with_data(json!({ "match": found, "elapsed_ms": elapsed_ms }))
            }

            ActionType::ScrollToText {
                ref text,
                direction,
                max_scrolls,
            } => {
                if auto.scroll_to_text(text, direction, max_scrolls).await? {
                    ExecutionResult::success(format!("Found '{text}'"))
                } else {
                    ExecutionResult::failure(format!(
                        "'{text}' not found after {max_scrolls} scrolls {direction}"
                    ))
                }
            }

            ActionType::Screenshot { ref path, boxes } => match (path, boxes) {
                (Some(path), true) => {
                    auto.screenshot_with_boxes(path).await?;
                    ExecutionResult::success(format!("Saved annotated screenshot to {}", path.display()))
                }
                (None, true) => ExecutionResult::failure("Screenshot with boxes needs a path"),
                (path, false) => {
                    let image = auto.screenshot(path.as_deref()).await?;
                    let message = match path {
                        Some(p) => format!("Saved screenshot to {}", p.display()),
                        None => "Screenshot captured".to_string(),
                    };
                    ExecutionResult::success(message)
                        .with_data(json!({ "width": image.width(), "height": image.height() }))
                }
            },

            ActionType::ReadText => {
                let text = auto.all_text().await?;
                ExecutionResult::success(format!("Read {} text items", text.len()))
                    .with_data(json!(text))
            }

            ActionType::Sleep { ms } => {
                auto.wait(Duration::from_millis(ms)).await;
                ExecutionResult::success(format!("Slept {ms}ms"))
            }

            ActionType::Comment { ref message } => {
                info!(comment = %message);
                ExecutionResult::success(message.clone())
            }
        };
        Ok(result)
    }

    /// Runs `actions` in order.
    ///
    /// With `stop_on_failure` the first failing step ends the run and the
    /// rest are counted as skipped. When `log_path` is set, one
    /// [`ActionLog`] line per executed step is appended to it.
    pub async fn run_script(
        &self,
        actions: &[ActionType],
        stop_on_failure: bool,
        log_path: Option<&Path>,
    ) -> Result<RunSummary, AutomationError> {
        let mut log = match log_path {
            Some(path) => Some(OpenOptions::new().create(true).append(true).open(path)?),
            None => None,
        };

        let started = Instant::now();
        let mut summary = RunSummary::default();

        for (index, action) in actions.iter().enumerate() {
            let step_start = Instant::now();
            let result = self.execute(action.clone()).await;
            let duration_ms = step_start.elapsed().as_millis() as u64;

            if let Some(file) = log.as_mut() {
                let outcome = if result.success {
                    ActionResult::Success
                } else {
                    ActionResult::Failure(result.message.clone())
                };
                let entry = ActionLog::new(action.clone(), outcome, Some(duration_ms));
                let line = serde_json::to_string(&entry)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                writeln!(file, "{line}")?;
                file.flush()?;
            }

            if result.success {
                summary.passed += 1;
                debug!(step = index + 1, action = action.name(), "{}", result.message);
            } else {
                summary.failed += 1;
                warn!(step = index + 1, action = action.name(), error = %result.message, "step failed");
            }
            let failed = !result.success;
            summary.results.push(result);

            if failed && stop_on_failure {
                summary.skipped = actions.len() - index - 1;
                break;
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            passed = summary.passed,
            failed = summary.failed,
            skipped = summary.skipped,
            duration_ms = summary.duration_ms,
            "script finished"
        );
        Ok(summary)
    }
}

fn check_coordinates(x: i32, y: i32) -> Option<ExecutionResult> {
    (x < 0 || y < 0).then(|| {
        ExecutionResult::failure(format!(
            "Coordinates must be non-negative (got x={x}, y={y})"
        ))
    })
}
