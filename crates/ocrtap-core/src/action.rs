//! Scripted actions and their log records.
//!
//! A script is a JSON list of [`ActionType`]s, each tagged with `"type"`:
//!
//! ```json
//! [
//!   { "type": "LaunchApp", "bundle_id": "com.apple.Preferences" },
//!   { "type": "TapText", "text": "General" },
//!   { "type": "ScrollToText", "text": "Reset", "direction": "up" },
//!   { "type": "Screenshot", "path": "reset.png" }
//! ]
//! ```
//!
//! The list may also be wrapped as `{ "name": "...", "actions": [...] }`.
//!
//! # Example
//!
//! ```
//! use ocrtap_core::action::{parse_script, ActionType};
//!
//! let script = parse_script(r#"[{"type": "TapText", "text": "Wi-Fi"}]"#).unwrap();
//! assert_eq!(script.actions[0].name(), "tap_text");
//! ```

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::driver::Direction;
use crate::protocol::ButtonName;

fn default_long_press() -> f64 {
    1.0
}

fn default_scroll_direction() -> Direction {
    Direction::Up
}

fn default_max_scrolls() -> u32 {
    5
}

/// One step of an automation script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ActionType {
    /// Tap at screen coordinates (points).
    Tap { x: i32, y: i32 },

    /// Wait for text, then tap its center.
    TapText {
        text: String,
        #[serde(default)]
        exact: bool,
        /// Defaults to the automator's timeout.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },

    /// Tap text only if it is on screen now.
    TapIfExists { text: String },

    /// Tap an element by accessibility id, no OCR.
    TapLabel { label: String },

    DoubleTap { x: i32, y: i32 },

    LongPress {
        x: i32,
        y: i32,
        /// Seconds.
        #[serde(default = "default_long_press")]
        duration: f64,
    },

    Swipe {
        direction: Direction,
        /// Points; defaults to the automator's per-axis distance.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        distance: Option<i32>,
    },

    TypeText {
        text: String,
        #[serde(default)]
        clear_first: bool,
    },

    PressButton { button: ButtonName },

    LaunchApp { bundle_id: String },

    CloseApp { bundle_id: String },

    WaitForText {
        text: String,
        #[serde(default)]
        exact: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },

    ScrollToText {
        text: String,
        #[serde(default = "default_scroll_direction")]
        direction: Direction,
        #[serde(default = "default_max_scrolls")]
        max_scrolls: u32,
    },

    /// Capture the screen, optionally saving it with OCR boxes.
    Screenshot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
        #[serde(default)]
        boxes: bool,
    },

    /// OCR the screen and return all text.
    ReadText,

    Sleep { ms: u64 },

    /// No-op, recorded in the log.
    Comment { message: String },
}

impl ActionType {
    /// Short static name for span metadata and logs.
    pub fn name(&self) -> &'static str {
        match self {
            ActionType::Tap { .. } => "tap",
            ActionType::TapText { .. } => "tap_text",
            ActionType::TapIfExists { .. } => "tap_if_exists",
            ActionType::TapLabel { .. } => "tap_label",
            ActionType::DoubleTap { .. } => "double_tap",
            ActionType::LongPress { .. } => "long_press",
            ActionType::Swipe { .. } => "swipe",
            ActionType::TypeText { .. } => "type_text",
            ActionType::PressButton { .. } => "press_button",
            ActionType::LaunchApp { .. } => "launch_app",
            ActionType::CloseApp { .. } => "close_app",
            ActionType::WaitForText { .. } => "wait_for_text",
            ActionType::ScrollToText { .. } => "scroll_to_text",
            ActionType::Screenshot { .. } => "screenshot",
            ActionType::ReadText => "read_text",
            ActionType::Sleep { .. } => "sleep",
            ActionType::Comment { .. } => "comment",
        }
    }
}

/// A parsed script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub actions: Vec<ActionType>,
}

/// Parses a bare action list or a `{ "actions": [...] }` object.
pub fn parse_script(json: &str) -> Result<Script, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    if value.is_array() {
        Ok(Script {
            name: None,
            actions: serde_json::from_value(value)?,
        })
    } else {
        serde_json::from_value(value)
    }
}

/// The result of executing an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionResult {
    Success,
    Failure(String),
}

/// One JSONL line of a run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLog {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: ActionType,
    pub result: ActionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ActionLog {
    /// New entry with a fresh id, stamped now.
    pub fn new(action: ActionType, result: ActionResult, duration_ms: Option<u64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action,
            result,
            duration_ms,
        }
    }
}
