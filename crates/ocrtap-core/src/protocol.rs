//! WebDriverAgent routes and response decoding.
//!
//! Every WDA command the crate issues is a [`Request`] variant. A request knows
//! its HTTP method, its route (optionally scoped to a session), and its JSON
//! body. Responses share one envelope shape:
//!
//! ```text
//! { "value": <any>, "sessionId": "<optional>" }
//! ```
//!
//! Errors are reported inside `value` W3C style:
//!
//! ```text
//! { "value": { "error": "invalid session id", "message": "..." } }
//! ```
//!
//! # Example
//!
//! ```
//! use ocrtap_core::protocol::{Method, Request};
//!
//! let req = Request::Tap { x: 120, y: 340 };
//! assert_eq!(req.method(), Method::Post);
//! assert_eq!(req.path(Some("abc")).unwrap(), "/session/abc/wda/tap/0");
//! ```

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::element::{ElementRef, Frame, Size};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while building routes or decoding WDA replies.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// A session-scoped route was built without a session id.
    #[error("request '{0}' requires a session")]
    MissingSession(&'static str),

    /// The create-session reply carried no session id.
    #[error("no session id in create-session response")]
    NoSessionId,

    /// The body was not valid JSON.
    #[error("invalid JSON body: {0}")]
    InvalidJson(String),

    /// The screenshot payload was not valid base64.
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),

    /// `value` did not have the shape the request expects.
    #[error("unexpected value for {what}: {found}")]
    UnexpectedValue { what: &'static str, found: String },
}

fn unexpected(what: &'static str, value: &Value) -> ProtocolError {
    let mut found = value.to_string();
    if found.chars().count() > 120 {
        found = found.chars().take(120).collect();
        found.push_str("...");
    }
    ProtocolError::UnexpectedValue { what, found }
}

// ---------------------------------------------------------------------------
// Supporting enums
// ---------------------------------------------------------------------------

/// HTTP method of a WDA route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

/// Element lookup strategy understood by WDA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    AccessibilityId,
    ClassName,
    Name,
    PredicateString,
    ClassChain,
    XPath,
}

impl Locator {
    /// The `using` string on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Locator::AccessibilityId => "accessibility id",
            Locator::ClassName => "class name",
            Locator::Name => "name",
            Locator::PredicateString => "predicate string",
            Locator::ClassChain => "class chain",
            Locator::XPath => "xpath",
        }
    }
}

/// Hardware buttons WDA can press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ButtonName {
    Home,
    VolumeUp,
    VolumeDown,
}

impl ButtonName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ButtonName::Home => "home",
            ButtonName::VolumeUp => "volumeUp",
            ButtonName::VolumeDown => "volumeDown",
        }
    }
}

impl std::str::FromStr for ButtonName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "home" => Ok(ButtonName::Home),
            "volumeup" => Ok(ButtonName::VolumeUp),
            "volumedown" => Ok(ButtonName::VolumeDown),
            _ => Err(format!(
                "invalid button '{s}'. Use: home, volumeUp, volumeDown"
            )),
        }
    }
}

impl std::fmt::Display for ButtonName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A typed WDA command.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Health check.
    Status,
    /// Open a session, optionally launching an app.
    CreateSession { bundle_id: Option<String> },
    /// Close the current session.
    DeleteSession,
    /// Full-screen PNG screenshot (base64 in `value`).
    Screenshot,
    /// Window size in points.
    WindowSize,
    Tap { x: i32, y: i32 },
    DoubleTap { x: i32, y: i32 },
    TouchAndHold { x: i32, y: i32, duration: f64 },
    Drag {
        from_x: i32,
        from_y: i32,
        to_x: i32,
        to_y: i32,
        duration: f64,
    },
    /// Type into the focused element.
    Keys { text: String },
    PressButton { button: ButtonName },
    /// Go to the home screen.
    Homescreen,
    LaunchApp { bundle_id: String },
    TerminateApp { bundle_id: String },
    ActiveAppInfo,
    FindElement { using: Locator, value: String },
    FindElements { using: Locator, value: String },
    ElementClick { element: ElementRef },
    ElementText { element: ElementRef },
    ElementRect { element: ElementRef },
    /// Accessibility tree as XML.
    Source,
    SetPasteboard { content: String },
    GetPasteboard,
    Lock,
    Unlock,
    Locked,
}

impl Request {
    /// Short static name for tracing spans.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Status => "status",
            Request::CreateSession { .. } => "create_session",
            Request::DeleteSession => "delete_session",
            Request::Screenshot => "screenshot",
            Request::WindowSize => "window_size",
            Request::Tap { .. } => "tap",
            Request::DoubleTap { .. } => "double_tap",
            Request::TouchAndHold { .. } => "touch_and_hold",
            Request::Drag { .. } => "drag",
            Request::Keys { .. } => "keys",
            Request::PressButton { .. } => "press_button",
            Request::Homescreen => "homescreen",
            Request::LaunchApp { .. } => "launch_app",
            Request::TerminateApp { .. } => "terminate_app",
            Request::ActiveAppInfo => "active_app_info",
            Request::FindElement { .. } => "find_element",
            Request::FindElements { .. } => "find_elements",
            Request::ElementClick { .. } => "element_click",
            Request::ElementText { .. } => "element_text",
            Request::ElementRect { .. } => "element_rect",
            Request::Source => "source",
            Request::SetPasteboard { .. } => "set_pasteboard",
            Request::GetPasteboard => "get_pasteboard",
            Request::Lock => "lock",
            Request::Unlock => "unlock",
            Request::Locked => "locked",
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Request::Status
            | Request::Screenshot
            | Request::WindowSize
            | Request::ActiveAppInfo
            | Request::ElementText { .. }
            | Request::ElementRect { .. }
            | Request::Source
            | Request::Locked => Method::Get,
            Request::DeleteSession => Method::Delete,
            _ => Method::Post,
        }
    }

    /// Whether the route lives under `/session/{id}`.
    pub fn needs_session(&self) -> bool {
        !matches!(
            self,
            Request::Status
                | Request::CreateSession { .. }
                | Request::Screenshot
                | Request::Homescreen
        )
    }

    /// Builds the route path. Session-scoped requests need `session`.
    pub fn path(&self, session: Option<&str>) -> Result<String, ProtocolError> {
        let scoped = |suffix: &str| -> Result<String, ProtocolError> {
            let sid = session.ok_or(ProtocolError::MissingSession(self.name()))?;
            Ok(format!("/session/{sid}{suffix}"))
        };
        match self {
            Request::Status => Ok("/status".into()),
            Request::CreateSession { .. } => Ok("/session".into()),
            Request::Screenshot => Ok("/screenshot".into()),
            Request::Homescreen => Ok("/wda/homescreen".into()),
            Request::DeleteSession => scoped(""),
            Request::WindowSize => scoped("/window/size"),
            Request::Tap { .. } => scoped("/wda/tap/0"),
            Request::DoubleTap { .. } => scoped("/wda/doubleTap"),
            Request::TouchAndHold { .. } => scoped("/wda/touchAndHold"),
            Request::Drag { .. } => scoped("/wda/dragfromtoforduration"),
            Request::Keys { .. } => scoped("/wda/keys"),
            Request::PressButton { .. } => scoped("/wda/pressButton"),
            Request::LaunchApp { .. } => scoped("/wda/apps/launch"),
            Request::TerminateApp { .. } => scoped("/wda/apps/terminate"),
            Request::ActiveAppInfo => scoped("/wda/activeAppInfo"),
            Request::FindElement { .. } => scoped("/element"),
            Request::FindElements { .. } => scoped("/elements"),
            Request::ElementClick { element } => scoped(&format!("/element/{element}/click")),
            Request::ElementText { element } => scoped(&format!("/element/{element}/text")),
            Request::ElementRect { element } => scoped(&format!("/element/{element}/rect")),
            Request::Source => scoped("/source"),
            Request::SetPasteboard { .. } => scoped("/wda/setPasteboard"),
            Request::GetPasteboard => scoped("/wda/getPasteboard"),
            Request::Lock => scoped("/wda/lock"),
            Request::Unlock => scoped("/wda/unlock"),
            Request::Locked => scoped("/wda/locked"),
        }
    }

    /// JSON body, if the route takes one.
    pub fn body(&self) -> Option<Value> {
        match self {
            Request::CreateSession { bundle_id } => {
                let mut always = serde_json::Map::new();
                if let Some(id) = bundle_id {
                    always.insert("bundleId".into(), Value::String(id.clone()));
                }
                Some(json!({
                    "capabilities": {
                        "alwaysMatch": always,
                        "firstMatch": [{}],
                    }
                }))
            }
            Request::Tap { x, y } | Request::DoubleTap { x, y } => Some(json!({ "x": x, "y": y })),
            Request::TouchAndHold { x, y, duration } => {
                Some(json!({ "x": x, "y": y, "duration": duration }))
            }
            Request::Drag {
                from_x,
                from_y,
                to_x,
                to_y,
                duration,
            } => Some(json!({
                "fromX": from_x,
                "fromY": from_y,
                "toX": to_x,
                "toY": to_y,
                "duration": duration,
            })),
            Request::Keys { text } => {
                let chars: Vec<String> = text.chars().map(String::from).collect();
                Some(json!({ "value": chars }))
            }
            Request::PressButton { button } => Some(json!({ "name": button.as_str() })),
            Request::LaunchApp { bundle_id } | Request::TerminateApp { bundle_id } => {
                Some(json!({ "bundleId": bundle_id }))
            }
            Request::FindElement { using, value } | Request::FindElements { using, value } => {
                Some(json!({ "using": using.as_str(), "value": value }))
            }
            Request::ElementClick { .. } | Request::Lock | Request::Unlock => Some(json!({})),
            Request::SetPasteboard { content } => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(content.as_bytes());
                Some(json!({ "content": encoded, "contentType": "plaintext" }))
            }
            Request::GetPasteboard => Some(json!({ "contentType": "plaintext" })),
            Request::Homescreen => Some(json!({})),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The common WDA response wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub value: Value,
    pub session_id: Option<String>,
    /// Numeric JSON Wire Protocol status sent by older WDA builds.
    pub legacy_status: Option<i64>,
}

impl Envelope {
    /// Parses a response body. An empty body decodes to a `null` value.
    pub fn parse(body: &str) -> Result<Self, ProtocolError> {
        if body.trim().is_empty() {
            return Ok(Envelope {
                value: Value::Null,
                session_id: None,
                legacy_status: None,
            });
        }
        let raw: Value =
            serde_json::from_str(body).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        let session_id = raw
            .get("sessionId")
            .and_then(Value::as_str)
            .map(String::from);
        let legacy_status = raw.get("status").and_then(Value::as_i64);
        let value = match raw {
            Value::Object(mut map) => map.remove("value").unwrap_or(Value::Null),
            other => other,
        };
        Ok(Envelope {
            value,
            session_id,
            legacy_status,
        })
    }

    /// The error carried by the reply, if any.
    ///
    /// W3C errors live in `value.error`. Legacy replies use a non-zero
    /// `status` (6 = no such session, 7 = no such element) with the message
    /// as a plain string in `value`.
    pub fn error(&self) -> Option<WdaErrorBody> {
        if let Some(code) = self.legacy_status.filter(|c| *c != 0) {
            let error = match code {
                6 => "invalid session id",
                7 => "no such element",
                _ => "unknown error",
            };
            let message = match &self.value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            return Some(WdaErrorBody {
                error: error.to_string(),
                message,
            });
        }
        let error = self.value.get("error")?.as_str()?.to_string();
        let message = self
            .value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some(WdaErrorBody { error, message })
    }

    /// Session id from the top level or from `value.sessionId`.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.clone().or_else(|| {
            self.value
                .get("sessionId")
                .and_then(Value::as_str)
                .map(String::from)
        })
    }
}

/// A W3C error reported by WDA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WdaErrorBody {
    pub error: String,
    pub message: String,
}

impl WdaErrorBody {
    pub fn is_invalid_session(&self) -> bool {
        self.error == "invalid session id"
            || self.message.to_ascii_lowercase().contains("session does not exist")
    }

    pub fn is_no_such_element(&self) -> bool {
        self.error == "no such element"
    }
}

// ---------------------------------------------------------------------------
// Typed results
// ---------------------------------------------------------------------------

/// Decoded `/status` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WdaStatus {
    pub ready: bool,
    pub message: Option<String>,
    pub ios_version: Option<String>,
    pub ip: Option<String>,
}

impl WdaStatus {
    pub fn from_value(value: &Value) -> Self {
        let ready = value
            .get("ready")
            .and_then(Value::as_bool)
            .or_else(|| value.get("state").and_then(Value::as_str).map(|s| s == "success"))
            .unwrap_or(true);
        let text = |a: &str, b: &str| {
            value
                .get(a)
                .and_then(|v| v.get(b))
                .and_then(Value::as_str)
                .map(String::from)
        };
        WdaStatus {
            ready,
            message: value.get("message").and_then(Value::as_str).map(String::from),
            ios_version: text("os", "version"),
            ip: text("ios", "ip"),
        }
    }
}

/// Foreground app as reported by `activeAppInfo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveApp {
    pub bundle_id: String,
    pub name: Option<String>,
    pub pid: Option<i64>,
}

impl ActiveApp {
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let bundle_id = value
            .get("bundleId")
            .and_then(Value::as_str)
            .ok_or_else(|| unexpected("active app", value))?;
        Ok(ActiveApp {
            bundle_id: bundle_id.to_string(),
            name: value.get("name").and_then(Value::as_str).map(String::from),
            pid: value.get("pid").and_then(Value::as_i64),
        })
    }
}

pub fn decode_size(value: &Value) -> Result<Size, ProtocolError> {
    let width = value.get("width").and_then(Value::as_f64);
    let height = value.get("height").and_then(Value::as_f64);
    match (width, height) {
        (Some(width), Some(height)) => Ok(Size { width, height }),
        _ => Err(unexpected("window size", value)),
    }
}

pub fn decode_frame(value: &Value) -> Result<Frame, ProtocolError> {
    let field = |k: &str| value.get(k).and_then(Value::as_f64);
    match (field("x"), field("y"), field("width"), field("height")) {
        (Some(x), Some(y), Some(w), Some(h)) => Ok(Frame::new(x, y, w, h)),
        _ => Err(unexpected("element rect", value)),
    }
}

pub fn decode_element(value: &Value) -> Result<ElementRef, ProtocolError> {
    ElementRef::from_value(value).ok_or_else(|| unexpected("element", value))
}

pub fn decode_elements(value: &Value) -> Result<Vec<ElementRef>, ProtocolError> {
    let items = value.as_array().ok_or_else(|| unexpected("elements", value))?;
    items.iter().map(decode_element).collect()
}

pub fn decode_string(value: &Value, what: &'static str) -> Result<String, ProtocolError> {
    value
        .as_str()
        .map(String::from)
        .ok_or_else(|| unexpected(what, value))
}

pub fn decode_bool(value: &Value, what: &'static str) -> Result<bool, ProtocolError> {
    value.as_bool().ok_or_else(|| unexpected(what, value))
}

/// Decodes a base64 payload, tolerating embedded line breaks.
pub fn decode_base64(value: &Value, what: &'static str) -> Result<Vec<u8>, ProtocolError> {
    let encoded = value.as_str().ok_or_else(|| unexpected(what, value))?;
    let cleaned: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(cleaned)
        .map_err(|e| ProtocolError::InvalidBase64(e.to_string()))
}
