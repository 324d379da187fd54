//! Automation driver trait.
//!
//! [`AutomationDriver`] is the seam between the automation layer
//! ([`ScreenReader`](crate::screen::ScreenReader),
//! [`Automator`](crate::automator::Automator)) and the device transport. The
//! production implementation is [`WdaDriver`](crate::wda_driver::WdaDriver);
//! tests substitute in-memory fakes.
//!
//! # Backend Selection
//!
//! ```no_run
//! use ocrtap_core::driver::DriverConfig;
//!
//! // WDA already forwarded to localhost (iproxy, tidevice, Xcode)
//! let config = DriverConfig::Wda {
//!     url: "http://localhost:8100".to_string(),
//! };
//!
//! // Forward a USB device's WDA port ourselves
//! let config = DriverConfig::Device {
//!     udid: "00008110-001A0C123456789A".to_string(),
//!     local_port: 8100,
//!     device_port: 8100,
//! };
//! ```

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::element::{ElementRef, Frame, Size};
use crate::protocol::{ActiveApp, ButtonName, Locator, ProtocolError, WdaStatus};

/// Errors that can occur during driver operations.
#[derive(Error, Debug)]
pub enum DriverError {
    /// WDA rejected or failed the command.
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// No session and none could be created.
    #[error("Not connected to WebDriverAgent")]
    NotConnected,

    /// WDA was unreachable.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The request timed out.
    #[error("Operation timed out")]
    Timeout,

    /// The session expired and could not be recreated.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// A reply could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The USB port forward failed.
    #[error("USB tunnel error: {0}")]
    UsbTunnel(#[from] crate::usb_tunnel::UsbTunnelError),
}

/// Configuration for selecting how WDA is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverConfig {
    /// WDA reachable at a URL, already forwarded.
    Wda {
        /// Base URL, e.g. `http://localhost:8100`.
        url: String,
    },
    /// A USB device whose WDA port the driver forwards through usbmuxd.
    Device {
        /// The UDID of the physical device.
        udid: String,
        /// Local TCP port to listen on.
        local_port: u16,
        /// Port WDA listens on inside the device (8100 by default).
        device_port: u16,
    },
}

/// Direction of a swipe gesture.
///
/// The direction names the finger movement: `Up` drags from lower to higher
/// on screen, which scrolls content downwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn is_vertical(&self) -> bool {
        matches!(self, Direction::Up | Direction::Down)
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            _ => Err(format!(
                "Invalid swipe direction '{s}'. Use: up, down, left, right"
            )),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        };
        f.write_str(s)
    }
}

/// Backend-agnostic device automation.
///
/// Coordinates are in screen points. All methods take `&self` so a driver
/// can be shared behind an `Arc`.
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    /// Verifies the backend is reachable and opens a session.
    async fn connect(&self) -> Result<(), DriverError>;

    /// Returns whether a session is currently held.
    fn is_connected(&self) -> bool;

    /// Backend health.
    async fn status(&self) -> Result<WdaStatus, DriverError>;

    /// Closes the session, if any.
    async fn disconnect(&self) -> Result<(), DriverError>;

    async fn tap_location(&self, x: i32, y: i32) -> Result<(), DriverError>;

    async fn double_tap(&self, x: i32, y: i32) -> Result<(), DriverError>;

    /// Press and hold for `duration` seconds.
    async fn long_press(&self, x: i32, y: i32, duration: f64) -> Result<(), DriverError>;

    /// Drag from one point to another over `duration` seconds.
    async fn swipe(
        &self,
        start_x: i32,
        start_y: i32,
        end_x: i32,
        end_y: i32,
        duration: f64,
    ) -> Result<(), DriverError>;

    /// Types into the focused element.
    async fn type_text(&self, text: &str) -> Result<(), DriverError>;

    async fn press_button(&self, button: ButtonName) -> Result<(), DriverError>;

    /// Returns to the home screen.
    async fn home(&self) -> Result<(), DriverError>;

    /// Full-screen PNG bytes.
    async fn screenshot(&self) -> Result<Vec<u8>, DriverError>;

    /// Window size in points.
    async fn window_size(&self) -> Result<Size, DriverError>;

    async fn launch_app(&self, bundle_id: &str) -> Result<(), DriverError>;

    async fn terminate_app(&self, bundle_id: &str) -> Result<(), DriverError>;

    async fn active_app(&self) -> Result<ActiveApp, DriverError>;

    /// First element matching the locator, or `None`.
    async fn find_element(&self, using: Locator, value: &str) -> Result<Option<ElementRef>, DriverError>;

    async fn find_elements(&self, using: Locator, value: &str) -> Result<Vec<ElementRef>, DriverError>;

    async fn element_click(&self, element: &ElementRef) -> Result<(), DriverError>;

    async fn element_text(&self, element: &ElementRef) -> Result<String, DriverError>;

    async fn element_rect(&self, element: &ElementRef) -> Result<Frame, DriverError>;

    /// Accessibility tree as XML.
    async fn page_source(&self) -> Result<String, DriverError>;

    async fn set_clipboard(&self, text: &str) -> Result<(), DriverError>;

    async fn get_clipboard(&self) -> Result<String, DriverError>;

    async fn lock(&self) -> Result<(), DriverError>;

    async fn unlock(&self) -> Result<(), DriverError>;

    async fn is_locked(&self) -> Result<bool, DriverError>;
}
