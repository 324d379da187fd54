//! [`AutomationDriver`] implementation backed by WebDriverAgent.
//!
//! [`WdaDriver`] owns a [`WdaClient`] and the current WDA session id. The
//! session is created on [`connect`](AutomationDriver::connect) or lazily on
//! the first session-scoped command. When WDA reports the session as invalid
//! (it expired, WDA restarted, or the app under test was relaunched), the
//! driver opens a fresh session with the same capabilities and retries the
//! command once.
//!
//! # Example
//!
//! ```no_run
//! use ocrtap_core::wda_driver::WdaDriver;
//! use ocrtap_core::driver::AutomationDriver;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = WdaDriver::new("http://localhost:8100")?;
//! driver.connect().await?;
//! driver.tap_location(195, 420).await?;
//! driver.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::driver::{AutomationDriver, DriverConfig, DriverError};
use crate::element::{ElementRef, Frame, Size};
use crate::protocol::{
    decode_base64, decode_bool, decode_element, decode_elements, decode_frame, decode_size,
    decode_string, ActiveApp, ButtonName, Locator, Request, WdaStatus,
};
use crate::usb_tunnel::{self, PortForward};
use crate::wda_client::{WdaClient, WdaClientError};

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Maps a [`WdaClientError`] to a [`DriverError`].
fn map_client_error(err: WdaClientError) -> DriverError {
    match err {
        WdaClientError::ConnectionFailed(msg) => DriverError::ConnectionLost(msg),
        WdaClientError::Timeout => DriverError::Timeout,
        WdaClientError::InvalidSession(msg) => DriverError::SessionExpired(msg),
        WdaClientError::NoSuchElement(msg) => {
            DriverError::CommandFailed(format!("no such element: {msg}"))
        }
        e @ WdaClientError::Status { .. } => DriverError::CommandFailed(e.to_string()),
        WdaClientError::Protocol(e) => DriverError::Protocol(e),
        WdaClientError::Http(msg) => DriverError::CommandFailed(msg),
    }
}

// ---------------------------------------------------------------------------
// WdaDriver
// ---------------------------------------------------------------------------

/// An [`AutomationDriver`] that talks HTTP to WebDriverAgent.
pub struct WdaDriver {
    client: WdaClient,
    bundle_id: Option<String>,
    session: Mutex<Option<String>>,
    // Mirrors `session.is_some()`, readable without the lock.
    connected: AtomicBool,
    // Keeps the usbmuxd forward alive for the driver's lifetime.
    _forward: Option<PortForward>,
}

impl WdaDriver {
    /// Creates a driver for an already-forwarded WDA URL.
    ///
    /// No request is made until [`connect`](AutomationDriver::connect) or the
    /// first command.
    pub fn new(url: impl Into<String>) -> Result<Self, DriverError> {
        let client = WdaClient::new(url).map_err(map_client_error)?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: WdaClient) -> Self {
        Self {
            client,
            bundle_id: None,
            session: Mutex::new(None),
            connected: AtomicBool::new(false),
            _forward: None,
        }
    }

    /// Sessions will be opened with this app as `bundleId` capability.
    pub fn with_bundle_id(mut self, bundle_id: impl Into<String>) -> Self {
        self.bundle_id = Some(bundle_id.into());
        self
    }

    /// Builds a driver from a [`DriverConfig`].
    ///
    /// For [`DriverConfig::Device`] this starts a usbmuxd port forward that
    /// lives as long as the driver.
    pub async fn from_config(config: &DriverConfig, timeout: Duration) -> Result<Self, DriverError> {
        match config {
            DriverConfig::Wda { url } => {
                let client = WdaClient::with_timeout(url.clone(), timeout).map_err(map_client_error)?;
                Ok(Self::with_client(client))
            }
            DriverConfig::Device {
                udid,
                local_port,
                device_port,
            } => {
                let local = SocketAddr::from(([127, 0, 0, 1], *local_port));
                let forward = usb_tunnel::forward(udid, local, *device_port).await?;
                let client =
                    WdaClient::with_timeout(forward.url(), timeout).map_err(map_client_error)?;
                let mut driver = Self::with_client(client);
                driver._forward = Some(forward);
                Ok(driver)
            }
        }
    }

    pub fn client(&self) -> &WdaClient {
        &self.client
    }

    /// The current session id, if one is open.
    pub async fn session_id(&self) -> Option<String> {
        self.session.lock().await.clone()
    }

    /// Returns the open session, creating one if needed.
    async fn ensure_session(&self) -> Result<String, WdaClientError> {
        let mut guard = self.session.lock().await;
        if let Some(id) = guard.as_ref() {
            return Ok(id.clone());
        }
        let id = self.client.create_session(self.bundle_id.as_deref()).await?;
        info!(session = %id, "WDA session opened");
        *guard = Some(id.clone());
        self.connected.store(true, Ordering::SeqCst);
        Ok(id)
    }

    /// Replaces `stale` with a fresh session.
    ///
    /// If the stored id already differs from `stale`, another caller
    /// recreated it first and that id is returned.
    async fn recreate_session(&self, stale: &str) -> Result<String, WdaClientError> {
        let mut guard = self.session.lock().await;
        if let Some(current) = guard.as_ref().filter(|id| id.as_str() != stale) {
            return Ok(current.clone());
        }
        *guard = None;
        self.connected.store(false, Ordering::SeqCst);
        let id = self.client.create_session(self.bundle_id.as_deref()).await?;
        info!(old = stale, new = %id, "WDA session recreated");
        *guard = Some(id.clone());
        self.connected.store(true, Ordering::SeqCst);
        Ok(id)
    }

    /// Sends a request, attaching the session and recreating it once if
    /// WDA reports it invalid.
    async fn send_raw(&self, request: &Request) -> Result<Value, WdaClientError> {
        if !request.needs_session() {
            return self.client.send(request, None).await;
        }

        let session = self.ensure_session().await?;
        match self.client.send(request, Some(&session)).await {
            Err(WdaClientError::InvalidSession(reason)) => {
                warn!(
                    session = %session,
                    request = request.name(),
                    reason = %reason,
                    "session invalid, recreating"
                );
                let fresh = self.recreate_session(&session).await?;
                self.client.send(request, Some(&fresh)).await
            }
            other => other,
        }
    }

    async fn send(&self, request: &Request) -> Result<Value, DriverError> {
        self.send_raw(request).await.map_err(map_client_error)
    }
}

#[async_trait]
impl AutomationDriver for WdaDriver {
    #[instrument(skip(self), level = "debug")]
    async fn connect(&self) -> Result<(), DriverError> {
        let status = self.client.status().await.map_err(map_client_error)?;
        if !status.ready {
            return Err(DriverError::ConnectionLost(format!(
                "WebDriverAgent at {} is not ready: {}",
                self.client.base_url(),
                status.message.unwrap_or_default()
            )));
        }
        self.ensure_session().await.map_err(map_client_error)?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    #[instrument(skip(self), level = "debug")]
    async fn status(&self) -> Result<WdaStatus, DriverError> {
        self.client.status().await.map_err(map_client_error)
    }

    #[instrument(skip(self), level = "debug")]
    async fn disconnect(&self) -> Result<(), DriverError> {
        let session = self.session.lock().await.take();
        self.connected.store(false, Ordering::SeqCst);
        let Some(id) = session else {
            return Ok(());
        };
        match self.client.delete_session(&id).await {
            Ok(()) | Err(WdaClientError::InvalidSession(_)) => {
                debug!(session = %id, "WDA session closed");
                Ok(())
            }
            Err(e) => Err(map_client_error(e)),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn tap_location(&self, x: i32, y: i32) -> Result<(), DriverError> {
        self.send(&Request::Tap { x, y }).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn double_tap(&self, x: i32, y: i32) -> Result<(), DriverError> {
        self.send(&Request::DoubleTap { x, y }).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn long_press(&self, x: i32, y: i32, duration: f64) -> Result<(), DriverError> {
        self.send(&Request::TouchAndHold { x, y, duration }).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn swipe(
        &self,
        start_x: i32,
        start_y: i32,
        end_x: i32,
        end_y: i32,
        duration: f64,
    ) -> Result<(), DriverError> {
        self.send(&Request::Drag {
            from_x: start_x,
            from_y: start_y,
            to_x: end_x,
            to_y: end_y,
            duration,
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self, text), level = "debug", fields(len = text.len()))]
    async fn type_text(&self, text: &str) -> Result<(), DriverError> {
        if text.is_empty() {
            return Ok(());
        }
        self.send(&Request::Keys {
            text: text.to_string(),
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn press_button(&self, button: ButtonName) -> Result<(), DriverError> {
        self.send(&Request::PressButton { button }).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn home(&self) -> Result<(), DriverError> {
        self.send(&Request::Homescreen).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        let value = self.send(&Request::Screenshot).await?;
        Ok(decode_base64(&value, "screenshot")?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn window_size(&self) -> Result<Size, DriverError> {
        let value = self.send(&Request::WindowSize).await?;
        Ok(decode_size(&value)?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn launch_app(&self, bundle_id: &str) -> Result<(), DriverError> {
        self.send(&Request::LaunchApp {
            bundle_id: bundle_id.to_string(),
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn terminate_app(&self, bundle_id: &str) -> Result<(), DriverError> {
        self.send(&Request::TerminateApp {
            bundle_id: bundle_id.to_string(),
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn active_app(&self) -> Result<ActiveApp, DriverError> {
        let value = self.send(&Request::ActiveAppInfo).await?;
        Ok(ActiveApp::from_value(&value)?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn find_element(&self, using: Locator, value: &str) -> Result<Option<ElementRef>, DriverError> {
        let request = Request::FindElement {
            using,
            value: value.to_string(),
        };
        match self.send_raw(&request).await {
            Ok(v) => Ok(Some(decode_element(&v)?)),
            Err(WdaClientError::NoSuchElement(_)) => Ok(None),
            Err(e) => Err(map_client_error(e)),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn find_elements(&self, using: Locator, value: &str) -> Result<Vec<ElementRef>, DriverError> {
        let request = Request::FindElements {
            using,
            value: value.to_string(),
        };
        match self.send_raw(&request).await {
            Ok(v) => Ok(decode_elements(&v)?),
            Err(WdaClientError::NoSuchElement(_)) => Ok(Vec::new()),
            Err(e) => Err(map_client_error(e)),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn element_click(&self, element: &ElementRef) -> Result<(), DriverError> {
        self.send(&Request::ElementClick {
            element: element.clone(),
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn element_text(&self, element: &ElementRef) -> Result<String, DriverError> {
        let value = self
            .send(&Request::ElementText {
                element: element.clone(),
            })
            .await?;
        Ok(decode_string(&value, "element text")?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn element_rect(&self, element: &ElementRef) -> Result<Frame, DriverError> {
        let value = self
            .send(&Request::ElementRect {
                element: element.clone(),
            })
            .await?;
        Ok(decode_frame(&value)?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn page_source(&self) -> Result<String, DriverError> {
        let value = self.send(&Request::Source).await?;
        Ok(decode_string(&value, "page source")?)
    }

    #[instrument(skip(self, text), level = "debug", fields(len = text.len()))]
    async fn set_clipboard(&self, text: &str) -> Result<(), DriverError> {
        self.send(&Request::SetPasteboard {
            content: text.to_string(),
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_clipboard(&self) -> Result<String, DriverError> {
        let value = self.send(&Request::GetPasteboard).await?;
        let bytes = decode_base64(&value, "pasteboard")?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    #[instrument(skip(self), level = "debug")]
    async fn lock(&self) -> Result<(), DriverError> {
        self.send(&Request::Lock).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn unlock(&self) -> Result<(), DriverError> {
        self.send(&Request::Unlock).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn is_locked(&self) -> Result<bool, DriverError> {
        let value = self.send(&Request::Locked).await?;
        Ok(decode_bool(&value, "locked")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolError;

    #[test]
    fn map_connection_failed() {
        let err = map_client_error(WdaClientError::ConnectionFailed("refused".into()));
        assert!(matches!(err, DriverError::ConnectionLost(msg) if msg == "refused"));
    }

    #[test]
    fn map_invalid_session() {
        let err = map_client_error(WdaClientError::InvalidSession("gone".into()));
        assert!(matches!(err, DriverError::SessionExpired(_)));
    }

    #[test]
    fn map_status_keeps_wda_message() {
        let err = map_client_error(WdaClientError::Status {
            status: 500,
            error: "unknown error".into(),
            message: "app not installed".into(),
        });
        match err {
            DriverError::CommandFailed(msg) => assert!(msg.contains("app not installed")),
            other => panic!("expected CommandFailed, got: {other:?}"),
        }
    }

    #[test]
    fn map_protocol_and_timeout() {
        assert!(matches!(
            map_client_error(WdaClientError::Protocol(ProtocolError::NoSessionId)),
            DriverError::Protocol(ProtocolError::NoSessionId)
        ));
        assert!(matches!(
            map_client_error(WdaClientError::Timeout),
            DriverError::Timeout
        ));
    }

    #[test]
    fn new_driver_is_disconnected() {
        let driver = WdaDriver::new("http://localhost:8100").unwrap();
        assert!(!driver.is_connected());
        assert_eq!(driver.client().base_url(), "http://localhost:8100");
    }

    #[tokio::test]
    async fn connected_while_session_lock_is_held() {
        let driver = WdaDriver::new("http://127.0.0.1:9").unwrap();
        let mut guard = driver.session.lock().await;
        *guard = Some("session-1".into());
        driver.connected.store(true, Ordering::SeqCst);
        assert!(driver.is_connected());
        drop(guard);

        driver.disconnect().await.ok();
        assert!(!driver.is_connected());
    }

    #[tokio::test]
    async fn disconnect_without_session_is_noop() {
        let driver = WdaDriver::new("http://127.0.0.1:9").unwrap();
        driver.disconnect().await.unwrap();
        assert!(driver.session_id().await.is_none());
    }
}
