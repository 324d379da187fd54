//! HTTP client for a WebDriverAgent endpoint.
//!
//! [`WdaClient`] is the low-level transport: it turns a [`Request`] into an
//! HTTP call against a forwarded WDA port (normally `http://localhost:8100`),
//! unwraps the response envelope, and classifies WDA errors. It holds no
//! session state; see [`WdaDriver`](crate::wda_driver::WdaDriver) for that.
//!
//! # Example
//!
//! ```no_run
//! use ocrtap_core::wda_client::WdaClient;
//! use ocrtap_core::protocol::Request;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = WdaClient::new("http://localhost:8100")?;
//! let status = client.status().await?;
//! assert!(status.ready);
//!
//! let session = client.create_session(None).await?;
//! client.send(&Request::Tap { x: 100, y: 200 }, Some(&session)).await?;
//! client.delete_session(&session).await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, debug_span, trace, Instrument};

use crate::protocol::{
    decode_base64, Envelope, Method, ProtocolError, Request, WdaStatus,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Where iproxy / usbmux forwarding conventionally exposes WDA.
pub const DEFAULT_WDA_URL: &str = "http://localhost:8100";

/// Timeout for establishing the TCP connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for a full request/response exchange.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the `/status` health check.
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while talking to WDA.
#[derive(Error, Debug)]
pub enum WdaClientError {
    /// WDA could not be reached.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The session id is unknown to WDA (expired or deleted).
    #[error("invalid session: {0}")]
    InvalidSession(String),

    /// An element lookup matched nothing.
    #[error("no such element: {0}")]
    NoSuchElement(String),

    /// WDA reported an error or a non-success HTTP status.
    #[error("WDA error ({status}) {error}: {message}")]
    Status {
        status: u16,
        error: String,
        message: String,
    },

    /// The reply could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Any other transport failure.
    #[error("HTTP error: {0}")]
    Http(String),
}

fn map_reqwest_error(err: reqwest::Error) -> WdaClientError {
    if err.is_timeout() {
        WdaClientError::Timeout
    } else if err.is_connect() {
        WdaClientError::ConnectionFailed(err.to_string())
    } else {
        WdaClientError::Http(err.to_string())
    }
}

/// Turns a status code and parsed body into a result.
fn classify(status: u16, parsed: Result<Envelope, ProtocolError>) -> Result<Envelope, WdaClientError> {
    let envelope = match parsed {
        Ok(envelope) => envelope,
        Err(e) if status >= 400 => {
            return Err(WdaClientError::Status {
                status,
                error: "http error".into(),
                message: e.to_string(),
            })
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(err) = envelope.error() {
        if err.is_invalid_session() {
            return Err(WdaClientError::InvalidSession(err.message));
        }
        if err.is_no_such_element() {
            return Err(WdaClientError::NoSuchElement(err.message));
        }
        return Err(WdaClientError::Status {
            status,
            error: err.error,
            message: err.message,
        });
    }

    if status >= 400 {
        return Err(WdaClientError::Status {
            status,
            error: "http error".into(),
            message: envelope.value.to_string(),
        });
    }

    Ok(envelope)
}

// ---------------------------------------------------------------------------
// WdaClient
// ---------------------------------------------------------------------------

/// Stateless HTTP client for one WDA endpoint.
#[derive(Debug, Clone)]
pub struct WdaClient {
    http: reqwest::Client,
    base_url: String,
}

impl WdaClient {
    /// Creates a client with the default 30 s request timeout.
    pub fn new(base_url: impl Into<String>) -> Result<Self, WdaClientError> {
        Self::with_timeout(base_url, READ_TIMEOUT)
    }

    /// Creates a client with a custom request timeout.
    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, WdaClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| WdaClientError::Http(e.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends a request and returns the envelope's `value`.
    pub async fn send(&self, request: &Request, session: Option<&str>) -> Result<Value, WdaClientError> {
        self.send_envelope(request, session, None)
            .await
            .map(|envelope| envelope.value)
    }

    /// Sends a request and returns the whole envelope.
    ///
    /// `timeout` overrides the client-wide request timeout for this call.
    pub async fn send_envelope(
        &self,
        request: &Request,
        session: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Envelope, WdaClientError> {
        let path = request.path(session)?;
        let url = format!("{}{}", self.base_url, path);
        let span = debug_span!("wda_request", route = request.name(), path = %path);

        async {
            let mut builder = match request.method() {
                Method::Get => self.http.get(&url),
                Method::Post => self.http.post(&url),
                Method::Delete => self.http.delete(&url),
            };
            if let Some(body) = request.body() {
                builder = builder.json(&body);
            }
            if let Some(timeout) = timeout {
                builder = builder.timeout(timeout);
            }

            let response = builder.send().await.map_err(map_reqwest_error)?;
            let status = response.status().as_u16();
            let text = response.text().await.map_err(map_reqwest_error)?;
            trace!(status, bytes = text.len(), "response received");

            let result = classify(status, Envelope::parse(&text));
            if let Err(e) = &result {
                debug!(error = %e, "request failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Health check against `/status`.
    pub async fn status(&self) -> Result<WdaStatus, WdaClientError> {
        let envelope = self
            .send_envelope(&Request::Status, None, Some(STATUS_TIMEOUT))
            .await?;
        Ok(WdaStatus::from_value(&envelope.value))
    }

    /// Opens a new session and returns its id.
    pub async fn create_session(&self, bundle_id: Option<&str>) -> Result<String, WdaClientError> {
        let request = Request::CreateSession {
            bundle_id: bundle_id.map(String::from),
        };
        let envelope = self.send_envelope(&request, None, None).await?;
        let session = envelope.session_id().ok_or(ProtocolError::NoSessionId)?;
        debug!(session = %session, "session created");
        Ok(session)
    }

    pub async fn delete_session(&self, session: &str) -> Result<(), WdaClientError> {
        self.send(&Request::DeleteSession, Some(session)).await?;
        Ok(())
    }

    /// Full-screen screenshot as PNG bytes.
    pub async fn screenshot_png(&self) -> Result<Vec<u8>, WdaClientError> {
        let value = self.send(&Request::Screenshot, None).await?;
        Ok(decode_base64(&value, "screenshot")?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
