//! USB tunnel to WebDriverAgent on physical iOS devices via usbmuxd.
//!
//! WDA listens on port 8100 inside the device. [`forward`] exposes that port
//! on a local TCP address by bridging every accepted connection to a fresh
//! usbmuxd tunnel, so the HTTP client can talk to `http://127.0.0.1:8100`
//! as if WDA were local.
//!
//! # Example
//!
//! ```no_run
//! use ocrtap_core::usb_tunnel;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let devices = usb_tunnel::list_devices().await?;
//! let device = &devices[0];
//!
//! let forward = usb_tunnel::forward(&device.udid, "127.0.0.1:8100".parse()?, 8100).await?;
//! println!("WDA available at {}", forward.url());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use idevice::usbmuxd::{Connection, UsbmuxdConnection};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Label reported to usbmuxd for our connections.
const USBMUXD_LABEL: &str = "ocrtap";

// ---------------------------------------------------------------------------
// Stream trait
// ---------------------------------------------------------------------------

/// A bidirectional async stream to a device port.
pub trait TunnelStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> TunnelStream for T {}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during USB tunnel operations.
#[derive(Error, Debug)]
pub enum UsbTunnelError {
    /// Failed to connect to the local usbmuxd daemon.
    #[error("failed to connect to usbmuxd: {0}")]
    UsbmuxdUnavailable(String),

    /// No device with the given UDID was found.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to establish a tunnel to the device port.
    #[error("tunnel connection failed: {0}")]
    ConnectionFailed(String),

    /// The tunnel connection returned no usable socket.
    #[error("tunnel socket unavailable")]
    NoSocket,

    /// The local listener could not be bound.
    #[error("cannot listen on {addr}: {reason}")]
    Bind { addr: SocketAddr, reason: String },
}

impl From<idevice::IdeviceError> for UsbTunnelError {
    fn from(err: idevice::IdeviceError) -> Self {
        UsbTunnelError::ConnectionFailed(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// PhysicalDevice
// ---------------------------------------------------------------------------

/// A physical iOS device discovered via usbmuxd.
#[derive(Debug, Clone, Serialize)]
pub struct PhysicalDevice {
    /// Unique Device Identifier (UDID).
    pub udid: String,
    /// The usbmuxd-assigned numeric device ID.
    pub device_id: u32,
    /// How the device is connected.
    pub connection: DeviceConnection,
}

/// How a physical device is connected to the host.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "lowercase")]
pub enum DeviceConnection {
    Usb,
    Network(IpAddr),
    Unknown(String),
}

impl fmt::Display for DeviceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceConnection::Usb => write!(f, "USB"),
            DeviceConnection::Network(ip) => write!(f, "Network ({ip})"),
            DeviceConnection::Unknown(s) => write!(f, "Unknown ({s})"),
        }
    }
}

impl From<Connection> for DeviceConnection {
    fn from(conn: Connection) -> Self {
        match conn {
            Connection::Usb => DeviceConnection::Usb,
            Connection::Network(ip) => DeviceConnection::Network(ip),
            Connection::Unknown(s) => DeviceConnection::Unknown(s),
        }
    }
}

// ---------------------------------------------------------------------------
// Discovery and single connections
// ---------------------------------------------------------------------------

async fn usbmuxd() -> Result<UsbmuxdConnection, UsbTunnelError> {
    UsbmuxdConnection::default()
        .await
        .map_err(|e| UsbTunnelError::UsbmuxdUnavailable(e.to_string()))
}

/// List all devices currently known to usbmuxd.
pub async fn list_devices() -> Result<Vec<PhysicalDevice>, UsbTunnelError> {
    let mut muxd = usbmuxd().await?;
    let devices = muxd
        .get_devices()
        .await
        .map_err(|e| UsbTunnelError::UsbmuxdUnavailable(e.to_string()))?;

    Ok(devices
        .into_iter()
        .map(|d| PhysicalDevice {
            udid: d.udid,
            device_id: d.device_id,
            connection: d.connection_type.into(),
        })
        .collect())
}

/// Open one tunnelled TCP stream to `port` on the device.
pub async fn connect(udid: &str, port: u16) -> Result<Box<dyn TunnelStream>, UsbTunnelError> {
    let mut muxd = usbmuxd().await?;
    let device = muxd
        .get_device(udid)
        .await
        .map_err(|_| UsbTunnelError::DeviceNotFound(udid.to_string()))?;

    let idevice = muxd
        .connect_to_device(device.device_id, port, USBMUXD_LABEL)
        .await?;
    let socket = idevice.get_socket().ok_or(UsbTunnelError::NoSocket)?;
    Ok(Box::new(socket))
}

// ---------------------------------------------------------------------------
// Port forwarding
// ---------------------------------------------------------------------------

/// A running local-port to device-port forward.
///
/// The accept loop stops when the handle is dropped or [`stop`](Self::stop)
/// is called. Connections already bridged keep running until either side
/// closes.
pub struct PortForward {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl PortForward {
    /// Binds `local_addr` and bridges each accepted connection to a stream
    /// produced by `connect`.
    pub async fn bind<F, Fut>(local_addr: SocketAddr, connect: F) -> Result<Self, UsbTunnelError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Box<dyn TunnelStream>, UsbTunnelError>> + Send + 'static,
    {
        let listener = TcpListener::bind(local_addr)
            .await
            .map_err(|e| UsbTunnelError::Bind {
                addr: local_addr,
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|e| UsbTunnelError::Bind {
            addr: local_addr,
            reason: e.to_string(),
        })?;
        let task = tokio::spawn(accept_loop(listener, Arc::new(connect)));
        Ok(Self { local_addr, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Base URL for an HTTP client pointed at the forward.
    pub fn url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for PortForward {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl fmt::Debug for PortForward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortForward")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

async fn accept_loop<F, Fut>(listener: TcpListener, connect: Arc<F>)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Box<dyn TunnelStream>, UsbTunnelError>> + Send + 'static,
{
    loop {
        let (mut inbound, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        let connect = Arc::clone(&connect);
        tokio::spawn(async move {
            let mut outbound = match connect().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(%peer, error = %e, "could not open device tunnel");
                    return;
                }
            };
            match tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await {
                Ok((sent, received)) => debug!(%peer, sent, received, "forwarded connection closed"),
                Err(e) => debug!(%peer, error = %e, "forwarded connection ended"),
            }
        });
    }
}

/// Forward `local_addr` to `device_port` on the device with `udid`.
///
/// Fails early if usbmuxd is down or the device is not attached.
pub async fn forward(
    udid: &str,
    local_addr: SocketAddr,
    device_port: u16,
) -> Result<PortForward, UsbTunnelError> {
    let mut muxd = usbmuxd().await?;
    muxd.get_device(udid)
        .await
        .map_err(|_| UsbTunnelError::DeviceNotFound(udid.to_string()))?;

    let udid_owned = udid.to_string();
    let forward = PortForward::bind(local_addr, move || {
        let udid = udid_owned.clone();
        async move { connect(&udid, device_port).await }
    })
    .await?;

    info!(udid, local = %forward.local_addr(), device_port, "port forward started");
    Ok(forward)
}
