//! Point-to-point envelope delivery.
//!
//! `send` is synchronous with respect to delivery only: `Ok(())` means the
//! receiving listener decoded and acknowledged the envelope, not that the
//! task ran.

pub mod frame;
pub mod listener;

use crate::domain::address::Address;
use crate::domain::config::TransportConfig;
use crate::domain::envelope::{Request, Response};
use crate::domain::error::{CommError, CommResult};
use serde::Serialize;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

pub use frame::{Ack, MAX_FRAME_SIZE};
pub use listener::EnvelopeListener;

/// Byte stream carrying frames, unix or TCP.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

async fn connect(address: &Address) -> io::Result<Box<dyn Stream>> {
    match address {
        Address::Tcp(host_port) => {
            let stream = TcpStream::connect(host_port.as_str()).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        Address::Unix(path) => Ok(Box::new(tokio::net::UnixStream::connect(path).await?)),
        #[cfg(not(unix))]
        Address::Unix(_) => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "unix sockets are not supported on this platform",
        )),
    }
}

/// Serialize `envelope` and deliver it to `address`, waiting for the
/// receiver's acknowledgement.
///
/// # Errors
///
/// - `Serialization` if the envelope cannot be encoded (no I/O happens)
/// - `TransportUnavailable` if the destination cannot be reached
/// - `Timeout` if the write or acknowledgement exceeds `write_timeout`
/// - `Rejected` if the receiver could not decode the envelope
pub async fn send_envelope<T: Serialize>(
    address: &Address,
    envelope: &T,
    write_timeout: Duration,
) -> CommResult<()> {
    let body = frame::encode(envelope)?;

    let unavailable = |reason: String| CommError::TransportUnavailable {
        address: address.to_string(),
        reason,
    };

    let mut stream = match tokio::time::timeout(write_timeout, connect(address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(unavailable(e.to_string())),
        Err(_) => return Err(unavailable(format!("connect timed out after {write_timeout:?}"))),
    };

    let exchange = async {
        frame::write_frame(&mut stream, &body).await?;
        frame::read_frame(&mut stream).await
    };

    let ack_body = match tokio::time::timeout(write_timeout, exchange).await {
        Ok(Ok(Some(ack))) => ack,
        Ok(Ok(None)) => return Err(unavailable("connection closed before acknowledgement".into())),
        Ok(Err(e)) => return Err(unavailable(e.to_string())),
        Err(_) => {
            return Err(CommError::Timeout {
                operation: format!("write to {address}"),
                after: write_timeout,
            })
        }
    };

    let ack: Ack = serde_json::from_slice(&ack_body)?;
    match ack.error {
        Some(error) => Err(CommError::Rejected(error)),
        None => Ok(()),
    }
}

/// Sends requests and responses using a [`TransportConfig`].
#[derive(Debug, Clone)]
pub struct Sender {
    config: TransportConfig,
}

impl Sender {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Deliver `request` to its task URL, or to the coordinator when it has none.
    pub async fn send(&self, request: &Request) -> CommResult<()> {
        let target = request.task_url().unwrap_or(&self.config.coordinator);
        self.send_to(target, request).await
    }

    /// Deliver `request` to an explicit address, ignoring its task URL.
    pub async fn send_to(&self, address: &Address, request: &Request) -> CommResult<()> {
        send_envelope(address, request, self.config.write_timeout).await?;
        debug!(
            request_id = %request.id(),
            task = request.task(),
            address = %address,
            "Request delivered"
        );
        Ok(())
    }

    /// Deliver a response to the hook of the request it answers.
    pub async fn respond(&self, hook: &Address, response: &Response) -> CommResult<()> {
        send_envelope(hook, response, self.config.write_timeout).await?;
        debug!(
            request_id = %response.id(),
            hook = %hook,
            success = response.is_success(),
            "Response delivered"
        );
        Ok(())
    }
}
