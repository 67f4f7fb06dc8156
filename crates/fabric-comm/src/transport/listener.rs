//! Envelope listener shared by trackers (responses) and providers (requests).

use crate::domain::address::Address;
use crate::domain::error::{CommError, CommResult, ErrorKind, TaskError};
use crate::transport::frame::{self, Ack};
use crate::transport::Stream;
use serde::de::DeserializeOwned;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept so a persistent error (EMFILE) cannot spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

enum Bound {
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
    Tcp(TcpListener),
}

/// A bound endpoint accepting framed envelopes.
pub struct EnvelopeListener {
    bound: Bound,
    address: Address,
}

impl EnvelopeListener {
    /// Bind the endpoint. For `tcp://host:0` the reported address carries the
    /// port actually assigned.
    pub async fn bind(address: &Address) -> CommResult<Self> {
        let bind_error = |e: io::Error| CommError::Bind {
            address: address.to_string(),
            reason: e.to_string(),
        };

        match address {
            Address::Tcp(host_port) => {
                let listener = TcpListener::bind(host_port.as_str()).await.map_err(bind_error)?;
                let local = listener.local_addr().map_err(bind_error)?;
                Ok(Self {
                    bound: Bound::Tcp(listener),
                    address: Address::Tcp(local.to_string()),
                })
            }
            #[cfg(unix)]
            Address::Unix(path) => {
                let listener = match tokio::net::UnixListener::bind(path) {
                    Ok(listener) => listener,
                    Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                        if !is_stale_socket(path).await {
                            return Err(bind_error(e));
                        }
                        warn!(path = %path.display(), "Removing stale socket file");
                        std::fs::remove_file(path).map_err(bind_error)?;
                        tokio::net::UnixListener::bind(path).map_err(bind_error)?
                    }
                    Err(e) => return Err(bind_error(e)),
                };
                Ok(Self {
                    bound: Bound::Unix(listener),
                    address: address.clone(),
                })
            }
            #[cfg(not(unix))]
            Address::Unix(_) => Err(CommError::Bind {
                address: address.to_string(),
                reason: "unix sockets are not supported on this platform".into(),
            }),
        }
    }

    pub fn local_address(&self) -> &Address {
        &self.address
    }

    async fn accept(&self) -> io::Result<Box<dyn Stream>> {
        match &self.bound {
            #[cfg(unix)]
            Bound::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Box::new(stream))
            }
            Bound::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
        }
    }

    /// Accept connections until `shutdown` flips to true (or its sender is
    /// dropped). Each decoded envelope is handed to `on_envelope` before the
    /// acknowledgement is written, so `on_envelope` must not block.
    pub async fn serve<T, F>(self, on_envelope: F, mut shutdown: watch::Receiver<bool>)
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let on_envelope = Arc::new(on_envelope);
        let mut connections = JoinSet::new();

        info!(address = %self.address, "Listener started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = self.accept() => match accepted {
                    Ok(stream) => {
                        let on_envelope = on_envelope.clone();
                        let address = self.address.clone();
                        connections.spawn(handle_connection::<T, F>(stream, on_envelope, address));
                    }
                    Err(e) => {
                        error!(address = %self.address, error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        connections.shutdown().await;
        info!(address = %self.address, "Listener stopped");
    }
}

impl Drop for EnvelopeListener {
    fn drop(&mut self) {
        if let Some(path) = self.address.socket_path() {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove socket file"),
            }
        }
    }
}

/// A socket file nobody accepts on, left behind by a process that exited
/// without unbinding.
#[cfg(unix)]
async fn is_stale_socket(path: &std::path::Path) -> bool {
    match tokio::net::UnixStream::connect(path).await {
        Ok(_) => false,
        Err(e) => e.kind() == io::ErrorKind::ConnectionRefused,
    }
}

async fn handle_connection<T, F>(mut stream: Box<dyn Stream>, on_envelope: Arc<F>, address: Address)
where
    T: DeserializeOwned,
    F: Fn(T),
{
    loop {
        let body = match frame::read_frame(&mut stream).await {
            Ok(Some(body)) => body,
            Ok(None) => break,
            Err(e) => {
                warn!(address = %address, error = %e, "Dropping connection after read error");
                break;
            }
        };

        let ack = match serde_json::from_slice::<T>(&body) {
            Ok(envelope) => {
                on_envelope(envelope);
                Ack::accepted()
            }
            Err(e) => {
                warn!(address = %address, error = %e, "Rejected undecodable envelope");
                Ack::rejected(TaskError::new(ErrorKind::Serialization, e.to_string()))
            }
        };

        let ack = match frame::encode(&ack) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "Failed to encode acknowledgement");
                break;
            }
        };
        if let Err(e) = frame::write_frame(&mut stream, &ack).await {
            debug!(address = %address, error = %e, "Peer went away before acknowledgement");
            break;
        }
    }
}
