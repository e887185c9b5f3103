//! Connection layer seam
//!
//! The driver speaks its protocol over whatever byte stream a [`Transport`]
//! produces. The default is plain TCP, which presents no host key; transports
//! for key-presenting protocols attach one to the connection, which triggers
//! the host-fingerprint check before any request data is written.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpStream};
use towline_types::HostKey;
use tracing::debug;

use crate::error::{EngineCode, TransferError};

/// A duplex byte stream usable by the driver.
pub trait TransferStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> TransferStream for T {}

/// An established connection.
pub struct Connection {
    /// The byte stream to the remote host (or proxy).
    pub stream: Box<dyn TransferStream>,
    /// Host key presented during connection setup, for transports that have
    /// one. `None` skips the fingerprint check.
    pub peer_key: Option<HostKey>,
}

/// Connection factory used by the driver.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<Connection, TransferError>;
}

/// The default transport: plain TCP, no host key.
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, host: &str, port: u16) -> Result<Connection, TransferError> {
        let addrs: Vec<_> = lookup_host((host, port))
            .await
            .map_err(|e| {
                TransferError::engine(EngineCode::CouldntResolveHost, format!("{}: {}", host, e))
            })?
            .collect();

        if addrs.is_empty() {
            return Err(TransferError::engine(
                EngineCode::CouldntResolveHost,
                format!("{}: no addresses", host),
            ));
        }

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    debug!("connected to {} ({})", host, addr);
                    let _ = stream.set_nodelay(true);
                    return Ok(Connection {
                        stream: Box::new(stream),
                        peer_key: None,
                    });
                }
                Err(e) => last_error = Some(e),
            }
        }

        let detail = match last_error {
            Some(e) => format!("{}:{}: {}", host, port, e),
            None => format!("{}:{}", host, port),
        };
        Err(TransferError::engine(EngineCode::CouldntConnect, detail))
    }
}
