// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Stream transports: TCP and Unix domain sockets.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::error::{IpcError, IpcResult};

// =============================================================================
// IpcStream
// =============================================================================

/// A duplex byte stream usable as an IPC connection.
pub trait IpcStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> IpcStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// A type-erased connection.
pub type BoxedStream = Box<dyn IpcStream>;

// =============================================================================
// IpcEndpoint
// =============================================================================

/// Where an IPC peer listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IpcEndpoint {
    /// TCP host and port.
    Tcp {
        /// Host name or address.
        host: String,
        /// Port.
        port: u16,
    },
    /// Unix domain socket path.
    Unix(PathBuf),
}

impl IpcEndpoint {
    /// A TCP endpoint.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// A Unix socket endpoint.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::Unix(path.into())
    }
}

impl fmt::Display for IpcEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpcEndpoint::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            IpcEndpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

impl FromStr for IpcEndpoint {
    type Err = IpcError;

    /// Parses `tcp://host:port`, `unix:///path`, or a bare `host:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| IpcError::InvalidEndpoint {
            endpoint: s.to_string(),
            reason: reason.to_string(),
        };

        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(invalid("empty socket path"));
            }
            return Ok(IpcEndpoint::unix(path));
        }

        let address = s.strip_prefix("tcp://").unwrap_or(s);
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected host:port"))?;
        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        let port = port.parse::<u16>().map_err(|_| invalid("invalid port"))?;
        Ok(IpcEndpoint::tcp(host, port))
    }
}

// =============================================================================
// Connect / Listen
// =============================================================================

/// Connects to an endpoint within `timeout`.
///
/// # Errors
///
/// - `IpcError::ConnectTimeout` - The connection did not complete in time
/// - `IpcError::Io` - The connection was refused or failed
pub async fn connect(endpoint: &IpcEndpoint, timeout: Duration) -> IpcResult<BoxedStream> {
    let attempt = async {
        let stream: BoxedStream = match endpoint {
            IpcEndpoint::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                stream.set_nodelay(true)?;
                Box::new(stream)
            }
            #[cfg(unix)]
            IpcEndpoint::Unix(path) => Box::new(tokio::net::UnixStream::connect(path).await?),
            #[cfg(not(unix))]
            IpcEndpoint::Unix(_) => {
                return Err(IpcError::InvalidEndpoint {
                    endpoint: endpoint.to_string(),
                    reason: "Unix sockets are not supported on this platform".to_string(),
                })
            }
        };
        Ok::<_, IpcError>(stream)
    };

    let stream = tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| IpcError::ConnectTimeout {
            endpoint: endpoint.to_string(),
            timeout,
        })??;
    debug!(endpoint = %endpoint, "Connected");
    Ok(stream)
}

/// A bound listener.
#[derive(Debug)]
pub enum IpcListener {
    /// TCP listener.
    Tcp(TcpListener),
    /// Unix socket listener and its path.
    #[cfg(unix)]
    Unix(tokio::net::UnixListener, PathBuf),
}

impl IpcListener {
    /// Binds an endpoint. TCP port 0 picks a free port.
    ///
    /// A stale Unix socket file at the path is removed first.
    pub async fn bind(endpoint: &IpcEndpoint) -> IpcResult<Self> {
        match endpoint {
            IpcEndpoint::Tcp { host, port } => {
                Ok(IpcListener::Tcp(TcpListener::bind((host.as_str(), *port)).await?))
            }
            #[cfg(unix)]
            IpcEndpoint::Unix(path) => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                Ok(IpcListener::Unix(tokio::net::UnixListener::bind(path)?, path.clone()))
            }
            #[cfg(not(unix))]
            IpcEndpoint::Unix(_) => Err(IpcError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: "Unix sockets are not supported on this platform".to_string(),
            }),
        }
    }

    /// Returns the bound endpoint, with the actual TCP port.
    pub fn local_endpoint(&self) -> IpcResult<IpcEndpoint> {
        match self {
            IpcListener::Tcp(listener) => {
                let addr = listener.local_addr()?;
                Ok(IpcEndpoint::tcp(addr.ip().to_string(), addr.port()))
            }
            #[cfg(unix)]
            IpcListener::Unix(_, path) => Ok(IpcEndpoint::unix(path.clone())),
        }
    }

    /// Accepts one connection, returning it with a peer description.
    pub async fn accept(&self) -> IpcResult<(BoxedStream, String)> {
        match self {
            IpcListener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok((Box::new(stream), addr.to_string()))
            }
            #[cfg(unix)]
            IpcListener::Unix(listener, path) => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), path.display().to_string()))
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoints() {
        assert_eq!("127.0.0.1:9000".parse::<IpcEndpoint>().unwrap(), IpcEndpoint::tcp("127.0.0.1", 9000));
        assert_eq!("tcp://localhost:1".parse::<IpcEndpoint>().unwrap(), IpcEndpoint::tcp("localhost", 1));
        assert_eq!(
            "unix:///tmp/vigil.sock".parse::<IpcEndpoint>().unwrap(),
            IpcEndpoint::unix("/tmp/vigil.sock")
        );
        assert!("localhost".parse::<IpcEndpoint>().is_err());
        assert!("localhost:99999".parse::<IpcEndpoint>().is_err());
        assert!("unix://".parse::<IpcEndpoint>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(IpcEndpoint::tcp("h", 5).to_string(), "tcp://h:5");
    }

    #[tokio::test]
    async fn test_tcp_bind_and_connect() {
        let listener = IpcListener::bind(&IpcEndpoint::tcp("127.0.0.1", 0)).await.unwrap();
        let endpoint = listener.local_endpoint().unwrap();

        let (client, server) = tokio::join!(connect(&endpoint, Duration::from_secs(5)), listener.accept());
        assert!(client.is_ok());
        assert!(server.is_ok());
    }
}
