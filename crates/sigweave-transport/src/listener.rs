use std::time::{Duration, Instant};

use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::stream::LinkStream;
use crate::tcp::TcpSocket;

#[cfg(unix)]
use crate::uds::UnixDomainSocket;

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// A bound endpoint waiting for peers, independent of the carrier.
pub enum LinkListener {
    Tcp(TcpSocket),
    #[cfg(unix)]
    Unix(UnixDomainSocket),
}

impl LinkListener {
    /// Bind the given endpoint.
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => Ok(Self::Tcp(TcpSocket::bind(addr)?)),
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(Self::Unix(UnixDomainSocket::bind(path)?)),
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(TransportError::Unsupported(endpoint.to_string())),
        }
    }

    /// Accept one peer, waiting at most `timeout` (`None` waits forever).
    pub fn accept(&self, timeout: Option<Duration>) -> Result<LinkStream> {
        match self {
            Self::Tcp(socket) => socket.accept(timeout),
            #[cfg(unix)]
            Self::Unix(socket) => socket.accept(timeout),
        }
    }

    /// The endpoint actually bound (resolves TCP port 0).
    pub fn local_endpoint(&self) -> Endpoint {
        match self {
            Self::Tcp(socket) => Endpoint::Tcp(socket.local_addr().to_string()),
            #[cfg(unix)]
            Self::Unix(socket) => Endpoint::Unix(socket.path().to_path_buf()),
        }
    }
}

/// Connect once to a listening endpoint.
pub fn connect(endpoint: &Endpoint, timeout: Option<Duration>) -> Result<LinkStream> {
    match endpoint {
        Endpoint::Tcp(addr) => TcpSocket::connect(addr, timeout),
        #[cfg(unix)]
        Endpoint::Unix(path) => UnixDomainSocket::connect(path),
        #[cfg(not(unix))]
        Endpoint::Unix(_) => {
            let _ = timeout;
            Err(TransportError::Unsupported(endpoint.to_string()))
        }
    }
}

/// Connect to an endpoint, retrying until `timeout` elapses.
///
/// The peer's listener may not be up yet when an initiator starts, so
/// refused or missing endpoints are retried. Other errors fail fast.
pub fn connect_with_retry(endpoint: &Endpoint, timeout: Duration) -> Result<LinkStream> {
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        match connect(endpoint, Some(remaining.max(CONNECT_RETRY_INTERVAL))) {
            Ok(stream) => return Ok(stream),
            Err(TransportError::Connect { source, .. }) if is_retryable(&source) => {
                if Instant::now() >= deadline {
                    debug!(%endpoint, attempts, "giving up on connect");
                    return Err(TransportError::Timeout(timeout));
                }
                std::thread::sleep(CONNECT_RETRY_INTERVAL);
            }
            Err(err) => return Err(err),
        }
    }
}

fn is_retryable(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::NotFound
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::AddrNotAvailable
    )
}
