use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::LinkStream;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// TCP carrier, used when the peer pipeline runs on another host.
pub struct TcpSocket {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpSocket {
    /// Bind and listen on `addr` (`host:port`; port 0 picks a free port).
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind {
            endpoint: addr.to_string(),
            source: e,
        })?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "listening on tcp");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection, waiting at most `timeout`.
    pub fn accept(&self, timeout: Option<Duration>) -> Result<LinkStream> {
        let Some(timeout) = timeout else {
            self.listener
                .set_nonblocking(false)
                .map_err(TransportError::Accept)?;
            let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
            debug!(%peer, "accepted tcp connection");
            return Ok(LinkStream::from_tcp(stream));
        };

        self.listener
            .set_nonblocking(true)
            .map_err(TransportError::Accept)?;
        let deadline = Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    debug!(%peer, "accepted tcp connection");
                    return Ok(LinkStream::from_tcp(stream));
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(TransportError::Timeout(timeout));
                    }
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Accept(err)),
            }
        }
    }

    /// Connect to a listening TCP peer.
    pub fn connect(addr: &str, timeout: Option<Duration>) -> Result<LinkStream> {
        let connect_err = |source: std::io::Error| TransportError::Connect {
            endpoint: addr.to_string(),
            source,
        };
        let stream = match timeout {
            Some(timeout) => {
                let resolved = addr.to_socket_addrs().map_err(connect_err)?;
                let mut last_err = None;
                let mut connected = None;
                for candidate in resolved {
                    match TcpStream::connect_timeout(&candidate, timeout) {
                        Ok(stream) => {
                            connected = Some(stream);
                            break;
                        }
                        Err(err) => last_err = Some(err),
                    }
                }
                match connected {
                    Some(stream) => stream,
                    None => {
                        return Err(connect_err(last_err.unwrap_or_else(|| {
                            std::io::Error::new(
                                std::io::ErrorKind::AddrNotAvailable,
                                "address resolved to nothing",
                            )
                        })))
                    }
                }
            }
            None => TcpStream::connect(addr).map_err(connect_err)?,
        };
        debug!(addr, "connected over tcp");
        Ok(LinkStream::from_tcp(stream))
    }

    /// The address this socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
