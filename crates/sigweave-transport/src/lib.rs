//! Byte-stream transports for sigweave links.
//!
//! Provides a unified stream type over the carriers a link can run on:
//! - TCP sockets (any platform, typically a wireless or LAN hop)
//! - Unix domain sockets (Linux/macOS, same-host peers)
//!
//! This is the lowest layer of sigweave. The frame codec and the
//! connection handshake build on top of the [`LinkStream`] type provided
//! here. Every blocking call on a stream can be cancelled from another
//! thread through a [`ShutdownHandle`].

pub mod endpoint;
pub mod error;
pub mod listener;
pub mod stream;
pub mod tcp;

#[cfg(unix)]
pub mod uds;

pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use listener::{connect, connect_with_retry, LinkListener};
pub use stream::{LinkStream, ShutdownHandle};
pub use tcp::TcpSocket;

#[cfg(unix)]
pub use uds::UnixDomainSocket;
