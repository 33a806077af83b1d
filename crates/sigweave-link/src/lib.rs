//! Point-to-point links between sigweave pipelines.
//!
//! A [`Connection`] opens a transport as listener or initiator and runs the
//! hello handshake; both ends must agree on topic and frame family. The link
//! components wrap one connection each so a stream or event channel of one
//! pipeline can be mirrored into another:
//!
//! - [`StreamWriter`] (consumer) sends one input stream, [`StreamReader`]
//!   (provider) re-creates it on the peer.
//! - [`EventWriter`] (listening consumer) sends events, [`EventReader`]
//!   (consumer) emits them into the peer's event channel.

pub mod connection;
pub mod convert;
pub mod error;
pub mod event;
pub mod handshake;
pub mod stream;

pub use connection::{
    Connection, ConnectionConfig, Role, WireOrder, DEFAULT_CONNECT_TIMEOUT_SECONDS,
};
pub use convert::{event_from_frame, event_to_frame, format_from, header_for};
pub use error::{LinkError, Result};
pub use event::{EventReader, EventWriter};
pub use handshake::exchange_hello;
pub use stream::{StreamReader, StreamWriter};
