//! Byte transport to the indexing tier.
//!
//! [`connect`] dials plain TCP or TLS streams and [`framed`] buffers encoded
//! frames over them, flushing on demand or once a byte threshold is crossed.

pub mod connect;
pub mod framed;

pub use connect::{ActiveConnection, Connector, NetConnector};
pub use framed::{FramedTransport, WriteOutcome};
