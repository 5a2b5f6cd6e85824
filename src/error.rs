//! Error types shared by every layer of the client.
//!
//! Configuration problems are reported before any socket is opened, dial and
//! handshake failures carry the address that was attempted, and write
//! failures on an established connection surface as plain I/O errors. Caller
//! mistakes such as routing to an unknown endpoint alias are recoverable
//! [`Misuse`] values rather than panics.

use std::io;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, S2sError>;

/// Errors produced by the S2S client.
#[derive(Debug, Error)]
pub enum S2sError {
    /// Invalid user supplied configuration (malformed address, bad PEM, ...).
    #[error("invalid s2s configuration: {0}")]
    Config(String),
    /// Dialling the indexer or completing the TLS handshake failed.
    #[error("failed to connect to {address}: {source}")]
    Connection {
        address: String,
        #[source]
        source: io::Error,
    },
    /// Writing to or flushing an established connection failed.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The caller used the session in a way the protocol does not allow.
    #[error(transparent)]
    ProtocolMisuse(#[from] Misuse),
    /// An event value could not be rendered to text.
    #[error("failed to render event: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl S2sError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub(crate) fn connection(address: impl Into<String>, source: io::Error) -> Self {
        Self::Connection {
            address: address.into(),
            source,
        }
    }
}

/// Protocol misuse reported to the caller.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Misuse {
    /// `add` referenced an alias missing from the endpoint table.
    #[error("unknown endpoint alias '{0}'")]
    UnknownEndpoint(String),
    /// The session has not completed its handshake yet.
    #[error("session is not open")]
    NotOpen,
    /// The session was closed and accepts no further operations.
    #[error("session is closed")]
    Closed,
    /// The connection was dropped after an I/O failure. Staged frames are
    /// kept until `open` dials again.
    #[error("session lost its connection; call open to reconnect")]
    Disconnected,
    /// `open` was called on a session that is already open.
    #[error("session is already open")]
    AlreadyOpen,
    /// An auto-flush scheduler is already attached to the session.
    #[error("auto-flush is already running")]
    AutoFlushRunning,
}
