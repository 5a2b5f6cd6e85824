//! Write-only client for the Splunk-to-Splunk (cooked mode v2) protocol.
//!
//! A [`Session`] dials an indexer over TCP or TLS, sends the 400-byte
//! signature block and then streams length-prefixed event frames. Events are
//! encoded into a staging buffer by [`Session::add`] and pushed to the wire by
//! [`Session::send`] or by the auto-flush thread started with
//! [`Session::start_auto_flush`].
//!
//! ```no_run
//! use splunk_s2s::{EndPoint, SessionBuilder};
//!
//! let session = SessionBuilder::new("splunk.example.com:9997")
//!     .with_endpoint(EndPoint::new("test", "main", "syslog"))
//!     .build()?;
//! session.open()?;
//! session.add(&serde_json::json!({"text": "hello"}), "test")?;
//! session.send()?;
//! session.close()?;
//! # Ok::<(), splunk_s2s::S2sError>(())
//! ```

pub mod config;
pub mod encoder;
pub mod error;
pub mod rate_limited_warner;
pub mod scheduler;
pub mod session;
pub mod signature;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod test_utils;

pub use config::{
    EndPoint, ServerAddress, SessionBuilder, SessionConfig, TlsConfig, load_config, parse_config,
};
pub use encoder::{EventFields, encode_frame, encode_key_value, encode_string, render_value};
pub use error::{Misuse, Result, S2sError};
pub use session::{Session, SessionState};
pub use signature::{COOKED_MODE_V2, SIGNATURE_LEN, Signature};
pub use transport::{Connector, FramedTransport, NetConnector};
