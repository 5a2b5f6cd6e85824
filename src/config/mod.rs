//! Configuration consumed by [`Session`](crate::session::Session).
//!
//! [`SessionBuilder`] validates user input and produces a [`SessionConfig`].
//! Values normally come from code or from an INI file read by
//! [`load_config`].

mod builder;
mod file;

use std::{fmt, time::Duration};

use crate::error::{Misuse, Result, S2sError};

pub use builder::SessionBuilder;
pub use file::{load_config, parse_config};

/// TLS server name used when none is configured.
pub const DEFAULT_SERVER_NAME: &str = "SplunkServerDefaultCert";
/// Timeout applied to the TCP dial.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Timeout applied to the TLS handshake once the TCP dial succeeded.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
/// Bytes written before the transport flushes and reconnects.
pub const DEFAULT_BUFFER_BYTES: usize = 64 * 1024;
/// Capacity of the channel carrying auto-flush error reports.
pub const DEFAULT_REPORT_CAPACITY: usize = 64;
/// Minimum gap between warnings about dropped error reports.
pub const DEFAULT_WARN_INTERVAL: Duration = Duration::from_secs(5);

/// Indexer address in `host:port` form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerAddress {
    host: String,
    port: u16,
    port_text: String,
}

impl ServerAddress {
    /// Parse `host:port`, rejecting anything without exactly one colon.
    pub fn parse(address: &str) -> Result<Self> {
        let malformed = || {
            S2sError::config(format!(
                "server '{address}' is malformed, expected host:port"
            ))
        };
        let mut parts = address.split(':');
        let (Some(host), Some(port_text), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };
        if host.trim().is_empty() {
            return Err(malformed());
        }
        let port = port_text.parse::<u16>().map_err(|_| {
            S2sError::config(format!("server '{address}' has an invalid port"))
        })?;
        Ok(Self {
            host: host.to_owned(),
            port,
            port_text: port_text.to_owned(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Port exactly as written in the configuration.
    pub fn port_text(&self) -> &str {
        &self.port_text
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port_text)
    }
}

/// Routing target selected by an alias when adding events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndPoint {
    alias: String,
    index: String,
    sourcetype: String,
}

impl EndPoint {
    pub fn new(
        alias: impl Into<String>,
        index: impl Into<String>,
        sourcetype: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            index: index.into(),
            sourcetype: sourcetype.into(),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn sourcetype(&self) -> &str {
        &self.sourcetype
    }
}

/// TLS trust settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM encoded trust anchors. `None` uses the platform store.
    pub cert_pem: Option<String>,
    /// Name used for SNI and certificate verification.
    pub server_name: String,
    /// Skip certificate and hostname validation (intended for tests).
    pub insecure_skip_verify: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_pem: None,
            server_name: DEFAULT_SERVER_NAME.into(),
            insecure_skip_verify: false,
        }
    }
}

/// Validated session configuration.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub address: ServerAddress,
    pub tls: Option<TlsConfig>,
    pub buffer_bytes: usize,
    pub endpoints: Vec<EndPoint>,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub report_capacity: usize,
    pub warn_interval: Duration,
}

impl SessionConfig {
    /// Plain TCP configuration with default timeouts.
    pub fn new(address: ServerAddress, buffer_bytes: usize, endpoints: Vec<EndPoint>) -> Self {
        Self {
            address,
            tls: None,
            buffer_bytes,
            endpoints,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            report_capacity: DEFAULT_REPORT_CAPACITY,
            warn_interval: DEFAULT_WARN_INTERVAL,
        }
    }

    /// Enable TLS with the supplied trust settings.
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Look up the endpoint registered under `alias`.
    pub fn endpoint(&self, alias: &str) -> Result<&EndPoint> {
        find_endpoint(&self.endpoints, alias)
    }
}

/// Linear alias lookup shared by the config and the session.
pub(crate) fn find_endpoint<'a>(endpoints: &'a [EndPoint], alias: &str) -> Result<&'a EndPoint> {
    endpoints
        .iter()
        .find(|endpoint| endpoint.alias == alias)
        .ok_or_else(|| Misuse::UnknownEndpoint(alias.to_owned()).into())
}
