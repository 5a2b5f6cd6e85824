//! Builder for [`SessionConfig`] and [`Session`].
//!
//! Mirrors the two historical constructors: a plain TCP session built from a
//! server address, buffer threshold and endpoint table, and the TLS variant
//! enabled through [`SessionBuilder::with_tls`].

use std::{collections::HashSet, time::Duration};

use crate::{
    error::{Result, S2sError},
    session::Session,
    transport::NetConnector,
};

use super::{
    DEFAULT_BUFFER_BYTES, DEFAULT_SERVER_NAME, EndPoint, ServerAddress, SessionConfig, TlsConfig,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct TlsOverrides {
    cert_pem: Option<String>,
    server_name: Option<String>,
    insecure: bool,
}

macro_rules! ensure_positive {
    ($value:expr, $field:expr) => {{
        if $value == 0 {
            Err(S2sError::config(format!(
                "{} must be greater than zero",
                $field
            )))
        } else {
            Ok($value)
        }
    }};
}

macro_rules! option_setter {
    ($(#[$meta:meta])* $fn_name:ident, $field:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $fn_name(mut self, value: $ty) -> Self {
            self.$field = Some(value);
            self
        }
    };
}

/// Builder for constructing [`Session`] instances.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionBuilder {
    server: Option<String>,
    buffer_bytes: Option<usize>,
    endpoints: Vec<EndPoint>,
    tls: Option<TlsOverrides>,
    connect_timeout_ms: Option<u64>,
    handshake_timeout_ms: Option<u64>,
    report_capacity: Option<usize>,
    warn_interval_ms: Option<u64>,
}

impl SessionBuilder {
    /// Create a builder targeting `server` (`host:port`).
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: Some(server.into()),
            ..Self::default()
        }
    }

    /// Set or replace the server address.
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Register an endpoint. Aliases must be unique.
    pub fn with_endpoint(mut self, endpoint: EndPoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Register several endpoints, preserving their order.
    pub fn with_endpoints(mut self, endpoints: impl IntoIterator<Item = EndPoint>) -> Self {
        self.endpoints.extend(endpoints);
        self
    }

    /// Enable TLS.
    ///
    /// An empty or missing `cert_pem` falls back to the platform trust store
    /// and an empty or missing `server_name` uses [`DEFAULT_SERVER_NAME`].
    pub fn with_tls(
        mut self,
        cert_pem: Option<String>,
        server_name: Option<String>,
        insecure_skip_verify: bool,
    ) -> Self {
        self.tls = Some(TlsOverrides {
            cert_pem,
            server_name,
            insecure: insecure_skip_verify,
        });
        self
    }

    option_setter!(
        #[doc = "Bytes written before the transport flushes and reconnects."]
        with_buffer_bytes,
        buffer_bytes,
        usize
    );
    option_setter!(with_connect_timeout_ms, connect_timeout_ms, u64);
    option_setter!(with_handshake_timeout_ms, handshake_timeout_ms, u64);
    option_setter!(
        #[doc = "Capacity of the auto-flush error report channel."]
        with_report_capacity,
        report_capacity,
        usize
    );
    option_setter!(with_warn_interval_ms, warn_interval_ms, u64);

    pub fn endpoints(&self) -> &[EndPoint] {
        &self.endpoints
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    fn validate(&self) -> Result<ServerAddress> {
        let address = self.validate_server()?;
        self.validate_endpoints()?;
        self.validate_sizes()?;
        self.validate_timeouts()?;
        Ok(address)
    }

    fn validate_server(&self) -> Result<ServerAddress> {
        let server = self
            .server
            .as_deref()
            .ok_or_else(|| S2sError::config("session requires a server address"))?;
        ServerAddress::parse(server.trim())
    }

    fn validate_endpoints(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.alias().trim().is_empty() {
                return Err(S2sError::config("endpoint alias must not be empty"));
            }
            if !seen.insert(endpoint.alias()) {
                return Err(S2sError::config(format!(
                    "duplicate endpoint alias '{}'",
                    endpoint.alias()
                )));
            }
        }
        Ok(())
    }

    fn validate_sizes(&self) -> Result<()> {
        if let Some(bytes) = self.buffer_bytes {
            ensure_positive!(bytes, "buffer_bytes")?;
        }
        if let Some(capacity) = self.report_capacity {
            ensure_positive!(capacity, "report_capacity")?;
        }
        Ok(())
    }

    fn validate_timeouts(&self) -> Result<()> {
        if let Some(timeout) = self.connect_timeout_ms {
            ensure_positive!(timeout, "connect_timeout_ms")?;
        }
        if let Some(timeout) = self.handshake_timeout_ms {
            ensure_positive!(timeout, "handshake_timeout_ms")?;
        }
        Ok(())
    }

    /// Validate the builder and produce a [`SessionConfig`].
    pub fn build_config(&self) -> Result<SessionConfig> {
        let address = self.validate()?;
        let mut config = SessionConfig::new(
            address,
            self.buffer_bytes.unwrap_or(DEFAULT_BUFFER_BYTES),
            self.endpoints.clone(),
        );
        self.apply_optional_fields(&mut config);
        config.tls = self.tls.as_ref().map(build_tls_config);
        Ok(config)
    }

    fn apply_optional_fields(&self, config: &mut SessionConfig) {
        if let Some(timeout) = self.connect_timeout_ms {
            config.connect_timeout = Duration::from_millis(timeout);
        }
        if let Some(timeout) = self.handshake_timeout_ms {
            config.handshake_timeout = Duration::from_millis(timeout);
        }
        if let Some(capacity) = self.report_capacity {
            config.report_capacity = capacity;
        }
        if let Some(interval) = self.warn_interval_ms {
            config.warn_interval = Duration::from_millis(interval);
        }
    }

    /// Build an unopened session. TLS trust material is parsed here, so an
    /// invalid certificate fails before any socket is opened.
    pub fn build(&self) -> Result<Session<NetConnector>> {
        Session::new(self.build_config()?)
    }
}

fn build_tls_config(tls: &TlsOverrides) -> TlsConfig {
    let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.trim().is_empty());
    TlsConfig {
        cert_pem: non_empty(&tls.cert_pem),
        server_name: non_empty(&tls.server_name).unwrap_or_else(|| DEFAULT_SERVER_NAME.into()),
        insecure_skip_verify: tls.insecure,
    }
}
