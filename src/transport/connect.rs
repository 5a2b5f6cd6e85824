//! Connection manager: dials the indexer over plain TCP or TLS.

use std::{
    fmt,
    io::{self, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

use log::debug;
use native_tls::{Certificate, TlsConnector, TlsStream};

use crate::{
    config::{ServerAddress, SessionConfig, TlsConfig},
    error::{Result, S2sError},
};

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// Source of byte streams for the framed transport.
///
/// Implementations own every dial parameter so the transport can reconnect
/// without consulting the session configuration again.
pub trait Connector: Send + 'static {
    /// Stream type produced by a successful dial.
    type Stream: Write + Send + 'static;

    /// Establish a new connection.
    fn connect(&self) -> Result<Self::Stream>;

    /// Release a connection after its buffered bytes were flushed.
    fn disconnect(&self, stream: Self::Stream) -> io::Result<()> {
        drop(stream);
        Ok(())
    }

    /// Human readable target used in log messages.
    fn target(&self) -> String;
}

/// Active socket connection state.
pub enum ActiveConnection {
    PlainTcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl ActiveConnection {
    /// Send TLS `close_notify` where applicable. Plain sockets close on drop.
    pub fn shutdown(&mut self) -> io::Result<()> {
        match self {
            ActiveConnection::PlainTcp(_) => Ok(()),
            ActiveConnection::Tls(stream) => stream.shutdown(),
        }
    }
}

impl Write for ActiveConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ActiveConnection::PlainTcp(stream) => stream.write(buf),
            ActiveConnection::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ActiveConnection::PlainTcp(stream) => stream.flush(),
            ActiveConnection::Tls(stream) => stream.flush(),
        }
    }
}

impl fmt::Debug for ActiveConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveConnection::PlainTcp(stream) => f.debug_tuple("PlainTcp").field(stream).finish(),
            ActiveConnection::Tls(_) => f.write_str("Tls(<stream>)"),
        }
    }
}

struct TlsSettings {
    connector: TlsConnector,
    domain: String,
}

/// Dials the configured indexer, optionally wrapping the socket in TLS.
///
/// TLS trust material is parsed when the connector is built, so a bad
/// certificate is reported before any socket is opened.
pub struct NetConnector {
    address: ServerAddress,
    tls: Option<TlsSettings>,
    connect_timeout: Duration,
    handshake_timeout: Duration,
}

impl NetConnector {
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let tls = config
            .tls
            .as_ref()
            .map(|tls| {
                Ok::<_, S2sError>(TlsSettings {
                    connector: build_tls_connector(tls)?,
                    domain: tls.server_name.clone(),
                })
            })
            .transpose()?;
        Ok(Self {
            address: config.address.clone(),
            tls,
            connect_timeout: config.connect_timeout,
            handshake_timeout: config.handshake_timeout,
        })
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    fn socket_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        (self.address.host(), self.address.port())
            .to_socket_addrs()
            .map(|iter| iter.collect())
    }

    fn connect_tcp(&self) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in self.socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses resolved for {}", self.address),
            )
        }))
    }

    fn handshake(&self, tls: &TlsSettings, stream: TcpStream) -> io::Result<ActiveConnection> {
        stream.set_read_timeout(Some(self.handshake_timeout))?;
        stream.set_write_timeout(Some(self.handshake_timeout))?;
        let stream = tls
            .connector
            .connect(&tls.domain, stream)
            .map_err(|err| io::Error::other(err.to_string()))?;
        let tcp_ref = stream.get_ref();
        tcp_ref.set_read_timeout(None)?;
        tcp_ref.set_write_timeout(None)?;
        Ok(ActiveConnection::Tls(Box::new(stream)))
    }
}

impl Connector for NetConnector {
    type Stream = ActiveConnection;

    fn connect(&self) -> Result<ActiveConnection> {
        let dial = || -> io::Result<ActiveConnection> {
            let stream = self.connect_tcp()?;
            match &self.tls {
                Some(tls) => self.handshake(tls, stream),
                None => Ok(ActiveConnection::PlainTcp(stream)),
            }
        };
        let connection = dial().map_err(|err| S2sError::connection(self.target(), err))?;
        debug!("connected to {} (tls: {})", self.address, self.is_tls());
        Ok(connection)
    }

    fn disconnect(&self, mut stream: ActiveConnection) -> io::Result<()> {
        stream.shutdown()
    }

    fn target(&self) -> String {
        self.address.to_string()
    }
}

impl fmt::Debug for NetConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetConnector")
            .field("address", &self.address)
            .field("tls", &self.tls.as_ref().map(|tls| &tls.domain))
            .field("connect_timeout", &self.connect_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

/// Split a PEM bundle into its certificate blocks.
fn pem_blocks(pem: &str) -> impl Iterator<Item = &str> {
    let mut rest = pem;
    std::iter::from_fn(move || {
        let start = rest.find(PEM_BEGIN)?;
        let end = rest[start..].find(PEM_END)? + start + PEM_END.len();
        let block = &rest[start..end];
        rest = &rest[end..];
        Some(block)
    })
}

/// Parse every certificate in `pem`, skipping malformed blocks.
///
/// Fails only when no certificate at all could be read.
fn parse_trust_anchors(pem: &str) -> Result<Vec<Certificate>> {
    let anchors: Vec<_> = pem_blocks(pem)
        .filter_map(|block| Certificate::from_pem(block.as_bytes()).ok())
        .collect();
    if anchors.is_empty() {
        return Err(S2sError::config("failed to parse root certificate"));
    }
    Ok(anchors)
}

/// Build the TLS connector described by `tls`.
///
/// A custom PEM replaces the platform trust store rather than extending it.
pub(crate) fn build_tls_connector(tls: &TlsConfig) -> Result<TlsConnector> {
    let mut builder = TlsConnector::builder();
    if let Some(pem) = &tls.cert_pem {
        builder.disable_built_in_roots(true);
        for anchor in parse_trust_anchors(pem)? {
            builder.add_root_certificate(anchor);
        }
    }
    if tls.insecure_skip_verify {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    }
    builder
        .build()
        .map_err(|err| S2sError::config(format!("failed to build tls connector: {err}")))
}
