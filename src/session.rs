//! Session: the caller-facing S2S client.
//!
//! A session owns exactly one [`FramedTransport`] and a staging buffer of
//! encoded frames. [`Session::add`] encodes events into the staging buffer and
//! [`Session::send`] pushes the staged frames through the transport. A single
//! mutex guards the staging buffer, the transport (and its byte counter) and
//! the last-send timestamp, so the auto-flush scheduler and callers never race.
//!
//! Lifecycle: `Unopened -> Open -> Closed`. A closed session never reopens.

use std::{
    io::{self, Read},
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_channel::Receiver;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    config::{EndPoint, SessionConfig, find_endpoint},
    encoder::{EventFields, render_value},
    error::{Misuse, Result, S2sError},
    rate_limited_warner::RateLimitedWarner,
    scheduler::{AutoFlush, Tick},
    signature::Signature,
    transport::{FramedTransport, NetConnector, connect::Connector},
};

/// Lifecycle state of a [`Session`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Open,
    Closed,
}

struct Inner<C: Connector> {
    state: SessionState,
    transport: FramedTransport<C>,
    staging: Vec<u8>,
    last_send: Option<Instant>,
}

impl<C: Connector> Inner<C> {
    fn ensure_open(&self) -> Result<()> {
        match self.state {
            SessionState::Open => Ok(()),
            SessionState::Unopened => Err(Misuse::NotOpen.into()),
            SessionState::Closed => Err(Misuse::Closed.into()),
        }
    }

    /// Staged frames stay put when this fails.
    fn ensure_connected(&self) -> Result<()> {
        self.ensure_open()?;
        if self.transport.is_connected() {
            Ok(())
        } else {
            Err(Misuse::Disconnected.into())
        }
    }

    fn send(&mut self) -> Result<usize> {
        self.ensure_connected()?;
        self.last_send = Some(Instant::now());
        let staged = std::mem::take(&mut self.staging);
        self.transport.write(&staged)?;
        self.transport.flush()?;
        Ok(staged.len())
    }

    fn flush_if_idle(&mut self, interval: Duration) -> Result<Tick> {
        if self.state == SessionState::Closed {
            return Ok(Tick::Stop);
        }
        let now = Instant::now();
        let due = self
            .last_send
            .is_none_or(|last| now > last + interval);
        if !due {
            return Ok(Tick::Idle);
        }
        self.send().map(Tick::Flushed)
    }

    fn close(&mut self) -> Result<()> {
        match self.state {
            SessionState::Closed => return Ok(()),
            SessionState::Unopened => {
                self.state = SessionState::Closed;
                return Ok(());
            }
            SessionState::Open => {}
        }
        self.state = SessionState::Closed;
        let staged = std::mem::take(&mut self.staging);
        if !staged.is_empty() && !self.transport.is_connected() {
            warn!(
                "discarding {} staged bytes: no active connection",
                staged.len()
            );
        }
        self.transport.close_with(&staged)
    }
}

pub(crate) struct Shared<C: Connector> {
    inner: Mutex<Inner<C>>,
    endpoints: Vec<EndPoint>,
}

impl<C: Connector> Shared<C> {
    fn endpoint(&self, alias: &str) -> Result<&EndPoint> {
        find_endpoint(&self.endpoints, alias)
    }

    /// Encode `fields` for `alias` and append the frame to the staging buffer.
    fn stage(&self, mut fields: EventFields, alias: &str) -> Result<usize> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        let endpoint = self.endpoint(alias)?;
        fields
            .insert_default("index", endpoint.index())
            .insert_default("sourcetype", endpoint.sourcetype());
        let written = fields.encode_into(&mut inner.staging)?;
        debug!(
            "staged {written} byte frame for '{alias}' ({} bytes pending)",
            inner.staging.len()
        );
        Ok(written)
    }

    pub(crate) fn flush_if_idle(&self, interval: Duration) -> Result<Tick> {
        self.inner.lock().flush_if_idle(interval)
    }
}

/// Write-only S2S client bound to one indexer.
pub struct Session<C: Connector = NetConnector> {
    shared: Arc<Shared<C>>,
    auto_flush: Mutex<Option<AutoFlush>>,
    report_capacity: usize,
    warn_interval: Duration,
}

impl Session<NetConnector> {
    /// Create an unopened session dialling the configured indexer.
    ///
    /// Fails with [`S2sError::Config`] when the TLS trust material cannot be
    /// parsed; no socket is opened until [`open`](Session::open).
    pub fn new(config: SessionConfig) -> Result<Self> {
        let connector = NetConnector::from_config(&config)?;
        Ok(Self::with_connector(config, connector))
    }
}

impl<C: Connector> Session<C> {
    /// Create an unopened session using a custom [`Connector`].
    pub fn with_connector(config: SessionConfig, connector: C) -> Self {
        let signature = Signature::for_address(&config.address);
        let transport = FramedTransport::new(connector, &signature, config.buffer_bytes);
        let inner = Inner {
            state: SessionState::Unopened,
            transport,
            staging: Vec::new(),
            last_send: None,
        };
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                endpoints: config.endpoints,
            }),
            auto_flush: Mutex::new(None),
            report_capacity: config.report_capacity,
            warn_interval: config.warn_interval,
        }
    }

    /// Connect and perform the handshake.
    ///
    /// After an I/O failure dropped the connection, calling `open` again on
    /// the still-open session dials a fresh connection.
    pub fn open(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            SessionState::Closed => return Err(Misuse::Closed.into()),
            SessionState::Open if inner.transport.is_connected() => {
                return Err(Misuse::AlreadyOpen.into());
            }
            SessionState::Open | SessionState::Unopened => {}
        }
        inner.transport.open()?;
        inner.state = SessionState::Open;
        info!(
            "s2s session open to {}",
            inner.transport.connector().target()
        );
        Ok(())
    }

    /// Render `event` as the payload of a frame routed to `alias`.
    ///
    /// Strings are sent verbatim, scalars as text and structured values as
    /// JSON. Fails with [`Misuse::UnknownEndpoint`] when `alias` is not in the
    /// endpoint table.
    pub fn add<T>(&self, event: &T, alias: &str) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let raw = render_value(event)?;
        self.shared.stage(EventFields::with_raw(raw), alias)?;
        Ok(())
    }

    /// Stage a caller-built field set routed to `alias`.
    ///
    /// `index` and `sourcetype` come from the endpoint unless `fields` already
    /// sets them.
    pub fn add_fields(&self, fields: EventFields, alias: &str) -> Result<()> {
        self.shared.stage(fields, alias)?;
        Ok(())
    }

    /// Push staged frames through the transport and flush them to the wire.
    ///
    /// Returns the number of staged bytes sent. After a failure dropped the
    /// connection this fails with [`Misuse::Disconnected`] and keeps the
    /// staged frames for the next [`open`](Session::open).
    pub fn send(&self) -> Result<usize> {
        self.shared.inner.lock().send()
    }

    /// Copy pre-encoded frames from `reader` into the transport buffer.
    ///
    /// The bytes count towards the flush threshold but are not flushed
    /// explicitly. Returns the number of bytes copied.
    pub fn copy_from<R: Read + ?Sized>(&self, reader: &mut R) -> Result<u64> {
        self.shared.inner.lock().ensure_connected()?;
        let mut bytes = Vec::new();
        let copied = io::copy(reader, &mut bytes)?;
        let mut inner = self.shared.inner.lock();
        inner.ensure_connected()?;
        inner.transport.write(&bytes)?;
        Ok(copied)
    }

    /// Start a background thread that sends staged frames whenever no send
    /// happened for `interval`.
    ///
    /// Failures observed by the thread are logged and delivered on the
    /// returned channel. The thread stops on [`close`](Session::close) or
    /// [`stop_auto_flush`](Session::stop_auto_flush).
    pub fn start_auto_flush(&self, interval: Duration) -> Result<Receiver<S2sError>> {
        if interval.is_zero() {
            return Err(S2sError::config("auto-flush interval must be greater than zero"));
        }
        let mut slot = self.auto_flush.lock();
        if slot.is_some() {
            return Err(Misuse::AutoFlushRunning.into());
        }
        self.shared.inner.lock().ensure_open()?;
        let shared = Arc::clone(&self.shared);
        let (auto_flush, reports) = AutoFlush::spawn(
            interval,
            self.report_capacity,
            RateLimitedWarner::new(self.warn_interval),
            move || shared.flush_if_idle(interval),
        )?;
        *slot = Some(auto_flush);
        Ok(reports)
    }

    /// Stop the auto-flush thread and wait for it to exit.
    pub fn stop_auto_flush(&self) {
        let Some(auto_flush) = self.auto_flush.lock().take() else {
            return;
        };
        auto_flush.stop();
    }

    /// Stop auto-flush, drain staged frames and release the connection.
    ///
    /// Closing an already closed session is a no-op.
    pub fn close(&self) -> Result<()> {
        self.stop_auto_flush();
        let result = self.shared.inner.lock().close();
        if result.is_ok() {
            debug!("s2s session closed");
        }
        result
    }

    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state
    }

    /// Time of the most recent [`send`](Session::send), manual or automatic.
    pub fn last_send(&self) -> Option<Instant> {
        self.shared.inner.lock().last_send
    }

    /// Bytes encoded by `add` and not yet sent.
    pub fn staged_bytes(&self) -> usize {
        self.shared.inner.lock().staging.len()
    }

    /// Bytes written to the transport since its last flush.
    pub fn pending_bytes(&self) -> usize {
        self.shared.inner.lock().transport.pending_bytes()
    }

    pub fn endpoints(&self) -> &[EndPoint] {
        &self.shared.endpoints
    }

    pub fn is_auto_flushing(&self) -> bool {
        self.auto_flush.lock().is_some()
    }
}

impl<C: Connector> Drop for Session<C> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("s2s session close failed during drop: {err}");
        }
    }
}

impl<C: Connector> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("endpoints", &self.shared.endpoints)
            .finish()
    }
}
