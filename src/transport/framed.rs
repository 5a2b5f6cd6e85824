//! Buffered transport carrying encoded frames to the indexer.
//!
//! Bytes are staged in a [`BufWriter`] and pushed to the wire on an explicit
//! [`flush`](FramedTransport::flush), on [`close`](FramedTransport::close), or
//! once the bytes written since the last flush exceed the configured
//! threshold. A threshold flush also retires the connection: the transport
//! dials again and re-sends the signature block before accepting more data.

use std::io::{BufWriter, Write};

use log::{debug, warn};

use crate::{
    error::{Misuse, Result},
    signature::{SIGNATURE_LEN, Signature},
};

use super::connect::Connector;

enum Link<S: Write> {
    Disconnected,
    Connected(BufWriter<S>),
    Closed,
}

/// Outcome of a [`FramedTransport::write`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Bytes were buffered.
    Buffered,
    /// The threshold was crossed: the buffer was flushed and the connection
    /// replaced.
    Rotated,
}

/// Buffered writer over a connection produced by a [`Connector`].
pub struct FramedTransport<C: Connector> {
    connector: C,
    signature: [u8; SIGNATURE_LEN],
    threshold: usize,
    pending: usize,
    link: Link<C::Stream>,
}

impl<C: Connector> FramedTransport<C> {
    pub fn new(connector: C, signature: &Signature, threshold: usize) -> Self {
        Self {
            connector,
            signature: signature.to_bytes(),
            threshold,
            pending: 0,
            link: Link::Disconnected,
        }
    }

    /// Dial and buffer the signature block. The signature reaches the wire
    /// with the first flush.
    pub fn open(&mut self) -> Result<()> {
        match self.link {
            Link::Connected(_) => Err(Misuse::AlreadyOpen.into()),
            Link::Closed => Err(Misuse::Closed.into()),
            Link::Disconnected => {
                self.link = Link::Connected(self.dial()?);
                self.pending = 0;
                Ok(())
            }
        }
    }

    fn dial(&self) -> Result<BufWriter<C::Stream>> {
        let stream = self.connector.connect()?;
        let mut writer = BufWriter::new(stream);
        writer.write_all(&self.signature)?;
        Ok(writer)
    }

    fn writer(&mut self) -> Result<&mut BufWriter<C::Stream>> {
        match &mut self.link {
            Link::Connected(writer) => Ok(writer),
            Link::Disconnected => Err(Misuse::NotOpen.into()),
            Link::Closed => Err(Misuse::Closed.into()),
        }
    }

    /// Append `bytes` to the buffer.
    ///
    /// When the bytes written since the last flush exceed the threshold the
    /// buffer is flushed, the connection is replaced and the counter resets.
    pub fn write(&mut self, bytes: &[u8]) -> Result<WriteOutcome> {
        let result = self.writer()?.write_all(bytes);
        if let Err(err) = result {
            self.drop_link("write");
            return Err(err.into());
        }
        self.pending = self.pending.saturating_add(bytes.len());
        if self.pending <= self.threshold {
            return Ok(WriteOutcome::Buffered);
        }
        self.rotate()?;
        Ok(WriteOutcome::Rotated)
    }

    fn rotate(&mut self) -> Result<()> {
        let flushed = self.pending;
        self.release()?;
        debug!(
            "flushed {flushed} bytes to {}, reconnecting",
            self.connector.target()
        );
        self.link = Link::Connected(self.dial()?);
        Ok(())
    }

    /// Push buffered bytes to the wire without closing the connection.
    pub fn flush(&mut self) -> Result<()> {
        let result = self.writer()?.flush();
        match result {
            Ok(()) => {
                self.pending = 0;
                Ok(())
            }
            Err(err) => {
                self.drop_link("flush");
                Err(err.into())
            }
        }
    }

    /// Flush and release the connection. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        self.close_with(&[])
    }

    /// Append `tail` to the current connection, then flush and release it.
    ///
    /// The tail is exempt from the threshold, so closing never dials a new
    /// connection. It is dropped when no connection is live.
    pub fn close_with(&mut self, tail: &[u8]) -> Result<()> {
        let drained = match &mut self.link {
            Link::Connected(writer) if !tail.is_empty() => writer.write_all(tail),
            _ => Ok(()),
        };
        if let Err(err) = drained {
            self.drop_link("write");
            self.link = Link::Closed;
            return Err(err.into());
        }
        let result = match self.link {
            Link::Connected(_) => self.release(),
            Link::Disconnected | Link::Closed => Ok(()),
        };
        self.link = Link::Closed;
        result
    }

    /// Flush the current connection and hand it back to the connector,
    /// leaving the link disconnected.
    fn release(&mut self) -> Result<()> {
        let Link::Connected(mut writer) = std::mem::replace(&mut self.link, Link::Disconnected)
        else {
            return Ok(());
        };
        self.pending = 0;
        writer.flush()?;
        let stream = writer.into_inner().map_err(|err| err.into_error())?;
        self.connector.disconnect(stream)?;
        Ok(())
    }

    fn drop_link(&mut self, op: &str) {
        warn!(
            "{op} to {} failed; dropping connection with {} unflushed bytes",
            self.connector.target(),
            self.pending
        );
        self.link = Link::Disconnected;
        self.pending = 0;
    }

    /// Bytes written since the last flush.
    pub fn pending_bytes(&self) -> usize {
        self.pending
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.link, Link::Connected(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.link, Link::Closed)
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }
}

#[cfg(test)]
mod tests;
