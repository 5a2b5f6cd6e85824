//! Helpers shared by unit and integration tests.
//!
//! [`RecordingConnector`] hands out in-memory streams that log every byte and
//! flush, and the decoding helpers parse the signature block and frames back
//! into readable values.

use std::{
    io::{self, Write},
    sync::Arc,
};

use parking_lot::Mutex;

use crate::{
    error::{Result, S2sError},
    signature::SIGNATURE_LEN,
    transport::Connector,
};

/// Everything observed on one in-memory connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionLog {
    /// Bytes that reached the "wire".
    pub bytes: Vec<u8>,
    /// Number of `flush` calls.
    pub flushes: usize,
    /// Whether the connector released the stream.
    pub disconnected: bool,
}

#[derive(Default)]
struct Recorder {
    connections: Vec<ConnectionLog>,
    refuse_connects: bool,
    fail_writes: bool,
}

/// Connector producing [`RecordingStream`]s.
#[derive(Clone, Default)]
pub struct RecordingConnector {
    recorder: Arc<Mutex<Recorder>>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent dials fail with a connection error.
    pub fn refuse_connects(&self, refuse: bool) {
        self.recorder.lock().refuse_connects = refuse;
    }

    /// Make writes and flushes on every stream fail.
    pub fn fail_writes(&self, fail: bool) {
        self.recorder.lock().fail_writes = fail;
    }

    /// Snapshot of every connection made so far.
    pub fn connections(&self) -> Vec<ConnectionLog> {
        self.recorder.lock().connections.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.recorder.lock().connections.len()
    }

    /// All bytes written across connections, in order.
    pub fn wire_bytes(&self) -> Vec<u8> {
        self.recorder
            .lock()
            .connections
            .iter()
            .flat_map(|c| c.bytes.iter().copied())
            .collect()
    }
}

impl Connector for RecordingConnector {
    type Stream = RecordingStream;

    fn connect(&self) -> Result<RecordingStream> {
        let mut recorder = self.recorder.lock();
        if recorder.refuse_connects {
            return Err(S2sError::connection(
                self.target(),
                io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
            ));
        }
        recorder.connections.push(ConnectionLog::default());
        Ok(RecordingStream {
            recorder: Arc::clone(&self.recorder),
            id: recorder.connections.len() - 1,
        })
    }

    fn disconnect(&self, stream: RecordingStream) -> io::Result<()> {
        self.recorder.lock().connections[stream.id].disconnected = true;
        Ok(())
    }

    fn target(&self) -> String {
        "memory".into()
    }
}

/// In-memory stream recording into its parent [`RecordingConnector`].
pub struct RecordingStream {
    recorder: Arc<Mutex<Recorder>>,
    id: usize,
}

impl Write for RecordingStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut recorder = self.recorder.lock();
        if recorder.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
        }
        recorder.connections[self.id].bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut recorder = self.recorder.lock();
        if recorder.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "flush failed"));
        }
        recorder.connections[self.id].flushes += 1;
        Ok(())
    }
}

/// One frame decoded from the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodedFrame {
    pub msg_size: u32,
    pub map_count: u32,
    /// Key/value blocks in wire order, including `_done` and `_raw`.
    pub pairs: Vec<(String, String)>,
    /// Trailing string after the zero word.
    pub trailer: String,
}

impl DecodedFrame {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn raw(&self) -> Option<&str> {
        self.get("_raw")
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> io::Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "truncated frame"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> io::Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn string(&mut self) -> io::Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        let Some((&0, text)) = bytes.split_last() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "string is not NUL terminated",
            ));
        };
        String::from_utf8(text.to_vec())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

/// Decode one frame from the front of `bytes`, returning it and the bytes
/// consumed.
pub fn decode_frame(bytes: &[u8]) -> io::Result<(DecodedFrame, usize)> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let msg_size = cursor.u32()?;
    let body = cursor.take(msg_size as usize)?;
    let mut body_cursor = Cursor {
        bytes: body,
        pos: 0,
    };
    let map_count = body_cursor.u32()?;
    let mut pairs = Vec::with_capacity(map_count as usize);
    for _ in 0..map_count {
        let key = body_cursor.string()?;
        let value = body_cursor.string()?;
        pairs.push((key, value));
    }
    if body_cursor.u32()? != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "missing zero word before trailer",
        ));
    }
    let trailer = body_cursor.string()?;
    if body_cursor.pos != body.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame size does not match its content",
        ));
    }
    let frame = DecodedFrame {
        msg_size,
        map_count,
        pairs,
        trailer,
    };
    Ok((frame, cursor.pos))
}

/// Decode back-to-back frames filling `bytes` exactly.
pub fn decode_frames(mut bytes: &[u8]) -> io::Result<Vec<DecodedFrame>> {
    let mut frames = Vec::new();
    while !bytes.is_empty() {
        let (frame, used) = decode_frame(bytes)?;
        frames.push(frame);
        bytes = &bytes[used..];
    }
    Ok(frames)
}

/// Split a connection's bytes into its signature block and frame data.
pub fn split_signature(bytes: &[u8]) -> io::Result<(&[u8], &[u8])> {
    if bytes.len() < SIGNATURE_LEN {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before the signature block",
        ));
    }
    Ok(bytes.split_at(SIGNATURE_LEN))
}

/// Read a zero padded signature field as text.
pub fn signature_field(slot: &[u8]) -> String {
    let end = slot.iter().position(|b| *b == 0).unwrap_or(slot.len());
    String::from_utf8_lossy(&slot[..end]).into_owned()
}

/// Returns a [`logtest::Logger`], installing the global logger on first use.
///
/// `logtest::Logger::start` may only be called once per process, so unit
/// tests share one installation; stale events are drained on each call.
#[cfg(test)]
pub fn test_logger() -> logtest::Logger {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = logtest::Logger::start();
    });
    let mut logger = logtest::Logger;
    while logger.pop().is_some() {}
    logger
}
