//! Cooked-mode-v2 event frame encoder.
//!
//! A frame is laid out as follows, all integers big-endian:
//!
//! ```text
//! msg_size u32 | map_count u32 | key/value blocks* | ("_done", "_done")
//!   | ("_raw", payload) | 0 u32 | string("_raw")
//! ```
//!
//! Every string is written as a `u32` length (byte length plus one), the raw
//! bytes and a trailing NUL. `msg_size` counts every byte after itself, so the
//! receiver can find the next frame from the size alone. `map_count` counts the
//! metadata and generic blocks plus the `_done` and `_raw` pairs.
//!
//! Encoding performs no I/O. Well-known field names are remapped onto the
//! receiver's metadata keys:
//!
//! | field        | key                   | value                |
//! |--------------|-----------------------|----------------------|
//! | `source`     | `MetaData:Source`     | `source::<value>`    |
//! | `sourcetype` | `MetaData:Sourcetype` | `sourcetype::<value>`|
//! | `host`       | `MetaData:Host`       | `host::<value>`      |
//! | `index`      | `_MetaData:Index`     | `<value>`            |
//! | `_raw`       | consumed as payload   |                      |

use std::{
    borrow::Cow,
    collections::{BTreeMap, HashMap},
};

use serde::{
    Serialize, Serializer,
    ser::{Error as _, Impossible},
};
use serde_json::Value;

use crate::error::{Result, S2sError};

/// Field carrying the event payload.
pub const RAW_KEY: &str = "_raw";
/// Marker pair closing the metadata section of a frame.
pub const DONE_KEY: &str = "_done";

const LEN_PREFIX: usize = 4;
const HEADER_LEN: usize = 8;
/// `_done` and `_raw` pairs are always present.
const FIXED_MAPS: u32 = 2;

fn frame_error(msg: &str) -> S2sError {
    S2sError::Encoding(serde_json::Error::custom(msg))
}

fn wire_len(s: &str) -> Result<u32> {
    s.len()
        .checked_add(1)
        .and_then(|len| u32::try_from(len).ok())
        .ok_or_else(|| frame_error("string exceeds the u32 length prefix"))
}

fn put_string(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = wire_len(s)?;
    buf.reserve(LEN_PREFIX + s.len() + 1);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    Ok(())
}

fn put_key_value(buf: &mut Vec<u8>, key: &str, value: &str) -> Result<()> {
    put_string(buf, key)?;
    put_string(buf, value)
}

/// Encode `s` as a length-prefixed, NUL-terminated wire string.
///
/// The result is always `4 + s.len() + 1` bytes long and ends with a zero.
pub fn encode_string(s: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(LEN_PREFIX + s.len() + 1);
    put_string(&mut buf, s)?;
    Ok(buf)
}

/// Encode a key/value block: `encode_string(key) ++ encode_string(value)`.
pub fn encode_key_value(key: &str, value: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(2 * LEN_PREFIX + key.len() + value.len() + 2);
    put_key_value(&mut buf, key, value)?;
    Ok(buf)
}

/// Map an input field onto the key/value pair emitted on the wire.
///
/// Returns `None` for `_raw`, which is written separately as the payload.
fn remap<'a>(key: &'a str, value: &'a str) -> Option<(&'a str, Cow<'a, str>)> {
    match key {
        "source" => Some(("MetaData:Source", Cow::Owned(format!("source::{value}")))),
        "sourcetype" => Some((
            "MetaData:Sourcetype",
            Cow::Owned(format!("sourcetype::{value}")),
        )),
        "host" => Some(("MetaData:Host", Cow::Owned(format!("host::{value}")))),
        "index" => Some(("_MetaData:Index", Cow::Borrowed(value))),
        RAW_KEY => None,
        _ => Some((key, Cow::Borrowed(value))),
    }
}

/// Append one encoded frame to `buf`, returning the number of bytes written.
///
/// A missing `_raw` field encodes an empty payload. If `_raw` appears more than
/// once the last occurrence wins; [`EventFields`] keeps keys unique. On error
/// `buf` is left exactly as it was.
pub fn encode_frame_into<I, K, V>(buf: &mut Vec<u8>, fields: I) -> Result<usize>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let start = buf.len();
    let result = write_frame(buf, start, fields);
    if result.is_err() {
        buf.truncate(start);
    }
    result
}

fn write_frame<I, K, V>(buf: &mut Vec<u8>, start: usize, fields: I) -> Result<usize>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    buf.extend_from_slice(&[0u8; HEADER_LEN]);

    let mut maps: u32 = 0;
    let mut raw: Option<String> = None;
    for (key, value) in fields {
        let (key, value) = (key.as_ref(), value.as_ref());
        match remap(key, value) {
            Some((wire_key, wire_value)) => {
                put_key_value(buf, wire_key, &wire_value)?;
                maps = maps
                    .checked_add(1)
                    .ok_or_else(|| frame_error("too many fields in frame"))?;
            }
            None => raw = Some(value.to_owned()),
        }
    }

    put_key_value(buf, DONE_KEY, DONE_KEY)?;
    put_key_value(buf, RAW_KEY, raw.as_deref().unwrap_or_default())?;
    buf.extend_from_slice(&0u32.to_be_bytes());
    put_string(buf, RAW_KEY)?;

    let written = buf.len() - start;
    let msg_size = u32::try_from(written - LEN_PREFIX)
        .map_err(|_| frame_error("frame exceeds the u32 size prefix"))?;
    let map_count = maps
        .checked_add(FIXED_MAPS)
        .ok_or_else(|| frame_error("too many fields in frame"))?;
    buf[start..start + LEN_PREFIX].copy_from_slice(&msg_size.to_be_bytes());
    buf[start + LEN_PREFIX..start + HEADER_LEN].copy_from_slice(&map_count.to_be_bytes());
    Ok(written)
}

/// Encode a single frame into a fresh buffer.
pub fn encode_frame<I, K, V>(fields: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut buf = Vec::with_capacity(128);
    encode_frame_into(&mut buf, fields)?;
    Ok(buf)
}

/// Render an arbitrary value as event text.
///
/// Strings pass through unchanged, scalars use their canonical text form and
/// anything structured becomes compact JSON. Non-finite floats, which JSON
/// cannot carry, render as `NaN`, `+Inf` and `-Inf`.
pub fn render_value<T>(value: &T) -> Result<String>
where
    T: Serialize + ?Sized,
{
    if let Ok(Some(text)) = value.serialize(NonFiniteFloat) {
        return Ok(text);
    }
    Ok(match serde_json::to_value(value)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_json::to_string(&other)?,
    })
}

fn non_finite_text(value: f64) -> Option<String> {
    if value.is_nan() {
        Some("NaN".into())
    } else if value.is_infinite() {
        Some(if value > 0.0 { "+Inf" } else { "-Inf" }.into())
    } else {
        None
    }
}

type FloatText = std::result::Result<Option<String>, serde_json::Error>;
type NoCompound = Impossible<Option<String>, serde_json::Error>;

fn not_scalar() -> serde_json::Error {
    serde_json::Error::custom("not a scalar")
}

macro_rules! finite_scalar {
    ($($method:ident($ty:ty)),* $(,)?) => {
        $(
            fn $method(self, _: $ty) -> FloatText {
                Ok(None)
            }
        )*
    };
}

/// Serializer that only answers for non-finite floats; every other value
/// yields `None` and is rendered through `serde_json`.
struct NonFiniteFloat;

impl Serializer for NonFiniteFloat {
    type Ok = Option<String>;
    type Error = serde_json::Error;
    type SerializeSeq = NoCompound;
    type SerializeTuple = NoCompound;
    type SerializeTupleStruct = NoCompound;
    type SerializeTupleVariant = NoCompound;
    type SerializeMap = NoCompound;
    type SerializeStruct = NoCompound;
    type SerializeStructVariant = NoCompound;

    finite_scalar!(
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_char(char),
        serialize_str(&str),
        serialize_bytes(&[u8]),
        serialize_unit_struct(&'static str),
    );

    fn serialize_f32(self, v: f32) -> FloatText {
        Ok(non_finite_text(f64::from(v)))
    }

    fn serialize_f64(self, v: f64) -> FloatText {
        Ok(non_finite_text(v))
    }

    fn serialize_none(self) -> FloatText {
        Ok(None)
    }

    fn serialize_some<T>(self, value: &T) -> FloatText
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> FloatText {
        Ok(None)
    }

    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> FloatText {
        Ok(None)
    }

    fn serialize_newtype_struct<T>(self, _: &'static str, value: &T) -> FloatText
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: &T,
    ) -> FloatText
    where
        T: Serialize + ?Sized,
    {
        Ok(None)
    }

    fn serialize_seq(self, _: Option<usize>) -> std::result::Result<NoCompound, serde_json::Error> {
        Err(not_scalar())
    }

    fn serialize_tuple(self, _: usize) -> std::result::Result<NoCompound, serde_json::Error> {
        Err(not_scalar())
    }

    fn serialize_tuple_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<NoCompound, serde_json::Error> {
        Err(not_scalar())
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<NoCompound, serde_json::Error> {
        Err(not_scalar())
    }

    fn serialize_map(self, _: Option<usize>) -> std::result::Result<NoCompound, serde_json::Error> {
        Err(not_scalar())
    }

    fn serialize_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<NoCompound, serde_json::Error> {
        Err(not_scalar())
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<NoCompound, serde_json::Error> {
        Err(not_scalar())
    }
}

/// Ordered field set for a single event.
///
/// Keys are unique; inserting an existing key replaces its value in place.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFields {
    fields: Vec<(String, String)>,
}

impl EventFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a field set carrying `raw` as the event payload.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        let mut fields = Self::new();
        fields.insert(RAW_KEY, raw);
        fields
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
        self
    }

    /// Insert `value` only when `key` is not already present.
    pub fn insert_default(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        if !self.contains(key) {
            self.fields.push((key.to_owned(), value.into()));
        }
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.insert("host", host);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.insert("source", source);
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Encode these fields as one frame appended to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<usize> {
        encode_frame_into(buf, self.iter())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EventFields {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut fields = Self::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

impl From<HashMap<String, String>> for EventFields {
    fn from(map: HashMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl From<BTreeMap<String, String>> for EventFields {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

#[cfg(test)]
mod tests;
