//! Tests for the frame encoder.

use std::collections::{BTreeMap, HashMap};

use proptest::prelude::*;
use rstest::rstest;
use serde_json::json;

use super::*;
use crate::test_utils::decode_frame;

#[rstest]
#[case("")]
#[case("a")]
#[case("_raw")]
#[case("h\u{e9}llo w\u{f6}rld")]
fn encode_string_prefixes_length_and_terminates(#[case] s: &str) {
    let encoded = encode_string(s).expect("encode string");
    assert_eq!(encoded.len(), 4 + s.len() + 1);
    assert_eq!(&encoded[..4], &((s.len() + 1) as u32).to_be_bytes());
    assert_eq!(&encoded[4..4 + s.len()], s.as_bytes());
    assert_eq!(encoded.last(), Some(&0));
}

#[rstest]
fn encode_key_value_concatenates_strings() {
    let mut expected = encode_string("k").expect("key");
    expected.extend(encode_string("value").expect("value"));
    assert_eq!(encode_key_value("k", "value").expect("pair"), expected);
}

#[rstest]
fn minimal_frame_has_exact_layout() {
    let frame = encode_frame([("_raw", "x")]).expect("encode frame");
    // map_count + _done pair + _raw pair + zero word + "_raw" trailer
    let body = 4 + 20 + 15 + 4 + 9;
    assert_eq!(frame.len(), 4 + body);
    assert_eq!(&frame[..4], &(body as u32).to_be_bytes());
    assert_eq!(&frame[4..8], &2u32.to_be_bytes());
    assert_eq!(&frame[8..28], encode_key_value("_done", "_done").unwrap().as_slice());
    assert_eq!(&frame[28..43], encode_key_value("_raw", "x").unwrap().as_slice());
    assert_eq!(&frame[43..47], &[0, 0, 0, 0]);
    assert_eq!(&frame[47..], encode_string("_raw").unwrap().as_slice());
}

#[rstest]
#[case("source", "/var/log/app.log", "MetaData:Source", "source::/var/log/app.log")]
#[case("sourcetype", "syslog", "MetaData:Sourcetype", "sourcetype::syslog")]
#[case("host", "web-01", "MetaData:Host", "host::web-01")]
#[case("index", "main", "_MetaData:Index", "main")]
#[case("text", "hello", "text", "hello")]
fn remaps_metadata_fields(
    #[case] field: &str,
    #[case] value: &str,
    #[case] key: &str,
    #[case] expected: &str,
) {
    let frame = encode_frame([(field, value), ("_raw", "event")]).expect("encode frame");
    let (decoded, used) = decode_frame(&frame).expect("decode frame");
    assert_eq!(used, frame.len());
    assert_eq!(decoded.map_count, 3);
    assert_eq!(decoded.pairs[0], (key.to_owned(), expected.to_owned()));
    assert_eq!(decoded.pairs[1], ("_done".to_owned(), "_done".to_owned()));
    assert_eq!(decoded.raw(), Some("event"));
    assert_eq!(decoded.trailer, "_raw");
}

#[rstest]
fn raw_is_never_emitted_as_a_generic_field() {
    let frame = encode_frame([("_raw", "payload"), ("a", "1")]).expect("encode frame");
    let (decoded, _) = decode_frame(&frame).expect("decode frame");
    let raw_keys = decoded.pairs.iter().filter(|(k, _)| k == "_raw").count();
    assert_eq!(raw_keys, 1);
    assert_eq!(decoded.pairs.last().map(|(_, v)| v.as_str()), Some("payload"));
}

#[rstest]
fn missing_raw_encodes_empty_payload() {
    let frame = encode_frame([("host", "h")]).expect("encode frame");
    let (decoded, _) = decode_frame(&frame).expect("decode frame");
    assert_eq!(decoded.raw(), Some(""));
    assert_eq!(decoded.map_count, 3);
}

#[rstest]
fn encode_frame_into_appends() {
    let mut buf = b"prefix".to_vec();
    let written = encode_frame_into(&mut buf, [("_raw", "a")]).expect("encode");
    assert_eq!(buf.len(), 6 + written);
    assert_eq!(&buf[..6], b"prefix");
    let (decoded, used) = decode_frame(&buf[6..]).expect("decode");
    assert_eq!(used, written);
    assert_eq!(decoded.raw(), Some("a"));
}

#[rstest]
#[case(json!("plain text"), "plain text")]
#[case(json!(42), "42")]
#[case(json!(-1.5), "-1.5")]
#[case(json!(true), "true")]
#[case(json!(null), "null")]
#[case(json!({"text": "hello"}), r#"{"text":"hello"}"#)]
#[case(json!([1, "two"]), r#"[1,"two"]"#)]
fn render_value_stringifies(#[case] value: serde_json::Value, #[case] expected: &str) {
    assert_eq!(render_value(&value).expect("render"), expected);
}

#[rstest]
#[case(f64::NAN, "NaN")]
#[case(f64::INFINITY, "+Inf")]
#[case(f64::NEG_INFINITY, "-Inf")]
#[case(2.5, "2.5")]
fn render_value_writes_non_finite_floats_as_text(#[case] value: f64, #[case] expected: &str) {
    assert_eq!(render_value(&value).expect("render"), expected);
    assert_eq!(render_value(&Some(value)).expect("render option"), expected);
}

#[rstest]
fn render_value_handles_f32_and_nested_non_finite() {
    assert_eq!(render_value(&f32::NAN).expect("render"), "NaN");
    // JSON has no NaN, so structured values keep serde_json's null.
    assert_eq!(render_value(&[f64::NAN]).expect("render"), "[null]");
}

#[rstest]
fn render_value_accepts_plain_rust_values() {
    let mut event = BTreeMap::new();
    event.insert("source", "source");
    event.insert("text", "text");
    assert_eq!(
        render_value(&event).expect("render"),
        r#"{"source":"source","text":"text"}"#
    );
    assert_eq!(render_value("str").expect("render"), "str");
    assert_eq!(render_value(&7u8).expect("render"), "7");
}

#[rstest]
fn render_value_rejects_unrepresentable_values() {
    let mut event = BTreeMap::new();
    event.insert((1u8, 2u8), "tuple keys are not JSON");
    let err = render_value(&event).expect_err("tuple keys cannot be rendered");
    assert!(matches!(err, S2sError::Encoding(_)));
}

#[rstest]
fn event_fields_keep_keys_unique() {
    let mut fields = EventFields::with_raw("first");
    fields.insert("_raw", "second").insert("host", "a");
    fields.insert_default("host", "b").insert_default("index", "main");
    assert_eq!(fields.len(), 3);
    assert_eq!(fields.get("_raw"), Some("second"));
    assert_eq!(fields.get("host"), Some("a"));
    assert_eq!(fields.get("index"), Some("main"));
}

#[rstest]
fn event_fields_convert_from_maps() {
    let map: HashMap<String, String> =
        [("_raw".to_owned(), "r".to_owned()), ("k".to_owned(), "v".to_owned())].into();
    let fields = EventFields::from(map);
    let mut buf = Vec::new();
    fields.encode_into(&mut buf).expect("encode");
    let (decoded, _) = decode_frame(&buf).expect("decode");
    assert_eq!(decoded.get("k"), Some("v"));
    assert_eq!(decoded.raw(), Some("r"));
}

proptest! {
    #[test]
    fn msg_size_matches_frame_length(
        fields in proptest::collection::hash_map("[a-z_]{1,12}", ".{0,40}", 0..8)
    ) {
        let frame = encode_frame(&fields).expect("encode frame");
        let msg_size = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        prop_assert_eq!(msg_size, frame.len() - 4);

        let map_count = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
        let generic = fields.keys().filter(|k| k.as_str() != "_raw").count();
        prop_assert_eq!(map_count, generic + 2);

        let (decoded, used) = decode_frame(&frame).expect("decode frame");
        prop_assert_eq!(used, frame.len());
        prop_assert_eq!(decoded.raw().unwrap_or_default(), fields.get("_raw").map(String::as_str).unwrap_or_default());
    }

    #[test]
    fn encoded_strings_are_length_prefixed(s in ".{0,64}") {
        let encoded = encode_string(&s).expect("encode string");
        prop_assert_eq!(encoded.len(), 4 + s.len() + 1);
        prop_assert_eq!(encoded.last().copied(), Some(0u8));
    }
}
