//! Sessions built from INI configuration files.

mod test_utils;

use std::fs;

use rstest::rstest;
use splunk_s2s::{
    S2sError, load_config,
    test_utils::{decode_frames, split_signature},
};
use tempfile::TempDir;
use test_utils::{Peer, peer};

#[rstest]
fn loaded_session_routes_by_alias(peer: Peer) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("s2s.ini");
    let text = format!(
        "[s2s]\nserver = {}\nbuffer_bytes = 4096\n\n\
         [endpoint web]\nindex = web\nsourcetype = access_combined\n\n\
         [endpoint app]\nindex = app\nsourcetype = json\n",
        peer.server()
    );
    fs::write(&path, text).expect("write config");

    let session = load_config(&path, None)
        .expect("load config")
        .build()
        .expect("build session");
    session.open().expect("open");
    session.add("GET / 200", "web").expect("add web");
    session.add("{\"ok\":true}", "app").expect("add app");
    session.close().expect("close");

    let bytes = peer.next_connection();
    let (_, data) = split_signature(&bytes).expect("signature");
    let frames = decode_frames(data).expect("decode frames");
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].get("_MetaData:Index"), Some("web"));
    assert_eq!(frames[0].get("MetaData:Sourcetype"), Some("sourcetype::access_combined"));
    assert_eq!(frames[1].get("_MetaData:Index"), Some("app"));
    assert_eq!(frames[1].raw(), Some("{\"ok\":true}"));
}

#[rstest]
fn missing_certificate_file_names_the_config() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("s2s.ini");
    fs::write(&path, "[s2s]\nserver = idx:9997\ntls = on\ncert_file = absent.pem\n")
        .expect("write config");

    let err = load_config(&path, None).expect_err("certificate is missing");
    match err {
        S2sError::Config(msg) => {
            assert!(msg.contains("s2s.ini"), "{msg}");
            assert!(msg.contains("absent.pem"), "{msg}");
        }
        other => panic!("expected config error, got {other:?}"),
    }
}

#[rstest]
fn missing_file_is_a_config_error() {
    let dir = TempDir::new().expect("temp dir");
    let err = load_config(dir.path().join("nope.ini"), None).expect_err("no file");
    assert!(matches!(err, S2sError::Config(msg) if msg.contains("doesn't exist")));
}
