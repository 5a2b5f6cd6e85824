//! INI configuration loader.
//!
//! Reads a session definition from disk using the `rust-ini` parser:
//!
//! ```ini
//! [s2s]
//! server = splunk.example.com:9997
//! buffer_bytes = 65536
//! tls = true
//! cert_file = splunk-ca.pem
//! server_name = SplunkServerDefaultCert
//! insecure_skip_verify = false
//!
//! [endpoint test]
//! index = main
//! sourcetype = syslog
//! ```
//!
//! Endpoint sections keep their file order. `cert_file` is resolved relative
//! to the directory holding the configuration file.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use encoding_rs::Encoding;
use ini::{Ini, Properties};
use log::warn;

use crate::error::{Result, S2sError};

use super::{EndPoint, SessionBuilder};

const SESSION_SECTION: &str = "s2s";
const ENDPOINT_PREFIX: &str = "endpoint ";
const DEFAULT_ENCODING: &str = "utf-8";

/// Load a session definition from `path`.
///
/// `encoding` names the file's text encoding (any WHATWG label); UTF-8 is
/// assumed when absent.
pub fn load_config(path: impl AsRef<Path>, encoding: Option<&str>) -> Result<SessionBuilder> {
    let path = path.as_ref();
    let bytes = read_file_bytes(path)?;
    if bytes.is_empty() {
        return Err(S2sError::config(format!(
            "{} is an empty file",
            path.display()
        )));
    }
    let text = decode_with_encoding(&bytes, encoding.unwrap_or(DEFAULT_ENCODING))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_config(&text, base_dir).map_err(|err| match err {
        S2sError::Config(msg) => S2sError::config(format!("{}: {msg}", path.display())),
        other => other,
    })
}

fn read_file_bytes(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => S2sError::config(format!("{} doesn't exist", path.display())),
        _ => S2sError::config(format!("failed to read {}: {err}", path.display())),
    })
}

fn decode_with_encoding(bytes: &[u8], label: &str) -> Result<String> {
    let normalized_label = label.trim().to_ascii_lowercase();
    let encoding = Encoding::for_label(normalized_label.as_bytes())
        .ok_or_else(|| S2sError::config(format!("unknown encoding {label}")))?;
    let (decoded, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err(S2sError::config(format!(
            "configuration is not valid {}",
            encoding.name()
        )));
    }
    Ok(decoded.into_owned())
}

/// Parse INI `text` into a [`SessionBuilder`].
///
/// Relative certificate paths are resolved against `base_dir`.
pub fn parse_config(text: &str, base_dir: &Path) -> Result<SessionBuilder> {
    let ini = Ini::load_from_str(text)
        .map_err(|err| S2sError::config(format!("invalid ini: {err}")))?;
    let mut builder = SessionBuilder::default();
    let mut saw_session = false;
    for (section, props) in ini.iter() {
        match section {
            Some(SESSION_SECTION) => {
                saw_session = true;
                builder = apply_session_section(builder, props, base_dir)?;
            }
            Some(name) if name.starts_with(ENDPOINT_PREFIX) => {
                builder = builder.with_endpoint(parse_endpoint(name, props)?);
            }
            None if props.is_empty() => {}
            other => warn!(
                "ignoring unknown configuration section [{}]",
                other.unwrap_or("general")
            ),
        }
    }
    if !saw_session {
        return Err(S2sError::config(format!(
            "missing [{SESSION_SECTION}] section"
        )));
    }
    Ok(builder)
}

fn apply_session_section(
    mut builder: SessionBuilder,
    props: &Properties,
    base_dir: &Path,
) -> Result<SessionBuilder> {
    let mut tls = false;
    let mut cert_pem = None;
    let mut server_name = None;
    let mut insecure = false;
    for (key, value) in props.iter() {
        let value = value.trim();
        match key {
            "server" => builder = builder.with_server(value),
            "buffer_bytes" => builder = builder.with_buffer_bytes(parse_number(key, value)?),
            "connect_timeout_ms" => {
                builder = builder.with_connect_timeout_ms(parse_number(key, value)?)
            }
            "handshake_timeout_ms" => {
                builder = builder.with_handshake_timeout_ms(parse_number(key, value)?)
            }
            "tls" => tls = parse_bool(key, value)?,
            "cert_file" => cert_pem = Some(read_cert(&resolve(base_dir, value))?),
            "server_name" => server_name = Some(value.to_owned()),
            "insecure_skip_verify" => insecure = parse_bool(key, value)?,
            _ => warn!("ignoring unknown key '{key}' in [{SESSION_SECTION}]"),
        }
    }
    if tls {
        builder = builder.with_tls(cert_pem, server_name, insecure);
    }
    Ok(builder)
}

fn parse_endpoint(section: &str, props: &Properties) -> Result<EndPoint> {
    let alias = section[ENDPOINT_PREFIX.len()..].trim();
    let required = |key: &str| {
        props
            .get(key)
            .map(|value| value.trim().to_owned())
            .ok_or_else(|| S2sError::config(format!("[{section}] is missing '{key}'")))
    };
    Ok(EndPoint::new(alias, required("index")?, required("sourcetype")?))
}

fn resolve(base_dir: &Path, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn read_cert(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|err| {
        S2sError::config(format!("failed to read certificate {}: {err}", path.display()))
    })
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| S2sError::config(format!("'{key}' must be a non-negative integer")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(S2sError::config(format!("'{key}' must be a boolean"))),
    }
}
