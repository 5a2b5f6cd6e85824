//! Handshake record sent once at the start of every connection.

use crate::config::ServerAddress;

/// Protocol magic identifying the cooked-mode-v2 wire variant.
pub const COOKED_MODE_V2: &str = "--splunk-cooked-mode-v2--";

const MAGIC_LEN: usize = 128;
const SERVER_NAME_LEN: usize = 256;
const MGMT_PORT_LEN: usize = 16;

/// Total size of the signature block in bytes.
pub const SIGNATURE_LEN: usize = MAGIC_LEN + SERVER_NAME_LEN + MGMT_PORT_LEN;

/// Fixed-size handshake record.
///
/// Each field is zero padded to its slot; values longer than the slot are
/// truncated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    server_name: String,
    mgmt_port: String,
}

impl Signature {
    pub fn new(server_name: impl Into<String>, mgmt_port: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            mgmt_port: mgmt_port.into(),
        }
    }

    /// Build the signature announced for `address`.
    pub fn for_address(address: &ServerAddress) -> Self {
        Self::new(address.host(), address.port_text())
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn mgmt_port(&self) -> &str {
        &self.mgmt_port
    }

    /// Serialise the 400-byte block.
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        let mut block = [0u8; SIGNATURE_LEN];
        let (magic, rest) = block.split_at_mut(MAGIC_LEN);
        let (server, port) = rest.split_at_mut(SERVER_NAME_LEN);
        copy_padded(magic, COOKED_MODE_V2);
        copy_padded(server, &self.server_name);
        copy_padded(port, &self.mgmt_port);
        block
    }
}

fn copy_padded(slot: &mut [u8], value: &str) {
    let len = value.len().min(slot.len());
    slot[..len].copy_from_slice(&value.as_bytes()[..len]);
}
