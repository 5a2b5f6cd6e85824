//! A loopback indexer stand-in that records every accepted connection.

use std::{
    io::Read,
    net::{SocketAddr, TcpListener},
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, unbounded};
use rstest::fixture;

/// Listener thread that reads each accepted connection to EOF and forwards
/// the collected bytes.
///
/// Connections are served one at a time, so they are reported in the order
/// the client made them.
pub struct Peer {
    addr: SocketAddr,
    received: Receiver<Vec<u8>>,
}

impl Peer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
        let addr = listener.local_addr().expect("listener address");
        let (tx, received) = unbounded();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut bytes = Vec::new();
                let _ = stream.read_to_end(&mut bytes);
                if tx.send(bytes).is_err() {
                    break;
                }
            }
        });
        Self { addr, received }
    }

    /// `host:port` string accepted by `SessionBuilder::new`.
    pub fn server(&self) -> String {
        self.addr.to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Wait for the next connection to be closed by the client.
    pub fn next_connection(&self) -> Vec<u8> {
        self.received
            .recv_timeout(Duration::from_secs(5))
            .expect("peer received a connection")
    }
}

#[fixture]
pub fn peer() -> Peer {
    Peer::start()
}
