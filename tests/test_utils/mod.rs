//! Fixtures shared by the integration tests.

pub mod fixtures;

pub use fixtures::{Peer, peer};
