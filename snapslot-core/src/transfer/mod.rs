//! Streaming pipeline stages between the archive producer and the remote store.

pub mod fingerprint;
pub mod progress;
pub mod transport;
