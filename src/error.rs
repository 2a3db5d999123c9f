//! Error types for the UDP pinger engine
//!
//! Every fallible operation on the setup path (socket construction, port
//! binding, thread spawn) returns a [`PingerError`]. The sweep loop itself,
//! `UdpPinger::run`, is infallible: once senders and receivers are up,
//! anomalies are absorbed as loss or logged rather than propagated, per the
//! engine's error handling design.

use std::io;

/// Errors that can occur while constructing or starting a ping sweep.
#[derive(Debug, thiserror::Error)]
pub enum PingerError {
    /// Failed to create, configure, or bind a socket.
    #[error("socket setup failed: {0}")]
    SocketSetup(#[source] io::Error),

    /// A specific source port failed to bind. Non-fatal by itself; the
    /// caller records the port as missing and continues.
    #[error("failed to bind source port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    /// Spawning a sender or receiver thread failed.
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    /// All source ports in the configured range failed to bind; there is
    /// no usable socket for this receiver or sender.
    #[error("no usable source ports in range [{base}, {base}+{count})")]
    NoUsablePorts { base: u16, count: u16 },
}

pub type Result<T> = std::result::Result<T, PingerError>;
