#![deny(unsafe_op_in_unsafe_fn)]

//! A UDP network prober: measures round-trip latency and packet loss
//! between one prober host and a fleet of IPv6 endpoints.
//!
//! The entry point is [`UdpPinger`]: build one with a [`PingerConfig`] and
//! a source address, then call [`UdpPinger::run`] once per sweep with the
//! targets to probe. Everything else in this crate — the wire format,
//! raw-socket sender, reactor-based receiver, and histogram aggregation —
//! exists to make that one call work.

pub mod affinity;
pub mod config;
pub mod error;
pub mod histogram;
pub mod orchestrator;
pub mod pacing;
pub mod probe;
pub mod raw; // OS-level socket helpers (Linux/Windows)
pub mod reactor;
pub mod receiver;
pub mod results;
pub mod sender;
pub mod target;

mod rt_mio;
pub mod rt {
    pub use crate::rt_mio::*;
}

pub use config::{apply_low_latency, NetConfig, PingerConfig};
pub use error::{PingerError, Result};
pub use orchestrator::UdpPinger;
pub use results::{TestResult, UdpTestResults};
pub use rt::{NetHandle, Runtime};
pub use target::{Target, TestPlan};
