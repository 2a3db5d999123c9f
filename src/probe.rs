//! Wire format for ping probes
//!
//! A probe is a fixed 32-byte payload riding inside a UDP datagram. The
//! prober fills `signature` and `pinger_sent_time_usec`; a compliant
//! responder echoes both back unchanged and may additionally stamp
//! `target_recv_time_usec`/`target_resp_time_usec`, which this engine never
//! reads.

use bytemuck::{Pod, Zeroable};

/// Size in bytes of [`ProbeBody`] on the wire.
pub const PROBE_DATA_LEN: usize = 32;

/// Fixed 32-byte probe payload, laid out exactly as it appears on the wire.
///
/// All integer fields are stored in native byte order and are only ever
/// compared against other values produced by this process, so no explicit
/// endianness conversion is performed on them (the signature and sent-time
/// never leave the process boundary in a form another implementation needs
/// to parse byte-for-byte).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct ProbeBody {
    /// Per-sweep nonce identifying probes belonging to the current sweep.
    pub signature: u32,
    /// Low 32 bits of the monotonic microsecond clock when the prober sent
    /// this probe.
    pub pinger_sent_time_usec: u32,
    /// Filled by a responder; the prober never writes or reads this field.
    pub target_recv_time_usec: u32,
    /// Filled by a responder; the prober never writes or reads this field.
    pub target_resp_time_usec: u32,
    /// IPv6 traffic class / DSCP byte the probe was sent with.
    pub tclass: u8,
    _padding: [u8; PROBE_DATA_LEN - 4 * 4 - 1],
}

impl ProbeBody {
    /// Builds a fresh outbound probe body. `target_recv_time_usec` and
    /// `target_resp_time_usec` are left zero, matching what a compliant
    /// responder expects to find unset on the wire.
    pub fn new(signature: u32, pinger_sent_time_usec: u32, tclass: u8) -> Self {
        Self {
            signature,
            pinger_sent_time_usec,
            target_recv_time_usec: 0,
            target_resp_time_usec: 0,
            tclass,
            _padding: [0; PROBE_DATA_LEN - 4 * 4 - 1],
        }
    }

    /// Interprets a received byte slice as a probe body.
    ///
    /// Returns `None` if the slice is shorter than [`PROBE_DATA_LEN`].
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..PROBE_DATA_LEN)?;
        Some(*bytemuck::from_bytes::<Self>(bytes))
    }

    /// Serializes this probe body to its on-wire byte representation.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Round-trip time in microseconds, computed with unsigned wraparound
    /// subtraction so that clock rollover of the truncated 32-bit timestamp
    /// never produces a spurious negative duration.
    pub fn rtt_usec(&self, now_usec_low32: u32) -> u32 {
        now_usec_low32.wrapping_sub(self.pinger_sent_time_usec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_body_is_32_bytes() {
        assert_eq!(std::mem::size_of::<ProbeBody>(), PROBE_DATA_LEN);
    }

    #[test]
    fn round_trips_through_bytes() {
        let body = ProbeBody::new(0xdead_beef, 123_456, 0x10);
        let bytes = body.as_bytes().to_vec();
        let parsed = ProbeBody::parse(&bytes).unwrap();
        assert_eq!(parsed, body);
    }

    #[test]
    fn parse_rejects_short_input() {
        assert!(ProbeBody::parse(&[0u8; 10]).is_none());
    }

    #[test]
    fn rtt_handles_wraparound() {
        let body = ProbeBody::new(1, u32::MAX - 5, 0);
        // "now" wrapped past zero
        assert_eq!(body.rtt_usec(4), 10);
    }

    #[test]
    fn rtt_normal_case() {
        let body = ProbeBody::new(1, 1_000, 0);
        assert_eq!(body.rtt_usec(1_500), 500);
    }
}
