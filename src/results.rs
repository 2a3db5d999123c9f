//! Sweep output types
//!
//! `UdpPinger::run` returns a [`UdpTestResults`] bundling per-host and
//! per-network [`TestResult`]s. Label generation in [`TestResult::labels`]
//! matches the exact label set a downstream metrics sink expects.

use crate::target::Target;

/// Aggregated send/receive/latency statistics for one host or one network
/// over the course of a sweep.
#[derive(Clone, Debug, PartialEq)]
pub struct TestResult {
    pub network: String,
    pub data_interval: u32,
    /// Present only for per-host rows; `None` for per-network rows.
    pub target: Option<Target>,
    pub num_xmit: u64,
    pub num_recv: u64,
    pub loss_ratio: f64,
    pub rtt_avg_usec: f64,
    pub rtt_p75_usec: u32,
    pub rtt_p90_usec: u32,
    pub rtt_max_usec: u32,
}

impl TestResult {
    /// Builds a result row from raw transmit/receive counts and latency
    /// summary values. `loss_ratio` is clamped to `[0, 1]` and RTT fields
    /// are zeroed when nothing was received, per the summarization
    /// contract.
    pub fn new(
        network: String,
        data_interval: u32,
        target: Option<Target>,
        num_xmit: u64,
        num_recv: u64,
        rtt_avg_usec: f64,
        rtt_p75_usec: u32,
        rtt_p90_usec: u32,
        rtt_max_usec: u32,
    ) -> Self {
        let loss_ratio = if num_xmit == 0 {
            0.0
        } else {
            ((num_xmit.saturating_sub(num_recv)) as f64 / num_xmit as f64).clamp(0.0, 1.0)
        };
        let (rtt_avg_usec, rtt_p75_usec, rtt_p90_usec, rtt_max_usec) = if num_recv == 0 {
            (0.0, 0, 0, 0)
        } else {
            (rtt_avg_usec, rtt_p75_usec, rtt_p90_usec, rtt_max_usec)
        };
        Self {
            network,
            data_interval,
            target,
            num_xmit,
            num_recv,
            loss_ratio,
            rtt_avg_usec,
            rtt_p75_usec,
            rtt_p90_usec,
            rtt_max_usec,
        }
    }

    /// Produces the label set a time-series sink attaches to this row:
    /// `network`, `data_interval`, and, for host rows with a non-empty
    /// name, `node_mac`/`node_name`/`node_is_pop`/`node_is_cn`/`site_name`.
    pub fn labels(&self) -> Vec<(&'static str, String)> {
        let mut labels = vec![
            ("network", self.network.clone()),
            ("data_interval", self.data_interval.to_string()),
        ];
        if let Some(target) = &self.target {
            if !target.name.is_empty() {
                labels.push(("node_mac", target.mac.clone()));
                labels.push(("node_name", target.name.clone()));
                labels.push(("node_is_pop", target.is_pop.to_string()));
                labels.push(("node_is_cn", target.is_cn.to_string()));
                labels.push(("site_name", target.site_name.clone()));
            }
        }
        labels
    }
}

/// The complete output of one sweep: one row per host plus one row per
/// network it belongs to.
#[derive(Clone, Debug, Default)]
pub struct UdpTestResults {
    pub host_results: Vec<TestResult>,
    pub network_results: Vec<TestResult>,
}

impl UdpTestResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges another thread's partial results into this one. Per-host rows
    /// are appended directly; per-network rows for the same network are
    /// summed together since multiple receivers may contribute samples for
    /// the same network under different target subsets.
    pub fn merge(&mut self, mut other: UdpTestResults) {
        self.host_results.append(&mut other.host_results);

        for incoming in other.network_results {
            if let Some(existing) = self
                .network_results
                .iter_mut()
                .find(|r| r.network == incoming.network)
            {
                let total_xmit = existing.num_xmit + incoming.num_xmit;
                let total_recv = existing.num_recv + incoming.num_recv;
                *existing = TestResult::new(
                    existing.network.clone(),
                    existing.data_interval,
                    None,
                    total_xmit,
                    total_recv,
                    existing.rtt_avg_usec.max(incoming.rtt_avg_usec),
                    existing.rtt_p75_usec.max(incoming.rtt_p75_usec),
                    existing.rtt_p90_usec.max(incoming.rtt_p90_usec),
                    existing.rtt_max_usec.max(incoming.rtt_max_usec),
                );
            } else {
                self.network_results.push(incoming);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_ratio_is_zero_on_full_delivery() {
        let r = TestResult::new("net-a".into(), 10, None, 10, 10, 500.0, 400, 450, 600);
        assert_eq!(r.loss_ratio, 0.0);
    }

    #[test]
    fn rtt_fields_are_zeroed_when_nothing_received() {
        let r = TestResult::new("net-a".into(), 10, None, 10, 0, 500.0, 400, 450, 600);
        assert_eq!(r.loss_ratio, 1.0);
        assert_eq!(r.rtt_avg_usec, 0.0);
        assert_eq!(r.rtt_max_usec, 0);
    }

    #[test]
    fn labels_include_node_fields_only_when_named() {
        let mut target = Target::new("::1".parse().unwrap(), "net-a");
        let mut r = TestResult::new("net-a".into(), 10, Some(target.clone()), 10, 10, 1.0, 1, 1, 1);
        let labels = r.labels();
        assert!(labels.iter().all(|(k, _)| *k != "node_mac"));

        target.name = "node-1".into();
        r.target = Some(target);
        let labels = r.labels();
        assert!(labels.iter().any(|(k, v)| *k == "node_name" && v == "node-1"));
    }

    #[test]
    fn merge_sums_network_rows() {
        let mut a = UdpTestResults::new();
        a.network_results.push(TestResult::new(
            "net-a".into(), 10, None, 10, 10, 100.0, 90, 95, 120,
        ));
        let mut b = UdpTestResults::new();
        b.network_results.push(TestResult::new(
            "net-a".into(), 10, None, 20, 15, 150.0, 140, 160, 200,
        ));
        a.merge(b);
        assert_eq!(a.network_results.len(), 1);
        assert_eq!(a.network_results[0].num_xmit, 30);
        assert_eq!(a.network_results[0].num_recv, 25);
    }
}
