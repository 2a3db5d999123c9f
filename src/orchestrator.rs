//! `UdpPinger`: orchestrates one ping sweep end to end
//!
//! Ties together the wire format, raw-socket sender, reactor-based
//! receiver, and histogram aggregation into the single entry point this
//! crate exposes: [`UdpPinger::run`]. A `UdpPinger` value carries no
//! state across sweeps beyond its configuration and source IP — every
//! queue, socket, and histogram used during a sweep is created fresh in
//! `run` and torn down before it returns, matching this engine's
//! no-persistent-state lifecycle.

use std::collections::{HashMap, HashSet};
use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam::queue::{ArrayQueue, SegQueue};

use crate::affinity;
use crate::config::PingerConfig;
use crate::receiver::{self, ReceiverShared, NOTIFICATION_QUEUE_CAPACITY};
use crate::results::{TestResult, UdpTestResults};
use crate::sender::UdpSender;
use crate::target::{Target, TestPlan};

/// Runs ping sweeps against a fleet of IPv6 targets.
///
/// `UdpPinger` is a plain, independently-constructible value — no global
/// state, no singleton registry. Build one per source address/config
/// combination and call [`UdpPinger::run`] once per sweep.
#[derive(Clone, Debug)]
pub struct UdpPinger {
    config: PingerConfig,
    src_ip: Ipv6Addr,
}

impl UdpPinger {
    /// Creates a pinger that sends probes from `src_ip` using `config`.
    pub fn new(config: PingerConfig, src_ip: Ipv6Addr) -> Self {
        Self { config, src_ip }
    }

    pub fn config(&self) -> &PingerConfig {
        &self.config
    }

    /// Runs one complete sweep against `plans`, probing every target with
    /// IPv6 traffic class byte `qos`, and returns the merged per-host and
    /// per-network results.
    ///
    /// This call is synchronous: it blocks until every sender has drained
    /// the shared plan queue, the configured cooldown has elapsed, and
    /// every receiver has drained its notification queue and summarized
    /// its share of targets. It never panics or returns an `Err` — setup
    /// failures that affect only part of the fleet surface as degraded
    /// rows in the returned [`UdpTestResults`] or as log records, per this
    /// engine's error-handling contract.
    pub fn run(&self, plans: Vec<TestPlan>, qos: u8) -> UdpTestResults {
        let signature: u32 = rand::random();
        let num_receivers = self.config.num_receiver_threads.max(1);
        let num_senders = self.config.num_sender_threads.max(1);
        let cfg = {
            let mut c = self.config.clone();
            c.qos = qos;
            c
        };

        let ip_to_target: Arc<HashMap<Ipv6Addr, Target>> = Arc::new(
            plans
                .iter()
                .map(|p| (p.target.ip, p.target.clone()))
                .collect(),
        );

        let queues = Arc::new(
            (0..num_receivers)
                .map(|_| ArrayQueue::new(NOTIFICATION_QUEUE_CAPACITY))
                .collect::<Vec<_>>(),
        );
        let stop = Arc::new(AtomicBool::new(false));
        let bound_flags = Arc::new(
            (0..num_receivers)
                .map(|_| AtomicBool::new(false))
                .collect::<Vec<_>>(),
        );
        let missing = Arc::new(Mutex::new(vec![HashSet::new(); num_receivers]));
        let plans_for_summary: Arc<Mutex<Vec<TestPlan>>> = Arc::new(Mutex::new(plans.clone()));

        let cpu_count = affinity::get_cpu_count();

        let mut receiver_handles = Vec::with_capacity(num_receivers);
        let mut failed_receivers = Vec::new();
        for id in 0..num_receivers {
            let shared = ReceiverShared {
                ip_to_target: ip_to_target.clone(),
                queues: queues.clone(),
                stop: stop.clone(),
                bound_flags: bound_flags.clone(),
                missing: missing.clone(),
            };
            let plans_for_summary = plans_for_summary.clone();
            let cfg = cfg.clone();
            let data_interval = self.config.data_interval_sec;
            let spawned = thread::Builder::new()
                .name(format!("udp-receiver-{id}"))
                .spawn(move || {
                    if cfg.pin_worker_threads {
                        let _ = affinity::pin_to_cpu(id % cpu_count.max(1));
                    }
                    receiver::run(
                        id,
                        num_receivers,
                        signature,
                        &cfg,
                        shared,
                        plans_for_summary,
                        data_interval,
                    )
                });
            match spawned {
                Ok(handle) => receiver_handles.push(Some((id, handle))),
                Err(e) => {
                    let err = crate::error::PingerError::ThreadSpawn(e);
                    log::error!("failed to spawn receiver thread {id}: {err}");
                    bound_flags[id].store(true, Ordering::SeqCst);
                    receiver_handles.push(None);
                    failed_receivers.push(id);
                }
            }
        }

        // Wait for every receiver to either finish binding or to have
        // already failed (bound_flags was pre-set above for spawn
        // failures and is set by `receiver::run` itself on bind failure).
        while bound_flags.iter().any(|f| !f.load(Ordering::SeqCst)) {
            thread::sleep(std::time::Duration::from_millis(1));
        }

        let global_missing: HashSet<u16> = missing
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .flat_map(|s| s.iter().copied())
            .collect();

        let queue = Arc::new(SegQueue::new());
        for plan in plans {
            queue.push(plan);
        }

        let mut sender_handles = Vec::with_capacity(num_senders);
        for id in 0..num_senders {
            let queue = queue.clone();
            let cfg = cfg.clone();
            let src_ip = self.src_ip;
            let missing_ports = global_missing.clone();
            let spawned = thread::Builder::new()
                .name(format!("udp-sender-{id}"))
                .spawn(move || {
                    if cfg.pin_worker_threads {
                        let _ = affinity::pin_to_cpu(id % cpu_count.max(1));
                    }
                    match UdpSender::new(id, signature, src_ip, &cfg, missing_ports) {
                        Ok(mut sender) => sender.run(&queue),
                        Err(e) => {
                            log::error!("sender {id} failed to start: {e}");
                            Vec::new()
                        }
                    }
                });
            match spawned {
                Ok(handle) => sender_handles.push(handle),
                Err(e) => {
                    let err = crate::error::PingerError::ThreadSpawn(e);
                    log::error!("failed to spawn sender thread {id}: {err}");
                }
            }
        }

        let mut completed_plans = Vec::new();
        for handle in sender_handles {
            match handle.join() {
                Ok(mut plans) => completed_plans.append(&mut plans),
                Err(_) => log::error!("sender thread panicked"),
            }
        }

        if let Ok(mut guard) = plans_for_summary.lock() {
            *guard = completed_plans;
        }

        thread::sleep(self.config.pinger_cooldown_time);
        stop.store(true, Ordering::SeqCst);

        let mut results = UdpTestResults::new();
        for slot in receiver_handles {
            let Some((id, handle)) = slot else { continue };
            match handle.join() {
                Ok(Ok(partial)) => results.merge(partial),
                Ok(Err(e)) => {
                    log::error!("receiver {id} failed to bind any sockets: {e}");
                    failed_receivers.push(id);
                }
                Err(_) => {
                    log::error!("receiver {id} thread panicked");
                    failed_receivers.push(id);
                }
            }
        }

        for id in failed_receivers {
            results.network_results.push(TestResult::new(
                format!("<receiver-{id}-bind-failed>"),
                self.config.data_interval_sec,
                None,
                0,
                0,
                0.0,
                0,
                0,
                0,
            ));
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PingerConfig;

    fn tiny_config() -> PingerConfig {
        PingerConfig {
            target_port: 0,
            num_sender_threads: 1,
            num_receiver_threads: 1,
            src_port_count: 4,
            base_src_port: 0,
            pinger_rate: 1000.0,
            pinger_cooldown_time: std::time::Duration::from_millis(50),
            socket_buffer_size: 65536,
            qos: 0,
            histogram_bucket_width_usec: 100,
            histogram_max_usec: 1_000_000,
            data_interval_sec: 30,
            pin_worker_threads: false,
            net: crate::config::NetConfig::power_efficient(),
        }
    }

    #[test]
    #[ignore = "opens a raw IPv6 socket; requires CAP_NET_RAW/root"]
    fn run_with_no_plans_returns_empty_results() {
        let pinger = UdpPinger::new(tiny_config(), Ipv6Addr::LOCALHOST);
        let results = pinger.run(Vec::new(), 0);
        assert!(results.host_results.is_empty());
    }

    #[test]
    #[ignore = "opens a raw IPv6 socket; requires CAP_NET_RAW/root"]
    fn unreachable_target_reports_total_loss() {
        // fd00::dead is non-routable from a test sandbox; no responder is
        // listening, so every probe should be counted as loss.
        let target = Target::new("fd00::dead".parse().unwrap(), "net-a");
        let plan = TestPlan::new(target, 3);
        let pinger = UdpPinger::new(tiny_config(), Ipv6Addr::LOCALHOST);
        let results = pinger.run(vec![plan], 0);
        assert_eq!(results.host_results.len(), 1);
        assert_eq!(results.host_results[0].num_xmit, 3);
        assert_eq!(results.host_results[0].num_recv, 0);
        assert_eq!(results.host_results[0].loss_ratio, 1.0);
    }
}
