//! End-to-end sweep tests against a real loopback responder.
//!
//! These spin up a bound `SOCK_DGRAM` socket that plays the responder
//! role described in the wire-format contract (echo `signature` and
//! `pinger_sent_time_usec` unchanged) and drive a full `UdpPinger::run`
//! sweep against it, the way this codebase's own socket wrappers test
//! themselves against real bound sockets rather than mocks.
//!
//! Every test here opens a raw IPv6 socket for the sender side and is
//! therefore `#[ignore]`d by default — raw sockets with user-written UDP
//! headers require `CAP_NET_RAW` (or root) on typical operating systems.
//! Run with `cargo test -- --ignored` under sufficient privilege.

use std::net::{Ipv6Addr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use udp_pinger::{PingerConfig, Target, TestPlan, UdpPinger};

fn tiny_config(target_port: u16) -> PingerConfig {
    PingerConfig {
        target_port,
        num_sender_threads: 1,
        num_receiver_threads: 1,
        src_port_count: 8,
        base_src_port: 0,
        pinger_rate: 100.0,
        pinger_cooldown_time: Duration::from_millis(200),
        socket_buffer_size: 65536,
        qos: 0,
        histogram_bucket_width_usec: 100,
        histogram_max_usec: 1_000_000,
        data_interval_sec: 30,
        pin_worker_threads: false,
        net: udp_pinger::NetConfig::power_efficient(),
    }
}

/// Binds a `SOCK_DGRAM` responder on loopback that echoes every datagram
/// back to its sender unchanged, until `stop` is set.
fn spawn_loopback_responder(drop_every_nth: Option<usize>) -> (u16, Arc<AtomicBool>, thread::JoinHandle<()>) {
    let socket = UdpSocket::bind("[::1]:0").expect("bind responder");
    socket
        .set_read_timeout(Some(Duration::from_millis(50)))
        .unwrap();
    let port = socket.local_addr().unwrap().port();
    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = stop.clone();

    let handle = thread::spawn(move || {
        let mut buf = [0u8; 64];
        let mut count = 0usize;
        while !stop_clone.load(Ordering::SeqCst) {
            match socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    count += 1;
                    if let Some(nth) = drop_every_nth {
                        if count % nth == 0 {
                            continue;
                        }
                    }
                    let _ = socket.send_to(&buf[..n], from);
                }
                Err(_) => continue,
            }
        }
    });

    (port, stop, handle)
}

/// Binds a `SOCK_DGRAM` responder on loopback that replies to every
/// datagram only after `delay`, letting a test observe whether the
/// receiver still counts replies that arrive late in the sweep.
fn spawn_delayed_responder(delay: Duration) -> (u16, Arc<AtomicBool>, thread::JoinHandle<()>) {
    let socket = Arc::new(UdpSocket::bind("[::1]:0").expect("bind responder"));
    socket
        .set_read_timeout(Some(Duration::from_millis(50)))
        .unwrap();
    let port = socket.local_addr().unwrap().port();
    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = stop.clone();

    let handle = thread::spawn(move || {
        let mut buf = [0u8; 64];
        while !stop_clone.load(Ordering::SeqCst) {
            match socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    let data = buf[..n].to_vec();
                    let socket = socket.clone();
                    thread::spawn(move || {
                        thread::sleep(delay);
                        let _ = socket.send_to(&data, from);
                    });
                }
                Err(_) => continue,
            }
        }
    });

    (port, stop, handle)
}

#[test]
#[ignore = "opens a raw IPv6 socket; requires CAP_NET_RAW/root"]
fn single_target_full_delivery() {
    let _ = env_logger::try_init();
    let (port, stop, responder) = spawn_loopback_responder(None);

    let target = Target::new(Ipv6Addr::LOCALHOST, "net-a");
    let plan = TestPlan::new(target, 10);
    let pinger = UdpPinger::new(tiny_config(port), Ipv6Addr::LOCALHOST);
    let results = pinger.run(vec![plan], 0);

    stop.store(true, Ordering::SeqCst);
    responder.join().unwrap();

    assert_eq!(results.host_results.len(), 1);
    let row = &results.host_results[0];
    assert_eq!(row.num_xmit, 10);
    assert_eq!(row.num_recv, 10);
    assert_eq!(row.loss_ratio, 0.0);
}

#[test]
#[ignore = "opens a raw IPv6 socket; requires CAP_NET_RAW/root"]
fn partial_loss_is_reflected_in_loss_ratio() {
    let _ = env_logger::try_init();
    let (port, stop, responder) = spawn_loopback_responder(Some(2));

    let target = Target::new(Ipv6Addr::LOCALHOST, "net-a");
    let plan = TestPlan::new(target, 100);
    let mut cfg = tiny_config(port);
    cfg.pinger_rate = 500.0;
    let pinger = UdpPinger::new(cfg, Ipv6Addr::LOCALHOST);
    let results = pinger.run(vec![plan], 0);

    stop.store(true, Ordering::SeqCst);
    responder.join().unwrap();

    assert_eq!(results.host_results.len(), 1);
    let row = &results.host_results[0];
    assert_eq!(row.num_xmit, 100);
    assert!(
        (row.loss_ratio - 0.5).abs() < 0.1,
        "expected loss ratio near 0.5, got {}",
        row.loss_ratio
    );
}

#[test]
#[ignore = "opens a raw IPv6 socket; requires CAP_NET_RAW/root"]
fn two_networks_produce_two_network_rows() {
    let _ = env_logger::try_init();
    // Unreachable (documentation-range) IPv6 addresses: this exercises the
    // per-network xmit aggregation scenario without depending on the test
    // host having more than one loopback address configured. No responder
    // is listening, so num_recv stays 0 for every row — only the xmit sums
    // per network are asserted here.
    let mut plans = Vec::new();
    for i in 0..3u16 {
        let mut target = Target::new(format!("2001:db8::a:{i}").parse().unwrap(), "network-a");
        target.name = format!("host-a-{i}");
        plans.push(TestPlan::new(target, 20));
    }
    for i in 0..2u16 {
        let mut target = Target::new(format!("2001:db8::b:{i}").parse().unwrap(), "network-b");
        target.name = format!("host-b-{i}");
        plans.push(TestPlan::new(target, 20));
    }

    let pinger = UdpPinger::new(tiny_config(31338), Ipv6Addr::LOCALHOST);
    let results = pinger.run(plans, 0);

    assert_eq!(results.network_results.len(), 2);
    let net_a = results
        .network_results
        .iter()
        .find(|r| r.network == "network-a")
        .unwrap();
    let net_b = results
        .network_results
        .iter()
        .find(|r| r.network == "network-b")
        .unwrap();
    assert_eq!(net_a.num_xmit, 60);
    assert_eq!(net_b.num_xmit, 40);
}

#[test]
#[ignore = "opens a raw IPv6 socket; requires CAP_NET_RAW/root"]
fn cooldown_honors_late_replies() {
    let _ = env_logger::try_init();

    // Responder delay is fixed to cooldown - 500ms, per the spec's literal
    // scenario: a reply arriving after transmit completes but before the
    // cooldown window closes must still be counted.
    let cooldown = Duration::from_millis(1000);
    let reply_delay = cooldown - Duration::from_millis(500);
    let (port, stop, responder) = spawn_delayed_responder(reply_delay);

    let target = Target::new(Ipv6Addr::LOCALHOST, "net-a");
    let plan = TestPlan::new(target, 5);
    let mut cfg = tiny_config(port);
    cfg.pinger_rate = 50.0;
    cfg.pinger_cooldown_time = cooldown;
    let pinger = UdpPinger::new(cfg, Ipv6Addr::LOCALHOST);
    let results = pinger.run(vec![plan], 0);

    stop.store(true, Ordering::SeqCst);
    responder.join().unwrap();

    assert_eq!(results.host_results.len(), 1);
    let row = &results.host_results[0];
    assert_eq!(row.num_xmit, 5);
    assert_eq!(
        row.num_recv, 5,
        "a reply arriving within the cooldown window must still be counted"
    );
    assert_eq!(row.loss_ratio, 0.0);
}
