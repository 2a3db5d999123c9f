//! Asynchronous UDP receive socket with a reactor-style read callback
//!
//! Generalizes this crate's `rt_mio` runtime into the receive-side contract
//! the engine needs: a non-blocking, edge-triggered UDP socket that hands
//! each readable event to a caller-supplied [`ReadCallback`] rather than
//! exposing a blocking `recv` API.
//!
//! The error-handling behavior here is a deliberate departure from the
//! read-dispatch pattern this crate's sibling async socket code follows
//! elsewhere in this corpus: on a real (non-`WouldBlock`) receive error,
//! the socket reports it to the callback and stays in
//! [`SocketState::Reading`] rather than tearing itself down. UDP has no
//! connection to lose, so one bad datagram should never stop the socket
//! from reading the next one.

use std::io;
use std::net::SocketAddr;

use mio::net::UdpSocket as MioUdpSocket;

use crate::config::NetConfig;
use crate::raw as r;

/// Lifecycle of an asynchronous UDP receive socket.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SocketState {
    Unbound,
    Bound,
    Reading,
    Closed,
}

/// Callback invoked by [`AsyncUdpSocket`] as datagrams and error events
/// arrive. Implementors typically own per-socket state (histograms,
/// notification queues) and are expected not to block.
pub trait ReadCallback {
    /// Called once per successfully received datagram.
    fn on_message_available(&mut self, data: &[u8], from: SocketAddr);

    /// Called on any `recvmsg` error other than `WouldBlock`/`EAGAIN`/
    /// `EINTR`, which are silently absorbed by the read loop and never
    /// reach the callback. The socket remains `Reading` after this call.
    fn on_read_error(&mut self, err: &io::Error);

    /// Called once when the socket transitions to `Closed` while a
    /// callback was still installed.
    fn on_read_closed(&mut self) {}
}

/// A non-blocking, bound UDP socket driven by a reactor loop.
pub struct AsyncUdpSocket {
    socket: MioUdpSocket,
    state: SocketState,
    recv_buf: Vec<u8>,
}

impl AsyncUdpSocket {
    /// Binds a new IPv6 UDP socket to `addr`, applying `cfg`'s tuning plus
    /// `socket_buffer_size` on `SO_{SND,RCV}BUF` (overriding whatever
    /// `cfg.recv_buf`/`cfg.send_buf` would otherwise set, so every socket
    /// this engine opens — sender and receiver alike — ends up sized by the
    /// one sweep-level knob the caller actually configured).
    ///
    /// A bind failure here is the caller's responsibility to handle as a
    /// "missing port" rather than a fatal condition; this function simply
    /// surfaces the OS error.
    pub fn bind(
        addr: SocketAddr,
        cfg: &NetConfig,
        recv_buf_capacity: usize,
        socket_buffer_size: usize,
    ) -> io::Result<Self> {
        let (_domain, mut sa, len) = r::to_sockaddr(addr);
        if let (SocketAddr::V6(a), r::SockAddr::V6(ref mut s6)) = (addr, &mut sa) {
            s6.sin6_port = a.port().to_be();
        }
        let os = r::socket(r::Domain::Ipv6, r::Type::Dgram, r::Protocol::Udp)?;
        r::set_nonblocking(os, true)?;
        crate::config::apply_low_latency(os, r::Domain::Ipv6, r::Type::Dgram, cfg)?;
        r::set_recv_buffer(os, socket_buffer_size as i32)?;
        r::set_send_buffer(os, socket_buffer_size as i32)?;
        // IPV6_V6ONLY=1 unconditionally: this engine only ever speaks IPv6
        // on these sockets, regardless of what a shared NetConfig preset
        // (built for dual-stack-capable generic use) requests.
        r::set_ipv6_only(os, true)?;
        if cfg.reuse_port {
            r::set_reuse_addr(os, true)?;
            let _ = r::set_reuse_port(os, true);
        }
        unsafe {
            r::bind_raw(os, &sa, len)?;
        }
        let std_socket = unsafe { r::udp_from_os(os) };
        let socket = MioUdpSocket::from_std(std_socket);

        Ok(Self {
            socket,
            state: SocketState::Bound,
            recv_buf: vec![0u8; recv_buf_capacity],
        })
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Exposes the underlying mio socket for a caller that owns a single
    /// `mio::Poll` shared across several sockets (a receiver's port
    /// partition), rather than going through [`crate::rt::Runtime`].
    pub(crate) fn mio_socket_mut(&mut self) -> &mut MioUdpSocket {
        &mut self.socket
    }

    /// Transitions this socket into the `Reading` state. Paired with
    /// [`AsyncUdpSocket::mio_socket_mut`] for callers that register the
    /// socket against their own `mio::Poll` directly.
    pub(crate) fn mark_reading(&mut self) {
        self.state = SocketState::Reading;
    }

    /// Drains all datagrams currently available without blocking,
    /// dispatching each to `callback`. Returns once `recv_from` reports
    /// `WouldBlock`.
    ///
    /// On a non-`WouldBlock` error, `callback.on_read_error` is invoked and
    /// the read loop stops for this call, but the socket's state remains
    /// `Reading` — the next readable event will try again.
    pub fn read_available(&mut self, callback: &mut dyn ReadCallback) {
        if self.state != SocketState::Reading {
            return;
        }
        loop {
            match self.socket.recv_from(&mut self.recv_buf) {
                Ok((n, from)) => {
                    callback.on_message_available(&self.recv_buf[..n], from);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    callback.on_read_error(&e);
                    break;
                }
            }
        }
    }

    /// Closes the socket. If it was still `Reading`, `on_read_closed` is
    /// invoked on `callback` first.
    pub fn close(&mut self, callback: &mut dyn ReadCallback) {
        if self.state == SocketState::Reading {
            callback.on_read_closed();
        }
        self.state = SocketState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingCallback {
        messages: Vec<(Vec<u8>, SocketAddr)>,
        errors: usize,
        closed: bool,
    }

    impl ReadCallback for RecordingCallback {
        fn on_message_available(&mut self, data: &[u8], from: SocketAddr) {
            self.messages.push((data.to_vec(), from));
        }
        fn on_read_error(&mut self, _err: &io::Error) {
            self.errors += 1;
        }
        fn on_read_closed(&mut self) {
            self.closed = true;
        }
    }

    #[test]
    fn bind_starts_in_bound_state() {
        let addr: SocketAddr = "[::1]:0".parse().unwrap();
        let socket = AsyncUdpSocket::bind(addr, &NetConfig::default(), 2048, 65536).unwrap();
        assert_eq!(socket.state(), SocketState::Bound);
    }

    #[test]
    fn read_available_is_noop_before_reading_state() {
        let addr: SocketAddr = "[::1]:0".parse().unwrap();
        let mut socket = AsyncUdpSocket::bind(addr, &NetConfig::default(), 2048, 65536).unwrap();
        let mut cb = RecordingCallback::default();
        socket.read_available(&mut cb);
        assert!(cb.messages.is_empty());
    }

    #[test]
    fn close_invokes_on_read_closed_only_if_reading() {
        let addr: SocketAddr = "[::1]:0".parse().unwrap();
        let mut socket = AsyncUdpSocket::bind(addr, &NetConfig::default(), 2048, 65536).unwrap();
        let mut cb = RecordingCallback::default();
        // Not in Reading state yet (never registered with a runtime).
        socket.close(&mut cb);
        assert!(!cb.closed);
    }

    #[test]
    fn shared_counter_survives_across_calls() {
        // Sanity check that callback state accumulates across repeated
        // read_available calls, the way a receiver's histogram maps do.
        let counter = Arc::new(Mutex::new(0usize));
        struct CountingCallback(Arc<Mutex<usize>>);
        impl ReadCallback for CountingCallback {
            fn on_message_available(&mut self, _data: &[u8], _from: SocketAddr) {
                *self.0.lock().unwrap() += 1;
            }
            fn on_read_error(&mut self, _err: &io::Error) {}
        }
        let mut cb = CountingCallback(counter.clone());
        let addr: SocketAddr = "[::1]:0".parse().unwrap();
        let mut socket = AsyncUdpSocket::bind(addr, &NetConfig::default(), 2048, 65536).unwrap();
        socket.read_available(&mut cb);
        assert_eq!(*counter.lock().unwrap(), 0);
    }
}
