//! UDP transport
//!
//! Receiving happens on a background thread that parses datagrams and pushes
//! universe updates into a bounded ring buffer. Sending happens on the caller's
//! thread, one datagram per universe.

use std::collections::{HashMap, VecDeque};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

use super::packet::{self, ArtDmx, ArtPacket};
use crate::error::NetworkError;
use crate::universe::{PortAddress, UniverseUpdate};

/// Default ring buffer capacity for received updates
pub const DEFAULT_RECEIVE_QUEUE: usize = 256;

/// Socket read timeout, bounds how long shutdown waits for the thread
const READ_TIMEOUT: Duration = Duration::from_millis(100);

const MAX_DATAGRAM: usize = 2048;

/// Counters shared between the receive thread and the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransportCounters {
    pub packets_received: u64,
    pub protocol_errors: u64,
    pub updates_dropped: u64,
    pub packets_sent: u64,
}

/// Send/receive of universe data
pub trait DmxTransport: Send {
    /// Drain pending updates, waiting at most `max_wait` if none are queued
    fn receive(&mut self, max_wait: Duration) -> Vec<UniverseUpdate>;

    /// Transmit one universe
    fn send(&mut self, address: PortAddress, payload: &[u8]) -> Result<(), NetworkError>;

    fn counters(&self) -> TransportCounters;

    /// Stop receiving and release the socket
    fn close(&mut self);
}

/// Per-universe outbound sequence numbers, 1..=255 wrapping past 0
#[derive(Debug, Default)]
pub struct SequenceCounter {
    next: HashMap<PortAddress, u8>,
}

impl SequenceCounter {
    pub fn next(&mut self, address: PortAddress) -> u8 {
        let seq = self.next.entry(address).or_insert(1);
        let current = *seq;
        *seq = if current == u8::MAX { 1 } else { current + 1 };
        current
    }
}

/// Shared state between the transport and its receive thread
struct ReceiverState {
    queue: Mutex<VecDeque<UniverseUpdate>>,
    available: Condvar,
    running: AtomicBool,
    capacity: usize,
    packets_received: AtomicU64,
    protocol_errors: AtomicU64,
    updates_dropped: AtomicU64,
}

impl ReceiverState {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            running: AtomicBool::new(true),
            capacity: capacity.max(1),
            packets_received: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            updates_dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, update: UniverseUpdate) {
        if let Ok(mut queue) = self.queue.lock() {
            if queue.len() >= self.capacity {
                // Drop oldest update
                queue.pop_front();
                self.updates_dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(update);
        }
        self.available.notify_one();
    }

    fn drain(&self, max_wait: Duration) -> Vec<UniverseUpdate> {
        let Ok(mut queue) = self.queue.lock() else {
            return Vec::new();
        };
        if queue.is_empty() && !max_wait.is_zero() {
            queue = match self.available.wait_timeout(queue, max_wait) {
                Ok((q, _)) => q,
                Err(_) => return Vec::new(),
            };
        }
        queue.drain(..).collect()
    }
}

/// Art-Net over UDP
///
/// Receives on the bound address and sends from a separate socket on an
/// ephemeral port, so the wall's own output is never read back as input.
pub struct UdpTransport {
    socket: Option<UdpSocket>,
    local_addr: SocketAddr,
    target: SocketAddr,
    sequences: SequenceCounter,
    state: Arc<ReceiverState>,
    thread_handle: Option<JoinHandle<()>>,
    packets_sent: u64,
}

impl UdpTransport {
    /// Bind `bind` for receiving and send to `target`
    ///
    /// A bind failure is fatal for the caller.
    pub fn bind(
        bind: SocketAddr,
        target: SocketAddr,
        broadcast: bool,
        queue_capacity: usize,
    ) -> Result<Self, NetworkError> {
        let recv_socket = UdpSocket::bind(bind).map_err(|source| NetworkError::Bind { addr: bind, source })?;
        recv_socket.set_read_timeout(Some(READ_TIMEOUT))?;
        let local_addr = recv_socket.local_addr()?;

        let send_bind = SocketAddr::new(bind.ip(), 0);
        let socket = UdpSocket::bind(send_bind).map_err(|source| NetworkError::Bind {
            addr: send_bind,
            source,
        })?;
        socket.set_broadcast(broadcast)?;
        let send_addr = socket.local_addr()?;

        let state = Arc::new(ReceiverState::new(queue_capacity));
        let state_clone = Arc::clone(&state);

        let thread_handle = thread::Builder::new()
            .name("artnet-receiver".into())
            .spawn(move || Self::receive_loop(state_clone, recv_socket, send_addr))?;

        tracing::info!(%local_addr, %send_addr, %target, broadcast, "Art-Net transport bound");

        Ok(Self {
            socket: Some(socket),
            local_addr,
            target,
            sequences: SequenceCounter::default(),
            state,
            thread_handle: Some(thread_handle),
            packets_sent: 0,
        })
    }

    /// Address the receive socket is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn receive_loop(state: Arc<ReceiverState>, socket: UdpSocket, send_addr: SocketAddr) {
        tracing::debug!("Art-Net receiver thread started");
        let mut buf = vec![0u8; MAX_DATAGRAM];

        while state.running.load(Ordering::Acquire) {
            let (len, from) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Art-Net receive failed");
                    thread::sleep(READ_TIMEOUT);
                    continue;
                }
            };

            if is_own_datagram(from, send_addr) {
                continue;
            }

            state.packets_received.fetch_add(1, Ordering::Relaxed);
            match packet::decode(&buf[..len]) {
                Ok(ArtPacket::Dmx(dmx)) => state.push(dmx.into_update()),
                Ok(ArtPacket::Sync) => tracing::trace!(%from, "ArtSync ignored"),
                Err(e) => {
                    state.protocol_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(%from, error = %e, "Discarding malformed packet");
                }
            }
        }

        tracing::debug!("Art-Net receiver thread stopping");
    }
}

/// Whether a datagram came back from our own send socket
///
/// A send socket on the unspecified address is matched by port alone.
fn is_own_datagram(from: SocketAddr, send_addr: SocketAddr) -> bool {
    from.port() == send_addr.port() && (send_addr.ip().is_unspecified() || from.ip() == send_addr.ip())
}

impl DmxTransport for UdpTransport {
    fn receive(&mut self, max_wait: Duration) -> Vec<UniverseUpdate> {
        self.state.drain(max_wait)
    }

    fn send(&mut self, address: PortAddress, payload: &[u8]) -> Result<(), NetworkError> {
        let Some(socket) = self.socket.as_ref() else {
            return Err(NetworkError::Closed);
        };
        let sequence = self.sequences.next(address);
        let datagram = ArtDmx::new(address, sequence, Bytes::copy_from_slice(payload)).encode();
        socket
            .send_to(&datagram, self.target)
            .map_err(|source| NetworkError::Send {
                universe: address.to_u16(),
                source,
            })?;
        self.packets_sent += 1;
        Ok(())
    }

    fn counters(&self) -> TransportCounters {
        TransportCounters {
            packets_received: self.state.packets_received.load(Ordering::Relaxed),
            protocol_errors: self.state.protocol_errors.load(Ordering::Relaxed),
            updates_dropped: self.state.updates_dropped.load(Ordering::Relaxed),
            packets_sent: self.packets_sent,
        }
    }

    /// Stop the receive thread and release both sockets
    fn close(&mut self) {
        self.state.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            // The receive socket is dropped when the thread exits
            if handle.join().is_err() {
                tracing::error!("Art-Net receiver thread panicked");
            }
        }
        if self.socket.take().is_some() {
            tracing::info!(local_addr = %self.local_addr, "Art-Net transport closed");
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// A packet recorded by [`MemoryTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub address: PortAddress,
    pub sequence: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    incoming: VecDeque<UniverseUpdate>,
    sent: Vec<SentPacket>,
    fail_sends: bool,
    closed: bool,
}

/// In-process transport for dry runs and tests
///
/// Clones share the same queues, so one handle can feed updates and inspect
/// sent packets while the pipeline owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<MemoryInner>>,
    sequences: Arc<Mutex<SequenceCounter>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an update as if it had arrived from the network
    pub fn inject(&self, update: UniverseUpdate) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.incoming.push_back(update);
        }
    }

    /// Everything sent so far
    pub fn sent(&self) -> Vec<SentPacket> {
        self.inner.lock().map(|inner| inner.sent.clone()).unwrap_or_default()
    }

    /// Make subsequent sends fail with an I/O error
    pub fn set_fail_sends(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_sends = fail;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().map(|inner| inner.closed).unwrap_or(true)
    }
}

impl DmxTransport for MemoryTransport {
    fn receive(&mut self, _max_wait: Duration) -> Vec<UniverseUpdate> {
        self.inner
            .lock()
            .map(|mut inner| inner.incoming.drain(..).collect())
            .unwrap_or_default()
    }

    fn send(&mut self, address: PortAddress, payload: &[u8]) -> Result<(), NetworkError> {
        let mut inner = self.inner.lock().map_err(|_| NetworkError::Closed)?;
        if inner.closed {
            return Err(NetworkError::Closed);
        }
        if inner.fail_sends {
            return Err(NetworkError::Send {
                universe: address.to_u16(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "simulated send failure"),
            });
        }
        let sequence = self
            .sequences
            .lock()
            .map(|mut s| s.next(address))
            .unwrap_or(0);
        inner.sent.push(SentPacket {
            address,
            sequence,
            data: payload.to_vec(),
        });
        Ok(())
    }

    fn counters(&self) -> TransportCounters {
        TransportCounters {
            packets_sent: self.inner.lock().map(|inner| inner.sent.len() as u64).unwrap_or(0),
            ..Default::default()
        }
    }

    fn close(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_sequence_counter_skips_zero() {
        let mut counter = SequenceCounter::default();
        let addr = PortAddress::from_u16(1);
        assert_eq!(counter.next(addr), 1);
        for _ in 0..253 {
            counter.next(addr);
        }
        assert_eq!(counter.next(addr), 255);
        assert_eq!(counter.next(addr), 1);
        // Independent per universe
        assert_eq!(counter.next(PortAddress::from_u16(2)), 1);
    }

    #[test]
    fn test_receiver_state_drops_oldest() {
        let state = ReceiverState::new(2);
        for seq in 1..=3 {
            state.push(UniverseUpdate {
                address: PortAddress::default(),
                sequence: seq,
                data: vec![seq],
            });
        }
        let drained = state.drain(Duration::ZERO);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].sequence, 2);
        assert_eq!(state.updates_dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_receiver_state_bounded_wait() {
        let state = ReceiverState::new(4);
        let start = Instant::now();
        assert!(state.drain(Duration::from_millis(20)).is_empty());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_memory_transport_records_sends() {
        let mut transport = MemoryTransport::new();
        let handle = transport.clone();
        transport.send(PortAddress::from_u16(3), &[1, 2, 3]).unwrap();
        transport.send(PortAddress::from_u16(3), &[4]).unwrap();
        let sent = handle.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].sequence, 1);
        assert_eq!(sent[1].sequence, 2);

        transport.close();
        assert!(handle.is_closed());
        assert!(transport.send(PortAddress::default(), &[0]).is_err());
    }

    #[test]
    fn test_udp_loopback() {
        let localhost: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut receiver = UdpTransport::bind(localhost, localhost, false, 16).unwrap();
        let target = receiver.local_addr();
        let mut sender = UdpTransport::bind(localhost, target, false, 16).unwrap();

        sender.send(PortAddress::from_u16(5), &[10, 20, 30, 40]).unwrap();

        // Garbage is counted, not delivered
        let raw = UdpSocket::bind(localhost).unwrap();
        raw.send_to(b"not art-net at all", target).unwrap();

        let mut updates = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while updates.is_empty() && Instant::now() < deadline {
            updates.extend(receiver.receive(Duration::from_millis(50)));
        }

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].address, PortAddress::from_u16(5));
        assert_eq!(updates[0].sequence, 1);
        assert_eq!(updates[0].data, vec![10, 20, 30, 40]);

        let deadline = Instant::now() + Duration::from_secs(2);
        while receiver.counters().protocol_errors == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(receiver.counters().protocol_errors, 1);

        receiver.close();
        sender.close();
    }

    #[test]
    fn test_own_output_is_not_received() {
        let localhost: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut transport = UdpTransport::bind(localhost, localhost, false, 16).unwrap();
        let own_addr = transport.local_addr();
        transport.target = own_addr;

        // Our own frame loops straight back to the receive port
        transport.send(PortAddress::from_u16(0), &[200, 1, 2, 3, 4]).unwrap();

        let console = UdpSocket::bind(localhost).unwrap();
        let datagram = ArtDmx::new(PortAddress::from_u16(7), 3, vec![9u8, 9]).encode();
        console.send_to(&datagram, own_addr).unwrap();

        let mut updates = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while updates.is_empty() && Instant::now() < deadline {
            updates.extend(transport.receive(Duration::from_millis(50)));
        }
        // Give a late echo a chance to show up
        updates.extend(transport.receive(Duration::from_millis(50)));

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].address, PortAddress::from_u16(7));
        assert_eq!(transport.counters().packets_received, 1);
    }

    #[test]
    fn test_own_datagram_matching() {
        let own: SocketAddr = "10.0.0.5:40000".parse().unwrap();
        let any: SocketAddr = "0.0.0.0:40000".parse().unwrap();
        assert!(is_own_datagram("10.0.0.5:40000".parse().unwrap(), own));
        assert!(!is_own_datagram("10.0.0.6:40000".parse().unwrap(), own));
        assert!(!is_own_datagram("10.0.0.5:6454".parse().unwrap(), own));
        assert!(is_own_datagram("192.168.1.2:40000".parse().unwrap(), any));
    }

    #[test]
    fn test_close_releases_socket() {
        let localhost: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut transport = UdpTransport::bind(localhost, localhost, false, 16).unwrap();
        let addr = transport.local_addr();

        transport.close();

        assert!(UdpSocket::bind(addr).is_ok());
        assert!(matches!(
            transport.send(PortAddress::default(), &[0, 0]),
            Err(NetworkError::Closed)
        ));
        // Second close is a no-op
        transport.close();
    }
}
