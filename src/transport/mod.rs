//! # Transport Substrate
//!
//! This module decouples the handshake state machine from any particular
//! datagram carrier. The state machine talks to a [`TransportHandle`]; a
//! concrete carrier (UDP loopback, in-process pair, serial, ...) talks to
//! the matching [`CarrierEndpoint`]. The two sides share a pair of bounded
//! byte rings:
//!
//! ```text
//! ┌──────────────────┐  send ┌───────────────────┐ direct-send ┌─────────┐
//! │    Handshake     │──────▶│  TransportHandle  │────────────▶│ Carrier │
//! │  state machine   │       │   (session side)  │  or tx ring │ (UDP,..)│
//! │                  │◀──────│     rx ring       │◀────────────│         │
//! └──────────────────┘  recv └───────────────────┘  put_recv   └─────────┘
//! ```
//!
//! ## Key properties
//!
//! - **Bounded receive queue**: a byte-granular ring sized to at least one
//!   MTU, rounded up to a power of two. On overflow the newest bytes are
//!   dropped and the producer learns the accepted count.
//! - **Blocking receive with timeout**: `recv` suspends the worker until at
//!   least one byte is available or the timeout lapses.
//! - **Pluggable send path**: carriers that can transmit inline install a
//!   [`DatagramSender`]; otherwise sends accumulate in an outbound ring the
//!   carrier drains.
//! - **Single producer, single consumer** per ring: the carrier's receiver
//!   task fills the rx ring while the session worker drains it, coordinated
//!   by a mutex over the ring indices and a notify for "bytes available".

use crate::error::AuthError;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

pub mod memory;
pub mod udp;

pub use udp::{UdpCarrier, UdpCarrierConfig};

/// Lifecycle events exchanged between a carrier and the session side.
///
/// Events are advisory. The handshake never consumes them directly and a
/// lost event never fails an authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    None,
    Connect,
    Disconnect,
    Reconnect,
    /// Serial carriers renegotiating line speed
    SerialBaudChange(u32),
}

/// Direct transmission capability installed by carriers that can send a
/// datagram inline (a connected socket, a serial line writer).
#[async_trait]
pub trait DatagramSender: Send + Sync {
    /// Transmit one datagram, returning the number of bytes written.
    async fn send(&self, data: &[u8]) -> Result<usize, AuthError>;
}

/// Byte-granular bounded ring with blocking consumption.
///
/// Capacity is rounded up to a power of two so wrap arithmetic is a mask.
/// One producer and one consumer may run concurrently on different tasks.
pub struct ByteQueue {
    state: Mutex<RingState>,
    readable: Notify,
    capacity: usize,
}

struct RingState {
    buf: Box<[u8]>,
    head: usize,
    len: usize,
}

impl ByteQueue {
    /// Create a ring holding at least `min_capacity` bytes.
    pub fn new(min_capacity: usize) -> Self {
        let capacity = min_capacity.max(1).next_power_of_two();
        Self {
            state: Mutex::new(RingState {
                buf: vec![0u8; capacity].into_boxed_slice(),
                head: 0,
                len: 0,
            }),
            readable: Notify::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently queued.
    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue bytes, dropping whatever does not fit (drop-newest).
    ///
    /// Returns the number of bytes accepted. Waiting consumers are woken
    /// whenever at least one byte was stored.
    pub fn push(&self, data: &[u8]) -> usize {
        let accepted = {
            let mut st = self.state.lock();
            let free = self.capacity - st.len;
            let n = data.len().min(free);
            let mask = self.capacity - 1;
            let mut write = (st.head + st.len) & mask;
            for &byte in &data[..n] {
                st.buf[write] = byte;
                write = (write + 1) & mask;
            }
            st.len += n;
            n
        };
        if accepted > 0 {
            self.readable.notify_one();
        }
        accepted
    }

    /// Dequeue up to `buf.len()` bytes without waiting.
    pub fn pop(&self, buf: &mut [u8]) -> usize {
        let mut st = self.state.lock();
        let n = buf.len().min(st.len);
        let mask = self.capacity - 1;
        for slot in buf[..n].iter_mut() {
            *slot = st.buf[st.head];
            st.head = (st.head + 1) & mask;
        }
        st.len -= n;
        n
    }

    /// Copy up to `buf.len()` bytes without consuming them.
    pub fn peek(&self, buf: &mut [u8]) -> usize {
        let st = self.state.lock();
        let n = buf.len().min(st.len);
        let mask = self.capacity - 1;
        for (i, slot) in buf[..n].iter_mut().enumerate() {
            *slot = st.buf[(st.head + i) & mask];
        }
        n
    }

    /// Dequeue at least one byte, waiting up to `timeout` for data.
    ///
    /// A zero timeout is a non-blocking poll. An empty ring at the deadline
    /// yields [`AuthError::Again`].
    pub async fn pop_wait(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, AuthError> {
        let deadline = Instant::now() + timeout;
        loop {
            let n = self.pop(buf);
            if n > 0 {
                return Ok(n);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(AuthError::Again(timeout));
            }
            // Missed-wakeup safe: a push after the pop above leaves a permit
            // behind, so this resolves immediately.
            if tokio::time::timeout(remaining, self.readable.notified())
                .await
                .is_err()
            {
                return Err(AuthError::Again(timeout));
            }
        }
    }

    /// Wait up to `timeout` for the ring to become non-empty.
    ///
    /// Returns the queued byte count, which is zero only on timeout.
    pub async fn wait_nonempty(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let len = self.len();
            if len > 0 {
                return len;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return 0;
            }
            if tokio::time::timeout(remaining, self.readable.notified())
                .await
                .is_err()
            {
                return self.len();
            }
        }
    }
}

/// State shared between the session side and the carrier side.
struct TransportShared {
    rx: ByteQueue,
    tx: ByteQueue,
    sender: RwLock<Option<Arc<dyn DatagramSender>>>,
    carrier_events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    last_event: Mutex<TransportEvent>,
    mtu: usize,
}

/// Create a connected handle/endpoint pair for a carrier with the given
/// maximum payload. Both rings are sized to one MTU.
pub fn channel(mtu: usize) -> (TransportHandle, CarrierEndpoint) {
    let shared = Arc::new(TransportShared {
        rx: ByteQueue::new(mtu),
        tx: ByteQueue::new(mtu),
        sender: RwLock::new(None),
        carrier_events: Mutex::new(None),
        last_event: Mutex::new(TransportEvent::None),
        mtu,
    });
    (
        TransportHandle {
            shared: shared.clone(),
        },
        CarrierEndpoint { shared },
    )
}

/// Session-side capability over a carrier.
///
/// Owned exclusively by one session; the paired [`CarrierEndpoint`] feeds
/// its receive ring from the carrier's receiver task.
pub struct TransportHandle {
    shared: Arc<TransportShared>,
}

impl TransportHandle {
    /// Transmit one protocol message.
    ///
    /// The installed [`DatagramSender`] is used when present; otherwise the
    /// bytes are buffered for the carrier to drain. Either way the returned
    /// count may fall short of the request, which callers sending framed
    /// messages treat as fatal.
    pub async fn send(&self, data: &[u8]) -> Result<usize, AuthError> {
        if data.len() > self.shared.mtu {
            return Err(AuthError::InvalidParam(format!(
                "send of {} bytes exceeds mtu {}",
                data.len(),
                self.shared.mtu
            )));
        }
        let sender = self.shared.sender.read().clone();
        match sender {
            Some(sender) => sender.send(data).await,
            None => {
                let accepted = self.shared.tx.push(data);
                if accepted < data.len() {
                    debug!(
                        requested = data.len(),
                        accepted, "outbound ring full, send truncated"
                    );
                }
                Ok(accepted)
            }
        }
    }

    /// Receive up to `buf.len()` bytes, waiting at most `timeout`.
    ///
    /// Returns [`AuthError::Again`] when nothing arrived in time; a zero
    /// timeout polls without blocking.
    pub async fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, AuthError> {
        self.shared.rx.pop_wait(buf, timeout).await
    }

    /// Copy queued bytes without consuming them.
    pub fn recv_peek(&self, buf: &mut [u8]) -> usize {
        self.shared.rx.peek(buf)
    }

    /// Bytes waiting in the receive ring.
    pub fn queued_recv_bytes(&self) -> usize {
        self.shared.rx.len()
    }

    /// Bytes waiting in the outbound ring (queued-send carriers only).
    pub fn queued_send_bytes(&self) -> usize {
        self.shared.tx.len()
    }

    /// Wait up to `timeout` for receive data; returns the queued count.
    pub async fn queued_recv_bytes_wait(&self, timeout: Duration) -> usize {
        self.shared.rx.wait_nonempty(timeout).await
    }

    /// Largest payload the carrier delivers atomically.
    pub fn max_payload(&self) -> usize {
        self.shared.mtu
    }

    /// Deliver a lifecycle event toward the carrier. Best-effort: a carrier
    /// without an event loop simply never sees it.
    pub fn event(&self, event: TransportEvent) {
        let guard = self.shared.carrier_events.lock();
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(event).is_err() {
                    debug!(?event, "carrier event loop gone, event dropped");
                }
            }
            None => debug!(?event, "no carrier event sink registered"),
        }
    }

    /// Most recent event the carrier posted toward the session.
    pub fn last_event(&self) -> TransportEvent {
        *self.shared.last_event.lock()
    }

    /// Install the direct-send path. Carriers call this once at setup.
    pub fn install_sender(&self, sender: Arc<dyn DatagramSender>) {
        *self.shared.sender.write() = Some(sender);
    }
}

/// Carrier-side capability: the producer interface into a session's
/// transport. Cloneable so a carrier can split it between its receiver task
/// and its teardown path.
#[derive(Clone)]
pub struct CarrierEndpoint {
    shared: Arc<TransportShared>,
}

impl CarrierEndpoint {
    /// Enqueue bytes received from the wire.
    ///
    /// Overflow drops the newest bytes; the shortfall is reported through
    /// the returned count and logged.
    pub fn put_recv(&self, data: &[u8]) -> usize {
        let accepted = self.shared.rx.push(data);
        if accepted < data.len() {
            warn!(
                received = data.len(),
                accepted, "receive ring overflow, dropping newest bytes"
            );
        }
        accepted
    }

    /// Drain bytes the session queued for transmission. Used by carriers
    /// without a direct-send path.
    pub async fn drain_send(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, AuthError> {
        self.shared.tx.pop_wait(buf, timeout).await
    }

    /// Post a lifecycle event toward the session side.
    pub fn post_event(&self, event: TransportEvent) {
        debug!(?event, "carrier event");
        *self.shared.last_event.lock() = event;
    }

    /// Register this carrier's event loop and receive session-side events.
    pub fn take_events(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.carrier_events.lock() = Some(tx);
        rx
    }

    /// Largest payload the carrier has agreed to deliver atomically.
    pub fn max_payload(&self) -> usize {
        self.shared.mtu
    }
}
