//! In-process duplex carrier.
//!
//! Two handles wired back to back: each side's direct sender feeds the
//! peer's receive ring. Loss-free and ordered, which makes it the carrier
//! of choice for handshake tests and scripted-peer scenarios.

use super::{channel, CarrierEndpoint, DatagramSender, TransportHandle};
use crate::defaults;
use crate::error::AuthError;
use async_trait::async_trait;
use std::sync::Arc;

/// Sender that delivers straight into the peer's receive ring.
struct LoopbackSender {
    peer: CarrierEndpoint,
}

#[async_trait]
impl DatagramSender for LoopbackSender {
    async fn send(&self, data: &[u8]) -> Result<usize, AuthError> {
        Ok(self.peer.put_recv(data))
    }
}

/// Create two connected transport handles with the given MTU.
pub fn pair(mtu: usize) -> (TransportHandle, TransportHandle) {
    let (handle_a, endpoint_a) = channel(mtu);
    let (handle_b, endpoint_b) = channel(mtu);
    handle_a.install_sender(Arc::new(LoopbackSender { peer: endpoint_b }));
    handle_b.install_sender(Arc::new(LoopbackSender { peer: endpoint_a }));
    (handle_a, handle_b)
}

/// Create two connected handles with the reference MTU.
pub fn default_pair() -> (TransportHandle, TransportHandle) {
    pair(defaults::MTU)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_pair_is_full_duplex() {
        let (a, b) = default_pair();
        a.send(&[1, 2, 3]).await.unwrap();
        b.send(&[4, 5]).await.unwrap();

        let mut buf = [0u8; 8];
        let n = b.recv(&mut buf, Duration::from_millis(200)).await.unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
        let n = a.recv(&mut buf, Duration::from_millis(200)).await.unwrap();
        assert_eq!(&buf[..n], &[4, 5]);
    }

    #[tokio::test]
    async fn test_pair_send_reports_ring_overflow() {
        let (a, _b) = pair(4);
        // Peer ring holds 4 bytes; the second send is partially dropped.
        assert_eq!(a.send(&[0u8; 3]).await.unwrap(), 3);
        assert_eq!(a.send(&[0u8; 3]).await.unwrap(), 1);
    }
}
