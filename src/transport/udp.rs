//! Reference datagram carrier: UDP loopback.
//!
//! One socket per endpoint. Outgoing protocol messages go straight out via
//! a [`DatagramSender`] installed on the handle; a spawned receiver task
//! feeds incoming datagrams into the session's receive ring. Each datagram
//! carries one complete protocol message, so no extra framing is applied.

use super::{channel, CarrierEndpoint, DatagramSender, TransportEvent, TransportHandle};
use crate::defaults;
use crate::error::AuthError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// UDP carrier parameters: where to listen and where the peer listens.
#[derive(Debug, Clone)]
pub struct UdpCarrierConfig {
    /// Local address to bind for receiving
    pub bind_ip: String,
    /// Local port to bind for receiving (0 picks an ephemeral port)
    pub bind_port: u16,
    /// Peer address datagrams are sent to
    pub peer_ip: String,
    /// Peer port datagrams are sent to
    pub peer_port: u16,
    /// Largest payload delivered atomically
    pub mtu: usize,
    /// Kernel socket buffer size for both directions
    pub socket_buffer_size: usize,
}

impl Default for UdpCarrierConfig {
    fn default() -> Self {
        Self {
            bind_ip: "127.0.0.1".to_string(),
            bind_port: 47201,
            peer_ip: "127.0.0.1".to_string(),
            peer_port: 47202,
            mtu: defaults::MTU,
            socket_buffer_size: 8192,
        }
    }
}

/// Direct-send path over the carrier's socket.
struct UdpSender {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

#[async_trait]
impl DatagramSender for UdpSender {
    async fn send(&self, data: &[u8]) -> Result<usize, AuthError> {
        let written = self.socket.send_to(data, self.peer).await?;
        debug!(bytes = written, peer = %self.peer, "datagram sent");
        Ok(written)
    }
}

/// A running UDP carrier bound to one local socket.
pub struct UdpCarrier {
    receiver: Option<JoinHandle<()>>,
    shutdown: Arc<Notify>,
    local_addr: SocketAddr,
}

impl UdpCarrier {
    /// Bind the socket, install the direct-send path, and start the
    /// receiver task. Returns the carrier and the session-side handle.
    pub async fn spawn(config: &UdpCarrierConfig) -> Result<(UdpCarrier, TransportHandle)> {
        let bind_addr = format!("{}:{}", config.bind_ip, config.bind_port);
        let peer_addr: SocketAddr = format!("{}:{}", config.peer_ip, config.peer_port)
            .parse()
            .with_context(|| format!("invalid peer address {}:{}", config.peer_ip, config.peer_port))?;

        let socket = UdpSocket::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind UDP socket on {bind_addr}"))?;

        // Kernel buffer tuning, same knob the stream carriers expose.
        let std_socket = socket.into_std()?;
        let raw = socket2::SockRef::from(&std_socket);
        raw.set_recv_buffer_size(config.socket_buffer_size)?;
        raw.set_send_buffer_size(config.socket_buffer_size)?;
        let socket = Arc::new(UdpSocket::from_std(std_socket)?);

        let local_addr = socket.local_addr()?;
        debug!(%local_addr, peer = %peer_addr, "UDP carrier bound");

        let (handle, endpoint) = channel(config.mtu);
        handle.install_sender(Arc::new(UdpSender {
            socket: socket.clone(),
            peer: peer_addr,
        }));

        let shutdown = Arc::new(Notify::new());
        let receiver = tokio::spawn(Self::receive_loop(
            socket,
            endpoint,
            shutdown.clone(),
            config.mtu,
        ));

        Ok((
            UdpCarrier {
                receiver: Some(receiver),
                shutdown,
                local_addr,
            },
            handle,
        ))
    }

    /// Blocking read loop feeding the session's receive ring.
    async fn receive_loop(
        socket: Arc<UdpSocket>,
        endpoint: CarrierEndpoint,
        shutdown: Arc<Notify>,
        mtu: usize,
    ) {
        endpoint.post_event(TransportEvent::Connect);
        let mut buf = vec![0u8; mtu];
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!("UDP receiver shutting down");
                    break;
                }
                received = socket.recv_from(&mut buf) => match received {
                    Ok((n, from)) => {
                        debug!(bytes = n, %from, "datagram received");
                        endpoint.put_recv(&buf[..n]);
                    }
                    Err(e) => {
                        error!("UDP receive failed: {e}");
                        break;
                    }
                }
            }
        }
        endpoint.post_event(TransportEvent::Disconnect);
    }

    /// Address the carrier actually bound, useful with an ephemeral port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the receiver task and release the socket.
    pub async fn close(mut self) {
        self.shutdown.notify_one();
        if let Some(receiver) = self.receiver.take() {
            let _ = receiver.await;
        }
        debug!("UDP carrier closed");
    }
}

impl Drop for UdpCarrier {
    fn drop(&mut self) {
        // A carrier dropped without close() must not leak its receiver.
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pair_configs(port_a: u16, port_b: u16) -> (UdpCarrierConfig, UdpCarrierConfig) {
        let a = UdpCarrierConfig {
            bind_port: port_a,
            peer_port: port_b,
            ..Default::default()
        };
        let b = UdpCarrierConfig {
            bind_port: port_b,
            peer_port: port_a,
            ..Default::default()
        };
        (a, b)
    }

    #[tokio::test]
    async fn test_udp_carriers_exchange_datagrams() {
        let (cfg_a, cfg_b) = pair_configs(47811, 47812);
        let (carrier_a, handle_a) = UdpCarrier::spawn(&cfg_a).await.unwrap();
        let (carrier_b, handle_b) = UdpCarrier::spawn(&cfg_b).await.unwrap();

        handle_a.send(&[1, 2, 3, 4]).await.unwrap();

        let mut buf = [0u8; 16];
        let n = handle_b
            .recv(&mut buf, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3, 4]);

        handle_b.send(&[9, 9]).await.unwrap();
        let n = handle_a
            .recv(&mut buf, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(&buf[..n], &[9, 9]);

        carrier_a.close().await;
        carrier_b.close().await;
    }

    #[tokio::test]
    async fn test_udp_carrier_reports_bound_address() {
        let config = UdpCarrierConfig {
            bind_port: 0,
            ..Default::default()
        };
        let (carrier, _handle) = UdpCarrier::spawn(&config).await.unwrap();
        assert_ne!(carrier.local_addr().port(), 0);
        carrier.close().await;
    }
}
