//! End-to-end handshake scenarios over the real UDP loopback carrier.

use peer_auth::crypto::{DEFAULT_SHARED_KEY, KEY_LEN};
use peer_auth::session::{MethodParams, Session, SessionConfig, SessionFlags, SessionStatus};
use peer_auth::transport::{UdpCarrier, UdpCarrierConfig};
use std::time::Duration;

fn carrier_configs(port_a: u16, port_b: u16) -> (UdpCarrierConfig, UdpCarrierConfig) {
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

fn session_config(role: SessionFlags, key: Option<[u8; KEY_LEN]>) -> SessionConfig {
    SessionConfig {
        flags: role | SessionFlags::CHALLENGE_METHOD,
        params: key.map(|shared_key| MethodParams::ChallengeResponse { shared_key }),
        rx_timeout: Duration::from_millis(500),
        handshake_deadline: Duration::from_secs(10),
    }
}

#[tokio::test]
async fn test_udp_mutual_authentication_succeeds() {
    let (server_cfg, client_cfg) = carrier_configs(47841, 47842);
    let (server_carrier, server_transport) = UdpCarrier::spawn(&server_cfg).await.unwrap();
    let (client_carrier, client_transport) = UdpCarrier::spawn(&client_cfg).await.unwrap();

    let mut server = Session::init(
        session_config(SessionFlags::SERVER, None),
        server_transport,
        |_, _| {},
    )
    .unwrap();
    let mut client = Session::init(
        session_config(SessionFlags::CLIENT, None),
        client_transport,
        |_, _| {},
    )
    .unwrap();

    server.start().unwrap();
    client.start().unwrap();

    assert_eq!(client.shutdown().await, SessionStatus::Successful);
    assert_eq!(server.shutdown().await, SessionStatus::Successful);

    server_carrier.close().await;
    client_carrier.close().await;
}

#[tokio::test]
async fn test_udp_key_mismatch_rejects_both_sides() {
    let mut wrong_key = DEFAULT_SHARED_KEY;
    wrong_key[KEY_LEN - 1] ^= 0xFF;

    let (server_cfg, client_cfg) = carrier_configs(47843, 47844);
    let (server_carrier, server_transport) = UdpCarrier::spawn(&server_cfg).await.unwrap();
    let (client_carrier, client_transport) = UdpCarrier::spawn(&client_cfg).await.unwrap();

    let mut server = Session::init(
        session_config(SessionFlags::SERVER, Some(wrong_key)),
        server_transport,
        |_, _| {},
    )
    .unwrap();
    let mut client = Session::init(
        session_config(SessionFlags::CLIENT, None),
        client_transport,
        |_, _| {},
    )
    .unwrap();

    server.start().unwrap();
    client.start().unwrap();

    assert_eq!(client.shutdown().await, SessionStatus::AuthenticationFailed);
    assert_eq!(server.shutdown().await, SessionStatus::AuthenticationFailed);

    server_carrier.close().await;
    client_carrier.close().await;
}

#[tokio::test]
async fn test_udp_server_cancel_with_no_client() {
    // The peer port is never bound; the server waits on a silent wire until
    // canceled.
    let (server_cfg, _unused) = carrier_configs(47845, 47846);
    let (carrier, transport) = UdpCarrier::spawn(&server_cfg).await.unwrap();

    let mut server = Session::init(
        session_config(SessionFlags::SERVER, None),
        transport,
        |_, _| {},
    )
    .unwrap();
    server.start().unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    server.cancel();

    assert_eq!(server.shutdown().await, SessionStatus::Canceled);
    carrier.close().await;
}
