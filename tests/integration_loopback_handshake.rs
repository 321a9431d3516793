//! End-to-end handshake scenarios over the in-process duplex carrier.
//!
//! Real sessions on both sides where the scenario allows it; a scripted
//! peer driving raw wire messages where the scenario needs fixed nonces,
//! corrupted frames, or a deliberately wrong proof.

use peer_auth::crypto::{self, DEFAULT_SHARED_KEY, KEY_LEN, NONCE_LEN};
use peer_auth::session::{
    InstanceId, MethodParams, Session, SessionConfig, SessionFlags, SessionStatus,
};
use peer_auth::transport::{memory, TransportHandle};
use peer_auth::wire::{AuthResult, ClientChallenge, ClientResponse, ServerResponse};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Session configuration tuned for fast tests.
fn test_config(role: SessionFlags, key: Option<[u8; KEY_LEN]>) -> SessionConfig {
    SessionConfig {
        flags: role | SessionFlags::CHALLENGE_METHOD,
        params: key.map(|shared_key| MethodParams::ChallengeResponse { shared_key }),
        rx_timeout: Duration::from_millis(250),
        handshake_deadline: Duration::from_secs(5),
    }
}

/// Collects every status the callback publishes.
#[derive(Clone, Default)]
struct StatusLog(Arc<Mutex<Vec<SessionStatus>>>);

impl StatusLog {
    fn callback(&self) -> impl Fn(InstanceId, SessionStatus) + Send + Sync + 'static {
        let log = self.0.clone();
        move |_, status| log.lock().unwrap().push(status)
    }

    fn snapshot(&self) -> Vec<SessionStatus> {
        self.0.lock().unwrap().clone()
    }
}

/// Scripted-peer read: accumulate exactly `len` bytes or panic.
async fn read_frame(handle: &TransportHandle, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    let deadline = Instant::now() + Duration::from_secs(2);
    while filled < len {
        match handle
            .recv(&mut buf[filled..], Duration::from_millis(100))
            .await
        {
            Ok(n) => filled += n,
            Err(e) if e.is_again() => {
                assert!(Instant::now() < deadline, "timed out reading {len}-byte frame");
            }
            Err(e) => panic!("scripted peer read failed: {e}"),
        }
    }
    buf
}

#[tokio::test]
async fn test_matching_keys_authenticate_both_sides() {
    let (client_transport, server_transport) = memory::default_pair();

    let client_log = StatusLog::default();
    let server_log = StatusLog::default();

    let mut server = Session::init(
        test_config(SessionFlags::SERVER, None),
        server_transport,
        server_log.callback(),
    )
    .unwrap();
    let mut client = Session::init(
        test_config(SessionFlags::CLIENT, None),
        client_transport,
        client_log.callback(),
    )
    .unwrap();

    server.start().unwrap();
    client.start().unwrap();

    assert_eq!(client.shutdown().await, SessionStatus::Successful);
    assert_eq!(server.shutdown().await, SessionStatus::Successful);

    // The callback saw the full monotonic progression on both sides.
    let expected = vec![
        SessionStatus::Started,
        SessionStatus::InProcess,
        SessionStatus::Successful,
    ];
    assert_eq!(client_log.snapshot(), expected);
    assert_eq!(server_log.snapshot(), expected);
}

#[tokio::test]
async fn test_server_key_mismatch_rejected_by_both_sides() {
    // The client keeps the default key; the server's last byte is flipped.
    // The client detects the bad proof, notifies the server, and both end
    // in authentication failure.
    let mut wrong_key = DEFAULT_SHARED_KEY;
    wrong_key[KEY_LEN - 1] ^= 0xFF;

    let (client_transport, server_transport) = memory::default_pair();

    let mut server = Session::init(
        test_config(SessionFlags::SERVER, Some(wrong_key)),
        server_transport,
        |_, _| {},
    )
    .unwrap();
    let mut client = Session::init(
        test_config(SessionFlags::CLIENT, None),
        client_transport,
        |_, _| {},
    )
    .unwrap();

    server.start().unwrap();
    client.start().unwrap();

    assert_eq!(client.shutdown().await, SessionStatus::AuthenticationFailed);
    assert_eq!(server.shutdown().await, SessionStatus::AuthenticationFailed);
}

#[tokio::test]
async fn test_client_key_mismatch_detected_by_server() {
    // Scripted client that skips verifying the server (a real client with a
    // wrong key would bail earlier) and proves the server nonce with the
    // wrong key. The server must answer with a failure verdict.
    let mut wrong_key = DEFAULT_SHARED_KEY;
    wrong_key[0] ^= 0xFF;

    let (script, server_transport) = memory::default_pair();
    let mut server = Session::init(
        test_config(SessionFlags::SERVER, None),
        server_transport,
        |_, _| {},
    )
    .unwrap();
    server.start().unwrap();

    let nonce = [0x07u8; NONCE_LEN];
    script
        .send(&ClientChallenge { nonce }.encode())
        .await
        .unwrap();

    let frame = read_frame(&script, ServerResponse::WIRE_LEN).await;
    let response = ServerResponse::decode(&frame).unwrap();

    let bad_proof = crypto::response_digest(&response.nonce, &wrong_key);
    script
        .send(&ClientResponse { proof: bad_proof }.encode())
        .await
        .unwrap();

    let verdict = AuthResult::decode(&read_frame(&script, AuthResult::WIRE_LEN).await).unwrap();
    assert!(!verdict.is_success());
    assert_eq!(server.shutdown().await, SessionStatus::AuthenticationFailed);
}

#[tokio::test]
async fn test_wire_trace_against_real_server() {
    // Fixed client nonce, default key: every byte of the exchange is
    // predictable except the server's own nonce, which feeds back into the
    // proof we return.
    let (script, server_transport) = memory::default_pair();
    let mut server = Session::init(
        test_config(SessionFlags::SERVER, None),
        server_transport,
        |_, _| {},
    )
    .unwrap();
    server.start().unwrap();

    let client_nonce = [0x01u8; NONCE_LEN];
    let challenge_bytes = ClientChallenge {
        nonce: client_nonce,
    }
    .encode();
    assert_eq!(&challenge_bytes[..3], &[0xA2, 0x65, 0x01]);
    script.send(&challenge_bytes).await.unwrap();

    let frame = read_frame(&script, ServerResponse::WIRE_LEN).await;
    assert_eq!(&frame[..3], &[0xA2, 0x65, 0x02]);
    let response = ServerResponse::decode(&frame).unwrap();
    assert_eq!(
        response.proof,
        crypto::response_digest(&client_nonce, &DEFAULT_SHARED_KEY)
    );

    let proof = crypto::response_digest(&response.nonce, &DEFAULT_SHARED_KEY);
    let response_bytes = ClientResponse { proof }.encode();
    assert_eq!(&response_bytes[..3], &[0xA2, 0x65, 0x03]);
    script.send(&response_bytes).await.unwrap();

    let verdict_bytes = read_frame(&script, AuthResult::WIRE_LEN).await;
    assert_eq!(verdict_bytes, vec![0xA2, 0x65, 0x04, 0x00]);
    assert_eq!(server.shutdown().await, SessionStatus::Successful);
}

#[tokio::test]
async fn test_wire_trace_against_real_client() {
    // Mirror image: scripted server with fixed nonce drives a real client.
    let (client_transport, script) = memory::default_pair();
    let mut client = Session::init(
        test_config(SessionFlags::CLIENT, None),
        client_transport,
        |_, _| {},
    )
    .unwrap();
    client.start().unwrap();

    let frame = read_frame(&script, ClientChallenge::WIRE_LEN).await;
    assert_eq!(&frame[..3], &[0xA2, 0x65, 0x01]);
    let challenge = ClientChallenge::decode(&frame).unwrap();

    let server_nonce = [0x02u8; NONCE_LEN];
    let response = ServerResponse {
        proof: crypto::response_digest(&challenge.nonce, &DEFAULT_SHARED_KEY),
        nonce: server_nonce,
    };
    script.send(&response.encode()).await.unwrap();

    let frame = read_frame(&script, ClientResponse::WIRE_LEN).await;
    let client_response = ClientResponse::decode(&frame).unwrap();
    assert_eq!(
        client_response.proof,
        crypto::response_digest(&server_nonce, &DEFAULT_SHARED_KEY)
    );

    script.send(&AuthResult::success().encode()).await.unwrap();
    assert_eq!(client.shutdown().await, SessionStatus::Successful);
}

#[tokio::test]
async fn test_cancel_while_server_waits_for_a_client() {
    // No client ever connects. The cancel must surface within one receive
    // timeout window of being requested.
    let (_idle_peer, server_transport) = memory::default_pair();
    let log = StatusLog::default();

    let config = SessionConfig {
        flags: SessionFlags::SERVER | SessionFlags::CHALLENGE_METHOD,
        params: None,
        rx_timeout: Duration::from_millis(3000),
        handshake_deadline: Duration::from_secs(30),
    };
    let mut server = Session::init(config, server_transport, log.callback()).unwrap();
    server.start().unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let canceled_at = Instant::now();
    server.cancel();
    assert_eq!(server.status(), SessionStatus::Canceled);

    let status = server.shutdown().await;
    assert_eq!(status, SessionStatus::Canceled);
    assert!(
        canceled_at.elapsed() < Duration::from_millis(3500),
        "worker took {:?} to observe the cancel",
        canceled_at.elapsed()
    );

    // Canceled was published exactly once despite the worker also exiting.
    let terminals = log
        .snapshot()
        .iter()
        .filter(|s| s.is_terminal())
        .copied()
        .collect::<Vec<_>>();
    assert_eq!(terminals, vec![SessionStatus::Canceled]);
}

#[tokio::test]
async fn test_corrupted_header_fails_the_server() {
    let (script, server_transport) = memory::default_pair();
    let mut server = Session::init(
        test_config(SessionFlags::SERVER, None),
        server_transport,
        |_, _| {},
    )
    .unwrap();
    server.start().unwrap();

    // Right length, zeroed start-of-header.
    let mut bytes = ClientChallenge {
        nonce: [0x55u8; NONCE_LEN],
    }
    .encode();
    bytes[0] = 0x00;
    bytes[1] = 0x00;
    script.send(&bytes).await.unwrap();

    assert_eq!(server.shutdown().await, SessionStatus::Failed);
}

#[tokio::test]
async fn test_truncated_server_response_times_out_the_client() {
    let (client_transport, script) = memory::default_pair();
    let mut client = Session::init(
        test_config(SessionFlags::CLIENT, None),
        client_transport,
        |_, _| {},
    )
    .unwrap();
    client.start().unwrap();

    let frame = read_frame(&script, ClientChallenge::WIRE_LEN).await;
    let challenge = ClientChallenge::decode(&frame).unwrap();

    // Send only 50 of the 67 response bytes, then go silent. The client
    // keeps reading until its timeout window closes empty.
    let response = ServerResponse {
        proof: crypto::response_digest(&challenge.nonce, &DEFAULT_SHARED_KEY),
        nonce: [0x02u8; NONCE_LEN],
    };
    script.send(&response.encode()[..50]).await.unwrap();

    assert_eq!(client.shutdown().await, SessionStatus::Failed);
}

#[tokio::test]
async fn test_unexpected_message_while_awaiting_proof_fails_the_server() {
    let (script, server_transport) = memory::default_pair();
    let mut server = Session::init(
        test_config(SessionFlags::SERVER, None),
        server_transport,
        |_, _| {},
    )
    .unwrap();
    server.start().unwrap();

    let nonce = [0x03u8; NONCE_LEN];
    script
        .send(&ClientChallenge { nonce }.encode())
        .await
        .unwrap();
    let _ = read_frame(&script, ServerResponse::WIRE_LEN).await;

    // A second challenge instead of a proof or verdict.
    script
        .send(&ClientChallenge { nonce }.encode())
        .await
        .unwrap();

    assert_eq!(server.shutdown().await, SessionStatus::Failed);
}
