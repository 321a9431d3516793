//! The four-message challenge-response state machine.
//!
//! Client and server each run one driver on a dedicated worker task:
//!
//! ```text
//! client                                server
//!   | ClientChallenge  (nonce_c)  ----->  |
//!   |  <----- ServerResponse (H(nonce_c || key), nonce_s)
//!   |  verify, then
//!   | ClientResponse  (H(nonce_s || key)) ----->
//!   |                                     |  verify
//!   |  <----------------- AuthResult (0 or 1)
//! ```
//!
//! Every fixed-length read loops on partial data with a per-read timeout,
//! checks the cancel flag each iteration, and respects an overall deadline.
//! A quiet wire for a full timeout window is a handshake timeout; where it
//! lands (`Failed` versus `AuthenticationFailed`) depends on how far the
//! exchange got, mirroring how much the peer has already proven.

use crate::crypto::{self, SharedKey, DIGEST_LEN};
use crate::error::AuthError;
use crate::session::{SessionCore, SessionStatus, Timing};
use crate::transport::TransportHandle;
use crate::wire::{
    self, AuthResult, ClientChallenge, ClientResponse, MsgId, ServerResponse, HEADER_LEN,
};
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Why a fixed-length read stopped short of completion.
enum ReadAbort {
    /// Cancel flag observed; takes precedence over any timeout verdict
    Canceled,
    /// Nothing arrived within a timeout window, or the deadline passed
    TimedOut,
    /// Transport reported a hard error
    Transport(AuthError),
}

/// Drives one handshake attempt over a transport handle.
pub(crate) struct HandshakeDriver {
    transport: TransportHandle,
    key: SharedKey,
    core: Arc<SessionCore>,
    timing: Timing,
}

impl HandshakeDriver {
    pub(crate) fn new(
        transport: TransportHandle,
        key: SharedKey,
        core: Arc<SessionCore>,
        timing: Timing,
    ) -> Self {
        Self {
            transport,
            key,
            core,
            timing,
        }
    }

    /// Initiator side: challenge, verify, prove, await the verdict.
    pub(crate) async fn run_client(&self) -> SessionStatus {
        let started = Instant::now();
        self.core.publish(SessionStatus::Started);

        let client_nonce = match crypto::generate_nonce() {
            Ok(nonce) => nonce,
            Err(e) => {
                warn!("client could not generate a challenge nonce: {e}");
                return self.finish(SessionStatus::Failed);
            }
        };

        let challenge = ClientChallenge {
            nonce: client_nonce,
        };
        if let Err(e) = self.send_message(&challenge.encode()).await {
            warn!("client failed to send challenge: {e}");
            return self.finish(SessionStatus::Failed);
        }
        debug!("client challenge sent");
        self.core.publish(SessionStatus::InProcess);

        // AWAIT_SERVER_RESP
        let mut frame = [0u8; ServerResponse::WIRE_LEN];
        match self.read_exact(&mut frame, started).await {
            Ok(()) => {}
            Err(ReadAbort::Canceled) => return self.finish(SessionStatus::Canceled),
            Err(ReadAbort::TimedOut) => {
                warn!("client timed out waiting for the server response");
                return self.finish(SessionStatus::Failed);
            }
            Err(ReadAbort::Transport(e)) => {
                warn!("client read failed awaiting server response: {e}");
                return self.finish(SessionStatus::Failed);
            }
        }

        let response = match ServerResponse::decode(&frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("client rejected malformed server response: {e}");
                return self.finish(SessionStatus::Failed);
            }
        };

        let expected = crypto::response_digest(&client_nonce, &self.key);
        if !crypto::digests_match(&expected, &response.proof) {
            warn!("server did not prove possession of the shared key");
            // Best-effort rejection notice; the verdict stands regardless.
            if let Err(e) = self.send_message(&AuthResult::failure().encode()).await {
                warn!("could not notify server of rejection: {e}");
            }
            return self.finish(SessionStatus::AuthenticationFailed);
        }

        let proof = crypto::response_digest(&response.nonce, &self.key);
        if let Err(e) = self.send_message(&ClientResponse { proof }.encode()).await {
            warn!("client failed to send its proof: {e}");
            return self.finish(SessionStatus::Failed);
        }

        // AWAIT_RESULT. The server has proven itself by now, so anything
        // other than a clean success verdict counts against authentication.
        let mut frame = [0u8; AuthResult::WIRE_LEN];
        match self.read_exact(&mut frame, started).await {
            Ok(()) => {}
            Err(ReadAbort::Canceled) => return self.finish(SessionStatus::Canceled),
            Err(ReadAbort::TimedOut) | Err(ReadAbort::Transport(_)) => {
                warn!("client did not receive the server verdict");
                return self.finish(SessionStatus::AuthenticationFailed);
            }
        }

        match AuthResult::decode(&frame) {
            Ok(verdict) if verdict.is_success() => {
                debug!("mutual authentication complete");
                self.finish(SessionStatus::Successful)
            }
            Ok(verdict) => {
                warn!(outcome = verdict.outcome, "server rejected our proof");
                self.finish(SessionStatus::AuthenticationFailed)
            }
            Err(e) => {
                warn!("client rejected malformed verdict: {e}");
                self.finish(SessionStatus::AuthenticationFailed)
            }
        }
    }

    /// Responder side: await the challenge, prove, verify, send the verdict.
    pub(crate) async fn run_server(&self) -> SessionStatus {
        let started = Instant::now();
        self.core.publish(SessionStatus::Started);

        let server_nonce = match crypto::generate_nonce() {
            Ok(nonce) => nonce,
            Err(e) => {
                warn!("server could not generate a challenge nonce: {e}");
                return self.finish(SessionStatus::Failed);
            }
        };

        // AWAIT_CLIENT_CHAL
        let mut frame = [0u8; ClientChallenge::WIRE_LEN];
        match self.read_exact(&mut frame, started).await {
            Ok(()) => {}
            Err(ReadAbort::Canceled) => return self.finish(SessionStatus::Canceled),
            Err(ReadAbort::TimedOut) => {
                warn!("server timed out waiting for a client challenge");
                return self.finish(SessionStatus::Failed);
            }
            Err(ReadAbort::Transport(e)) => {
                warn!("server read failed awaiting client challenge: {e}");
                return self.finish(SessionStatus::Failed);
            }
        }

        let challenge = match ClientChallenge::decode(&frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("server rejected malformed client challenge: {e}");
                return self.finish(SessionStatus::Failed);
            }
        };
        debug!("client challenge received");
        self.core.publish(SessionStatus::InProcess);

        let response = ServerResponse {
            proof: crypto::response_digest(&challenge.nonce, &self.key),
            nonce: server_nonce,
        };
        if let Err(e) = self.send_message(&response.encode()).await {
            warn!("server failed to send its response: {e}");
            return self.finish(SessionStatus::Failed);
        }

        // AWAIT_CLIENT_RESP: header first, since the client may answer with
        // either its proof or an early rejection verdict.
        let mut header = [0u8; HEADER_LEN];
        match self.read_exact(&mut header, started).await {
            Ok(()) => {}
            Err(ReadAbort::Canceled) => return self.finish(SessionStatus::Canceled),
            Err(ReadAbort::TimedOut) => {
                warn!("server timed out waiting for the client proof");
                return self.finish(SessionStatus::Failed);
            }
            Err(ReadAbort::Transport(e)) => {
                warn!("server read failed awaiting client proof: {e}");
                return self.finish(SessionStatus::Failed);
            }
        }

        match wire::decode_header(&header) {
            Ok(MsgId::AuthResult) => {
                let mut outcome = [0u8; AuthResult::WIRE_LEN - HEADER_LEN];
                match self.read_exact(&mut outcome, started).await {
                    Ok(()) => {}
                    Err(ReadAbort::Canceled) => return self.finish(SessionStatus::Canceled),
                    Err(_) => return self.finish(SessionStatus::Failed),
                }
                warn!(outcome = outcome[0], "client rejected our response");
                self.finish(SessionStatus::AuthenticationFailed)
            }
            Ok(MsgId::ClientResponse) => {
                let mut proof = [0u8; DIGEST_LEN];
                match self.read_exact(&mut proof, started).await {
                    Ok(()) => {}
                    Err(ReadAbort::Canceled) => return self.finish(SessionStatus::Canceled),
                    Err(_) => {
                        warn!("client proof arrived truncated");
                        return self.finish(SessionStatus::Failed);
                    }
                }

                let expected = crypto::response_digest(&server_nonce, &self.key);
                let verified = crypto::digests_match(&expected, &proof);
                let verdict = if verified {
                    AuthResult::success()
                } else {
                    warn!("client did not prove possession of the shared key");
                    AuthResult::failure()
                };
                if let Err(e) = self.send_message(&verdict.encode()).await {
                    warn!("server failed to send its verdict: {e}");
                    return self.finish(SessionStatus::Failed);
                }
                if verified {
                    debug!("mutual authentication complete");
                    self.finish(SessionStatus::Successful)
                } else {
                    self.finish(SessionStatus::AuthenticationFailed)
                }
            }
            Ok(unexpected) => {
                warn!(?unexpected, "unexpected message while awaiting client proof");
                self.finish(SessionStatus::Failed)
            }
            Err(e) => {
                warn!("server rejected malformed header: {e}");
                self.finish(SessionStatus::Failed)
            }
        }
    }

    /// Publish the worker's verdict; a terminal status published earlier
    /// (cancellation racing the worker) wins and is returned instead.
    fn finish(&self, status: SessionStatus) -> SessionStatus {
        self.core.publish(status)
    }

    /// Send one framed message, treating a short write as fatal.
    async fn send_message(&self, bytes: &[u8]) -> Result<(), AuthError> {
        let written = self.transport.send(bytes).await?;
        if written != bytes.len() {
            return Err(AuthError::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short datagram write: {written} of {} bytes", bytes.len()),
            )));
        }
        Ok(())
    }

    /// Read exactly `buf.len()` bytes, accumulating partial reads.
    ///
    /// Each attempt waits up to the per-read timeout. The cancel flag is
    /// consulted on every iteration and wins over a timeout verdict, so a
    /// canceled session never misreports a failure.
    async fn read_exact(&self, buf: &mut [u8], started: Instant) -> Result<(), ReadAbort> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.core.cancel_requested() {
                return Err(ReadAbort::Canceled);
            }
            if started.elapsed() >= self.timing.deadline {
                warn!("handshake deadline exceeded");
                return Err(ReadAbort::TimedOut);
            }
            match self
                .transport
                .recv(&mut buf[filled..], self.timing.rx_timeout)
                .await
            {
                Ok(n) => filled += n,
                Err(AuthError::Again(_)) => {
                    if self.core.cancel_requested() {
                        return Err(ReadAbort::Canceled);
                    }
                    return Err(ReadAbort::TimedOut);
                }
                Err(e) => return Err(ReadAbort::Transport(e)),
            }
        }
        Ok(())
    }
}
