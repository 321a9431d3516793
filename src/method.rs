//! Authentication-method strategy.
//!
//! The session facade is method-agnostic: whatever strategy is selected at
//! init gets the transport, the shared core, and a `run` contract that must
//! end in a terminal status. Challenge-response is the implemented method;
//! DTLS is representable but delegated to an external stack.

use crate::crypto::{SharedKey, DEFAULT_SHARED_KEY};
use crate::error::AuthError;
use crate::handshake::HandshakeDriver;
use crate::session::{MethodParams, Role, SessionCore, SessionFlags, SessionStatus, Timing};
use crate::transport::TransportHandle;
use std::sync::Arc;
use tracing::error;

/// A validated authentication method with its session-owned parameters.
pub(crate) enum Method {
    ChallengeResponse { key: SharedKey },
    Dtls,
}

impl Method {
    /// Resolve flags and optional params into a runnable method.
    ///
    /// The challenge-response key override is optional and defaults to the
    /// compile-time key; DTLS has no compile-time credentials, so its
    /// params are required. Params of the wrong kind for the selected
    /// method are rejected.
    pub(crate) fn from_config(
        flags: SessionFlags,
        params: Option<MethodParams>,
    ) -> Result<Method, AuthError> {
        let dtls = flags.contains(SessionFlags::DTLS_METHOD);
        let challenge = flags.contains(SessionFlags::CHALLENGE_METHOD);
        match (dtls, challenge) {
            (true, true) => Err(AuthError::InvalidParam(
                "DTLS_METHOD and CHALLENGE_METHOD are mutually exclusive".into(),
            )),
            (false, false) => Err(AuthError::InvalidParam(
                "one of DTLS_METHOD or CHALLENGE_METHOD is required".into(),
            )),
            (false, true) => match params {
                None => Ok(Method::ChallengeResponse {
                    key: DEFAULT_SHARED_KEY,
                }),
                Some(MethodParams::ChallengeResponse { shared_key }) => {
                    Ok(Method::ChallengeResponse { key: shared_key })
                }
                Some(MethodParams::Dtls(_)) => Err(AuthError::InvalidParam(
                    "DTLS params supplied for the challenge-response method".into(),
                )),
            },
            (true, false) => match params {
                Some(MethodParams::Dtls(_)) => Ok(Method::Dtls),
                _ => Err(AuthError::InvalidParam(
                    "DTLS method requires DTLS parameters".into(),
                )),
            },
        }
    }

    /// Drive the method to a terminal status on the session worker.
    pub(crate) async fn run(
        self,
        role: Role,
        transport: TransportHandle,
        core: Arc<SessionCore>,
        timing: Timing,
    ) -> SessionStatus {
        match self {
            Method::ChallengeResponse { key } => {
                let driver = HandshakeDriver::new(transport, key, core, timing);
                match role {
                    Role::Client => driver.run_client().await,
                    Role::Server => driver.run_server().await,
                }
            }
            Method::Dtls => {
                // The DTLS method lives in an external stack; a session
                // selecting it cannot authenticate here.
                error!("DTLS authentication method is not available");
                core.publish(SessionStatus::Started);
                core.publish(SessionStatus::Failed)
            }
        }
    }
}
