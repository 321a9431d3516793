//! Session facade: one mutual authentication attempt.
//!
//! A [`Session`] owns its transport handle and a worker task that drives
//! the authentication method. Callers initialize it with role and method
//! flags, start it, and observe progress through a status callback or by
//! polling [`Session::status`]. Cancellation is cooperative: the worker
//! checks the cancel flag at every receive-loop iteration.

use crate::crypto::SharedKey;
use crate::defaults;
use crate::error::AuthError;
use crate::method::Method;
use crate::transport::TransportHandle;
use bitflags::bitflags;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Identifier of a live session instance, in `0..MAX_SESSIONS`
pub type InstanceId = usize;

bitflags! {
    /// Session-init flags selecting role and authentication method.
    ///
    /// Exactly one of `SERVER` / `CLIENT` and exactly one of
    /// `DTLS_METHOD` / `CHALLENGE_METHOD` must be set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SessionFlags: u32 {
        /// Responder role
        const SERVER = 0b0001;
        /// Initiator role
        const CLIENT = 0b0010;
        /// Authenticate via DTLS (alternative method, stubbed)
        const DTLS_METHOD = 0b0100;
        /// Authenticate via the challenge-response handshake
        const CHALLENGE_METHOD = 0b1000;
    }
}

/// Which end of the handshake this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Server,
}

impl Role {
    fn from_flags(flags: SessionFlags) -> Result<Role, AuthError> {
        match (
            flags.contains(SessionFlags::CLIENT),
            flags.contains(SessionFlags::SERVER),
        ) {
            (true, false) => Ok(Role::Client),
            (false, true) => Ok(Role::Server),
            (true, true) => Err(AuthError::InvalidParam(
                "CLIENT and SERVER are mutually exclusive".into(),
            )),
            (false, false) => Err(AuthError::InvalidParam(
                "one of CLIENT or SERVER is required".into(),
            )),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

/// Progress of a session, published through the status callback.
///
/// Statuses only move forward: `Idle` to `Started` to `InProcess` to one of
/// the four terminal states. The first terminal state wins; later attempts
/// to transition are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Initialized, worker not yet started
    Idle,
    /// Worker running, handshake opened
    Started,
    /// First message exchanged, peer is engaged
    InProcess,
    /// Both sides verified
    Successful,
    /// Cancel was requested and observed
    Canceled,
    /// Transport failure, malformed traffic, or timeout
    Failed,
    /// The peer's proof did not match, or the peer rejected ours
    AuthenticationFailed,
}

impl SessionStatus {
    /// Monotonic ordering rank; transitions must strictly increase.
    fn rank(&self) -> u8 {
        match self {
            SessionStatus::Idle => 0,
            SessionStatus::Started => 1,
            SessionStatus::InProcess => 2,
            SessionStatus::Successful
            | SessionStatus::Canceled
            | SessionStatus::Failed
            | SessionStatus::AuthenticationFailed => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 3
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Started => "started",
            SessionStatus::InProcess => "in_process",
            SessionStatus::Successful => "successful",
            SessionStatus::Canceled => "canceled",
            SessionStatus::Failed => "failed",
            SessionStatus::AuthenticationFailed => "authentication_failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Method-specific parameters supplied at init.
#[derive(Clone)]
pub enum MethodParams {
    /// Override the compile-time shared key for this session
    ChallengeResponse { shared_key: SharedKey },
    /// Credentials for the DTLS method
    Dtls(DtlsParams),
}

/// Parameters of the DTLS alternative method. Carried for API completeness;
/// the method itself is an external collaborator and its worker is a stub.
#[derive(Debug, Clone, Default)]
pub struct DtlsParams {
    pub certificate_path: Option<PathBuf>,
    pub private_key_path: Option<PathBuf>,
}

/// Tunable timing for the handshake read loop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timing {
    pub rx_timeout: Duration,
    pub deadline: Duration,
}

/// Session configuration handed to [`Session::init`].
#[derive(Clone)]
pub struct SessionConfig {
    pub flags: SessionFlags,
    pub params: Option<MethodParams>,
    /// Per-read receive timeout inside the handshake loop
    pub rx_timeout: Duration,
    /// Upper bound on the whole handshake attempt
    pub handshake_deadline: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            flags: SessionFlags::CLIENT | SessionFlags::CHALLENGE_METHOD,
            params: None,
            rx_timeout: defaults::RX_TIMEOUT,
            handshake_deadline: defaults::HANDSHAKE_DEADLINE,
        }
    }
}

/// State shared between the facade, the worker, and the cancel path.
pub(crate) struct SessionCore {
    instance_id: InstanceId,
    status: Mutex<SessionStatus>,
    cancel: AtomicBool,
    callback: Box<dyn Fn(InstanceId, SessionStatus) + Send + Sync>,
}

impl SessionCore {
    /// Attempt a status transition; returns the status in effect afterward.
    ///
    /// Transitions must strictly increase the rank, so a terminal status is
    /// sticky and the callback fires exactly once per accepted transition,
    /// synchronously on the publishing task.
    pub(crate) fn publish(&self, next: SessionStatus) -> SessionStatus {
        let (current, accepted) = {
            let mut status = self.status.lock();
            if next.rank() > status.rank() {
                *status = next;
                (next, true)
            } else {
                (*status, false)
            }
        };
        if accepted {
            debug!(instance = self.instance_id, status = %next, "session status");
            (self.callback)(self.instance_id, next);
        }
        current
    }

    pub(crate) fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub(crate) fn instance_id(&self) -> InstanceId {
        self.instance_id
    }
}

// Instance pool: a compile-time-bounded set of concurrently live sessions.
// Slots double as instance ids.
const SLOT_FREE: AtomicBool = AtomicBool::new(false);
static SLOTS: [AtomicBool; defaults::MAX_SESSIONS] = [SLOT_FREE; defaults::MAX_SESSIONS];

struct InstanceSlot(InstanceId);

impl InstanceSlot {
    fn acquire() -> Result<InstanceSlot, AuthError> {
        for (id, busy) in SLOTS.iter().enumerate() {
            if busy
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(InstanceSlot(id));
            }
        }
        Err(AuthError::NoResource(defaults::MAX_SESSIONS))
    }

    fn id(&self) -> InstanceId {
        self.0
    }
}

impl Drop for InstanceSlot {
    fn drop(&mut self) {
        SLOTS[self.0].store(false, Ordering::Release);
    }
}

/// One mutual authentication attempt between two peers.
pub struct Session {
    core: Arc<SessionCore>,
    role: Role,
    method: Option<Method>,
    transport: Option<TransportHandle>,
    timing: Timing,
    worker: Option<JoinHandle<SessionStatus>>,
    _slot: InstanceSlot,
}

impl Session {
    /// Validate configuration and build a session around a transport.
    ///
    /// The shared-key override, when given, is copied into session-owned
    /// storage here and used for every digest in this attempt. Fails with
    /// `InvalidParam` on contradictory flags or params of the wrong kind,
    /// and with `NoResource` when all instance slots are taken.
    pub fn init<F>(
        config: SessionConfig,
        transport: TransportHandle,
        on_status: F,
    ) -> Result<Session, AuthError>
    where
        F: Fn(InstanceId, SessionStatus) + Send + Sync + 'static,
    {
        let role = Role::from_flags(config.flags)?;
        let method = Method::from_config(config.flags, config.params)?;
        let slot = InstanceSlot::acquire()?;

        let core = Arc::new(SessionCore {
            instance_id: slot.id(),
            status: Mutex::new(SessionStatus::Idle),
            cancel: AtomicBool::new(false),
            callback: Box::new(on_status),
        });

        debug!(instance = slot.id(), %role, "session initialized");

        Ok(Session {
            core,
            role,
            method: Some(method),
            transport: Some(transport),
            timing: Timing {
                rx_timeout: config.rx_timeout,
                deadline: config.handshake_deadline,
            },
            worker: None,
            _slot: slot,
        })
    }

    /// Spawn the worker driving the handshake. May be called once.
    pub fn start(&mut self) -> Result<(), AuthError> {
        let method = self
            .method
            .take()
            .ok_or_else(|| AuthError::InvalidParam("session already started".into()))?;
        let transport = self
            .transport
            .take()
            .ok_or_else(|| AuthError::InvalidParam("session has no transport".into()))?;

        let core = self.core.clone();
        let role = self.role;
        let timing = self.timing;
        self.worker = Some(tokio::spawn(async move {
            method.run(role, transport, core, timing).await
        }));
        Ok(())
    }

    /// Request cooperative cancellation.
    ///
    /// Publishes `Canceled` immediately (unless a terminal status already
    /// won) and raises the flag the worker checks on every receive-loop
    /// iteration; the worker exits at its next check, at the latest one
    /// receive timeout later.
    pub fn cancel(&self) {
        self.core.cancel.store(true, Ordering::Relaxed);
        self.core.publish(SessionStatus::Canceled);
    }

    /// Current status; safe to call from any thread at any time.
    pub fn status(&self) -> SessionStatus {
        self.core.status()
    }

    pub fn instance_id(&self) -> InstanceId {
        self.core.instance_id()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Wait for the worker to terminate and return the terminal status.
    pub async fn shutdown(mut self) -> SessionStatus {
        if let Some(worker) = self.worker.take() {
            match worker.await {
                Ok(status) => return status,
                Err(e) => warn!("session worker did not exit cleanly: {e}"),
            }
        }
        self.core.status()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            // Dropping a running session is a caller bug; don't leak the
            // worker task.
            warn!(
                instance = self.core.instance_id(),
                "session dropped before shutdown, aborting worker"
            );
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory;

    fn ignore_status(_: InstanceId, _: SessionStatus) {}

    #[tokio::test]
    async fn test_init_rejects_contradictory_role_flags() {
        let (transport, _peer) = memory::default_pair();
        let config = SessionConfig {
            flags: SessionFlags::CLIENT | SessionFlags::SERVER | SessionFlags::CHALLENGE_METHOD,
            ..Default::default()
        };
        assert!(matches!(
            Session::init(config, transport, ignore_status),
            Err(AuthError::InvalidParam(_))
        ));
    }

    #[tokio::test]
    async fn test_init_rejects_missing_method_flag() {
        let (transport, _peer) = memory::default_pair();
        let config = SessionConfig {
            flags: SessionFlags::CLIENT,
            ..Default::default()
        };
        assert!(matches!(
            Session::init(config, transport, ignore_status),
            Err(AuthError::InvalidParam(_))
        ));
    }

    #[tokio::test]
    async fn test_init_rejects_mismatched_params_kind() {
        let (transport, _peer) = memory::default_pair();
        let config = SessionConfig {
            flags: SessionFlags::CLIENT | SessionFlags::CHALLENGE_METHOD,
            params: Some(MethodParams::Dtls(DtlsParams::default())),
            ..Default::default()
        };
        assert!(matches!(
            Session::init(config, transport, ignore_status),
            Err(AuthError::InvalidParam(_))
        ));
    }

    #[tokio::test]
    async fn test_init_rejects_dtls_without_params() {
        let (transport, _peer) = memory::default_pair();
        let config = SessionConfig {
            flags: SessionFlags::SERVER | SessionFlags::DTLS_METHOD,
            ..Default::default()
        };
        assert!(matches!(
            Session::init(config, transport, ignore_status),
            Err(AuthError::InvalidParam(_))
        ));
    }

    #[tokio::test]
    async fn test_instance_pool_exhaustion_and_release() {
        let mut held = Vec::new();
        loop {
            let (transport, _peer) = memory::default_pair();
            match Session::init(SessionConfig::default(), transport, ignore_status) {
                Ok(session) => held.push(session),
                Err(AuthError::NoResource(bound)) => {
                    assert_eq!(bound, defaults::MAX_SESSIONS);
                    break;
                }
                Err(e) => panic!("unexpected init error: {e}"),
            }
        }
        assert!(!held.is_empty());

        // Releasing one slot makes init succeed again.
        held.pop();
        let (transport, _peer) = memory::default_pair();
        let session = Session::init(SessionConfig::default(), transport, ignore_status).unwrap();
        drop(session);
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        let core = SessionCore {
            instance_id: 0,
            status: Mutex::new(SessionStatus::Idle),
            cancel: AtomicBool::new(false),
            callback: Box::new(|_, _| {}),
        };

        assert_eq!(core.publish(SessionStatus::Started), SessionStatus::Started);
        assert_eq!(
            core.publish(SessionStatus::InProcess),
            SessionStatus::InProcess
        );
        assert_eq!(core.publish(SessionStatus::Canceled), SessionStatus::Canceled);
        // Terminal is sticky; a late worker verdict cannot overwrite it.
        assert_eq!(core.publish(SessionStatus::Failed), SessionStatus::Canceled);
        assert_eq!(core.publish(SessionStatus::Started), SessionStatus::Canceled);
        assert_eq!(core.status(), SessionStatus::Canceled);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(SessionStatus::Successful.as_str(), "successful");
        assert_eq!(
            SessionStatus::AuthenticationFailed.as_str(),
            "authentication_failed"
        );
        assert!(SessionStatus::Canceled.is_terminal());
        assert!(!SessionStatus::InProcess.is_terminal());
    }
}
