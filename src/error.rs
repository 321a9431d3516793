//! Typed errors for the authentication core.
//!
//! The handshake state machine has to tell a quiet wire (`Again`) apart from
//! a broken one (`Io`, `Protocol`), so the core uses a concrete error enum
//! rather than `anyhow`. Binary-level wiring still composes these with
//! `anyhow::Result`.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the transport substrate, codec, and session facade.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Caller passed an unusable argument: bad flag combination, oversized
    /// send, missing method parameters, double start.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// The session instance pool is exhausted.
    #[error("no free session instance (pool size {0})")]
    NoResource(usize),

    /// The crypto backend could not produce a digest or nonce.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// No byte became available within the receive timeout. The read loop
    /// decides whether this is a retry or a handshake timeout.
    #[error("no data within {0:?}")]
    Again(Duration),

    /// The peer sent bytes that do not form a valid protocol message.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Carrier-level I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    /// True for the retryable empty-wire condition, false for hard errors.
    pub fn is_again(&self) -> bool {
        matches!(self, AuthError::Again(_))
    }
}
