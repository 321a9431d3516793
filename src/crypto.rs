//! Crypto primitives for the handshake: the SHA-256 response digest, nonce
//! generation, and fixed-time digest comparison.
//!
//! The proof of key possession is `SHA-256(nonce || key)` with both inputs
//! fixed at 32 bytes. Nonces come from the operating system CSPRNG; a weaker
//! generator would let an observer predict challenges across sessions.

use crate::error::AuthError;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Shared-key length in bytes
pub const KEY_LEN: usize = 32;

/// Challenge nonce length in bytes
pub const NONCE_LEN: usize = 32;

/// SHA-256 digest length in bytes
pub const DIGEST_LEN: usize = 32;

/// Pre-shared 32-byte secret held by both peers
pub type SharedKey = [u8; KEY_LEN];

/// Fresh per-session random challenge
pub type Nonce = [u8; NONCE_LEN];

/// Response digest proving possession of the shared key
pub type ResponseDigest = [u8; DIGEST_LEN];

/// Compile-time default shared key, used when a session is initialized
/// without a key override. Real deployments provision their own key and pass
/// it at session init.
pub const DEFAULT_SHARED_KEY: SharedKey = [
    0xBD, 0x84, 0x52, 0x6E, 0x41, 0x9B, 0x25, 0x7C, //
    0x33, 0xD1, 0x08, 0x5F, 0xEA, 0x29, 0x60, 0x47, //
    0x91, 0x3A, 0xC6, 0x0D, 0x7E, 0xB2, 0x18, 0xF4, //
    0x55, 0x8C, 0x02, 0xDB, 0x6F, 0x31, 0x94, 0xA8,
];

/// Compute the response digest for a challenge: `SHA-256(nonce || key)`.
///
/// Deterministic for fixed inputs; both sides derive the same value from the
/// same nonce and key, so equality of digests is the proof of possession.
pub fn response_digest(nonce: &Nonce, key: &SharedKey) -> ResponseDigest {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(key);
    hasher.finalize().into()
}

/// Fill a fresh nonce from the OS CSPRNG.
///
/// Entropy failure is surfaced rather than papered over; the session maps it
/// to a terminal `Failed` status.
pub fn generate_nonce() -> Result<Nonce, AuthError> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| AuthError::Crypto(format!("nonce generation failed: {e}")))?;
    Ok(nonce)
}

/// Fixed-time digest equality.
///
/// The comparison must not leak how many leading bytes matched, even though
/// the shared-secret threat model here is modest.
pub fn digests_match(a: &ResponseDigest, b: &ResponseDigest) -> bool {
    a.ct_eq(b).into()
}
