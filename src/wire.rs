//! Fixed-layout codec for the four handshake messages.
//!
//! Every message starts with a 3-byte header: a 16-bit start-of-header
//! marker followed by a one-byte message id. Payloads are fixed length, so
//! each message has exactly one wire size and decode rejects anything else.
//!
//! | id   | message         | payload                     | wire length |
//! |------|-----------------|-----------------------------|-------------|
//! | 0x01 | ClientChallenge | 32-byte client nonce        | 35          |
//! | 0x02 | ServerResponse  | 32-byte proof + 32-byte nonce | 67        |
//! | 0x03 | ClientResponse  | 32-byte proof               | 35          |
//! | 0x04 | AuthResult      | 1-byte outcome (0 = success) | 4          |
//!
//! All multi-byte fields are serialized little-endian. The start-of-header
//! value `0x65A2` therefore appears on the wire as `A2 65`.

use crate::crypto::{Nonce, ResponseDigest, DIGEST_LEN, NONCE_LEN};
use crate::error::AuthError;

/// Start-of-header marker preceding every message
pub const SOH: u16 = 0x65A2;

/// Length of the common header: `soh` (u16) plus `msg_id` (u8)
pub const HEADER_LEN: usize = 3;

/// Message identifiers carried in the header's third byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgId {
    /// Client opens the handshake with its nonce
    ClientChallenge = 0x01,
    /// Server proves the client's challenge and issues its own
    ServerResponse = 0x02,
    /// Client proves the server's challenge
    ClientResponse = 0x03,
    /// Final verdict, sent by whichever side decides the outcome
    AuthResult = 0x04,
}

impl MsgId {
    /// Map a wire byte back to a message id. Anything outside `0x01..=0x04`
    /// is a protocol error.
    pub fn from_wire(byte: u8) -> Result<MsgId, AuthError> {
        match byte {
            0x01 => Ok(MsgId::ClientChallenge),
            0x02 => Ok(MsgId::ServerResponse),
            0x03 => Ok(MsgId::ClientResponse),
            0x04 => Ok(MsgId::AuthResult),
            other => Err(AuthError::Protocol(format!(
                "unknown message id 0x{other:02X}"
            ))),
        }
    }
}

/// Serialize the common header into a fresh buffer with capacity for the
/// whole message.
fn begin_message(msg_id: MsgId, wire_len: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(wire_len);
    buf.extend_from_slice(&SOH.to_le_bytes());
    buf.push(msg_id as u8);
    buf
}

/// Validate the 3-byte header and return the message id.
///
/// Used directly by the server while waiting for the client's second
/// message, where the id decides which payload length follows.
pub fn decode_header(header: &[u8]) -> Result<MsgId, AuthError> {
    if header.len() < HEADER_LEN {
        return Err(AuthError::Protocol(format!(
            "header truncated to {} bytes",
            header.len()
        )));
    }
    let soh = u16::from_le_bytes([header[0], header[1]]);
    if soh != SOH {
        return Err(AuthError::Protocol(format!(
            "bad start-of-header 0x{soh:04X}"
        )));
    }
    MsgId::from_wire(header[2])
}

/// Validate header and exact length for a fixed-size message body.
fn check_frame(buf: &[u8], expected_id: MsgId, wire_len: usize) -> Result<(), AuthError> {
    if buf.len() != wire_len {
        return Err(AuthError::Protocol(format!(
            "{expected_id:?} frame is {} bytes, expected {wire_len}",
            buf.len()
        )));
    }
    let id = decode_header(&buf[..HEADER_LEN])?;
    if id != expected_id {
        return Err(AuthError::Protocol(format!(
            "expected {expected_id:?}, peer sent {id:?}"
        )));
    }
    Ok(())
}

/// First message: the client's fresh 32-byte nonce, in cleartext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientChallenge {
    pub nonce: Nonce,
}

impl ClientChallenge {
    pub const WIRE_LEN: usize = HEADER_LEN + NONCE_LEN;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = begin_message(MsgId::ClientChallenge, Self::WIRE_LEN);
        buf.extend_from_slice(&self.nonce);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, AuthError> {
        check_frame(buf, MsgId::ClientChallenge, Self::WIRE_LEN)?;
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&buf[HEADER_LEN..]);
        Ok(Self { nonce })
    }
}

/// Second message: the server's proof over the client nonce, plus the
/// server's own challenge nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerResponse {
    pub proof: ResponseDigest,
    pub nonce: Nonce,
}

impl ServerResponse {
    pub const WIRE_LEN: usize = HEADER_LEN + DIGEST_LEN + NONCE_LEN;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = begin_message(MsgId::ServerResponse, Self::WIRE_LEN);
        buf.extend_from_slice(&self.proof);
        buf.extend_from_slice(&self.nonce);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, AuthError> {
        check_frame(buf, MsgId::ServerResponse, Self::WIRE_LEN)?;
        let mut proof = [0u8; DIGEST_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        proof.copy_from_slice(&buf[HEADER_LEN..HEADER_LEN + DIGEST_LEN]);
        nonce.copy_from_slice(&buf[HEADER_LEN + DIGEST_LEN..]);
        Ok(Self { proof, nonce })
    }
}

/// Third message: the client's proof over the server nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientResponse {
    pub proof: ResponseDigest,
}

impl ClientResponse {
    pub const WIRE_LEN: usize = HEADER_LEN + DIGEST_LEN;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = begin_message(MsgId::ClientResponse, Self::WIRE_LEN);
        buf.extend_from_slice(&self.proof);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, AuthError> {
        check_frame(buf, MsgId::ClientResponse, Self::WIRE_LEN)?;
        let mut proof = [0u8; DIGEST_LEN];
        proof.copy_from_slice(&buf[HEADER_LEN..]);
        Ok(Self { proof })
    }
}

/// Fourth message: the one-byte verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthResult {
    pub outcome: u8,
}

impl AuthResult {
    pub const WIRE_LEN: usize = HEADER_LEN + 1;

    /// Outcome byte signalling a verified peer
    pub const SUCCESS: u8 = 0x00;
    /// Conventional failure outcome byte
    pub const FAILURE: u8 = 0x01;

    pub fn success() -> Self {
        Self {
            outcome: Self::SUCCESS,
        }
    }

    pub fn failure() -> Self {
        Self {
            outcome: Self::FAILURE,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Self::SUCCESS
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = begin_message(MsgId::AuthResult, Self::WIRE_LEN);
        buf.push(self.outcome);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, AuthError> {
        check_frame(buf, MsgId::AuthResult, Self::WIRE_LEN)?;
        Ok(Self {
            outcome: buf[HEADER_LEN],
        })
    }
}
