//! Command-line interface of the `peer-auth` binary.
//!
//! The binary wires one authentication session to the UDP loopback carrier:
//! pick a role, point it at the peer, optionally override the shared key,
//! and wait for the terminal status.
//!
//! ```bash
//! # Responder
//! peer-auth --role server --bind-port 47201 --peer-port 47202
//!
//! # Initiator, with a provisioned key
//! peer-auth --role client --bind-port 47202 --peer-port 47201 \
//!     --key 3a2f...64-hex-chars...90
//! ```

use crate::crypto::{SharedKey, KEY_LEN};
use crate::session::{MethodParams, SessionConfig, SessionFlags};
use crate::transport::UdpCarrierConfig;
use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use std::time::Duration;

/// Mutual challenge-response peer authentication over UDP
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Handshake role for this endpoint
    #[arg(short, long, value_enum)]
    pub role: RoleArg,

    /// Local address to bind for receiving datagrams
    #[arg(long, default_value = "127.0.0.1")]
    pub bind_ip: String,

    /// Local port to bind for receiving datagrams
    #[arg(long, default_value_t = 47201)]
    pub bind_port: u16,

    /// Address the peer receives on
    #[arg(long, default_value = "127.0.0.1")]
    pub peer_ip: String,

    /// Port the peer receives on
    #[arg(long, default_value_t = 47202)]
    pub peer_port: u16,

    /// Shared-key override as 64 hex characters; omit to use the built-in
    /// default key
    #[arg(short, long)]
    pub key: Option<String>,

    /// Per-read receive timeout in milliseconds
    #[arg(long, default_value_t = 3000)]
    pub rx_timeout_ms: u64,

    /// Overall handshake deadline in seconds
    #[arg(long, default_value_t = 30)]
    pub deadline_secs: u64,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress the user-facing stdout log layer
    #[arg(short, long)]
    pub quiet: bool,

    /// Detailed log destination: a file path, or "stderr"
    #[arg(long)]
    pub log_file: Option<String>,
}

/// CLI spelling of the session role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    Client,
    Server,
}

impl Args {
    /// Decode the optional hex shared-key override.
    pub fn shared_key(&self) -> Result<Option<SharedKey>> {
        let Some(ref hex_key) = self.key else {
            return Ok(None);
        };
        let bytes = hex::decode(hex_key).context("shared key is not valid hex")?;
        let key: SharedKey = bytes
            .try_into()
            .map_err(|_| anyhow!("shared key must be exactly {KEY_LEN} bytes of hex"))?;
        Ok(Some(key))
    }

    /// Build the session configuration these arguments describe.
    pub fn session_config(&self) -> Result<SessionConfig> {
        let role_flag = match self.role {
            RoleArg::Client => SessionFlags::CLIENT,
            RoleArg::Server => SessionFlags::SERVER,
        };
        let params = self
            .shared_key()?
            .map(|shared_key| MethodParams::ChallengeResponse { shared_key });

        Ok(SessionConfig {
            flags: role_flag | SessionFlags::CHALLENGE_METHOD,
            params,
            rx_timeout: Duration::from_millis(self.rx_timeout_ms),
            handshake_deadline: Duration::from_secs(self.deadline_secs),
        })
    }

    /// Build the UDP carrier configuration these arguments describe.
    pub fn carrier_config(&self) -> UdpCarrierConfig {
        UdpCarrierConfig {
            bind_ip: self.bind_ip.clone(),
            bind_port: self.bind_port,
            peer_ip: self.peer_ip.clone(),
            peer_port: self.peer_port,
            ..Default::default()
        }
    }
}
