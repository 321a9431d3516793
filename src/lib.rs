//! # Peer Auth
//!
//! Mutual challenge-response peer authentication over unreliable datagram
//! carriers. Two endpoints holding the same 32-byte shared key prove
//! possession of it to each other through a four-message SHA-256
//! challenge-response handshake, driven by a per-session worker task over a
//! pluggable transport substrate.

pub mod cli;
pub mod crypto;
pub mod error;
mod handshake;
mod method;
pub mod session;
pub mod transport;
pub mod wire;

pub use error::AuthError;
pub use session::{Session, SessionConfig, SessionFlags, SessionStatus};
pub use transport::{CarrierEndpoint, TransportEvent, TransportHandle};

/// The current version of the peer-auth crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Per-read receive timeout inside the handshake loop
    pub const RX_TIMEOUT: Duration = Duration::from_millis(3000);

    /// Upper bound on a whole handshake attempt
    pub const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(30);

    /// Largest datagram payload the reference carrier delivers atomically
    pub const MTU: usize = 1024;

    /// Compile-time bound on concurrently live sessions
    pub const MAX_SESSIONS: usize = 8;
}
