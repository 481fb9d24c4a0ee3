//! # Torpool - Tor Daemon Pool Supervisor
//!
//! Torpool runs a fixed number of Tor daemons side by side, each with its own
//! SOCKS port, control port and private data directory, and rotates their
//! identities on demand through the control channel.
//!
//! ## Features
//!
//! - **Isolated Instances**: Every daemon gets its own data directory, removed on stop
//! - **Bootstrap Detection**: Start returns only after the daemon reports full bootstrap
//! - **Identity Rotation**: `SIGNAL NEWNYM` with one reconnect-and-retry per call
//! - **Deterministic Teardown**: Graceful termination, forced kill, directory removal
//! - **Pool Orchestration**: All-or-nothing initialization and concurrent fan-out
//!
//! ## Usage
//!
//! ```rust,ignore
//! use torpool::ProxyPool;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = ProxyPool::new(2, 9070);
//!     for info in pool.initialize().await? {
//!         println!("{} -> {}", info.id, info.socks_url());
//!     }
//!
//!     let rotated = pool.rotate_identities().await;
//!     println!("rotated: {:?}", rotated);
//!
//!     pool.cleanup().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ProxyPool ──┬── ProxyInstance 1 ── tor (9070 socks, 9071 control)
//!             └── ProxyInstance 2 ── tor (9072 socks, 9073 control)
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod control;
pub mod daemon;
pub mod error;
pub mod helper;
pub mod instance;
pub mod pool;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use error::TorPoolError;
pub use instance::{InstanceState, ProxyInfo, ProxyInstance};
pub use pool::{create_pool, ProxyPool};

/// Version of the Torpool library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "torpool");
    }
}
