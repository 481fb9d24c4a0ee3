//! Error types for Torpool
//!
//! This module defines all custom error types used throughout the library.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result alias used by instance and pool operations
pub type Result<T> = std::result::Result<T, TorPoolError>;

/// Main error type for Torpool operations
#[derive(Error, Debug)]
pub enum TorPoolError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error (executable not found, invalid ports)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The OS refused to start the daemon
    #[error("Failed to spawn {executable}: {source}")]
    Spawn {
        /// Executable that was attempted
        executable: String,
        /// Underlying spawn failure
        #[source]
        source: io::Error,
    },

    /// The daemon did not bootstrap within the allowed time
    #[error("Timeout while starting Tor ({0:?})")]
    Timeout(Duration),

    /// The daemon exited before reporting bootstrap completion
    #[error("Tor process exited before bootstrap ({0})")]
    Exited(String),

    /// The daemon reported a fatal condition on stderr
    #[error("Tor error: {0}")]
    Daemon(String),

    /// Control channel error
    #[error("Control channel error: {0}")]
    Control(String),

    /// Operation not allowed in the instance's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Pool error
    #[error("Pool error: {0}")]
    Pool(String),
}

impl TorPoolError {
    /// Whether this error came from the readiness wait of a start
    pub fn is_readiness(&self) -> bool {
        matches!(
            self,
            TorPoolError::Timeout(_) | TorPoolError::Exited(_) | TorPoolError::Daemon(_)
        )
    }
}
