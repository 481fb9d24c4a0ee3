//! Control channel module for Torpool
//!
//! A supervised daemon exposes a control port next to its SOCKS port. This
//! module defines the two seams the instance code talks to, a
//! [`ControlConnector`] that opens authenticated sessions and the
//! [`ControlSession`] it yields, plus the line-based Tor implementation of
//! both.

mod client;
mod codec;

pub use client::{TorControlConnector, TorControlSession};
pub use codec::{quote_string, read_reply, write_command, Reply};

use crate::error::Result;
use async_trait::async_trait;
use std::fmt::Debug;

/// Signal that makes the daemon switch to clean circuits
pub const SIGNAL_NEWNYM: &str = "NEWNYM";

/// An authenticated session on a daemon's control port
#[async_trait]
pub trait ControlSession: Send + Sync + Debug {
    /// Send `SIGNAL <name>` and wait for the acknowledgement
    async fn signal(&mut self, name: &str) -> Result<()>;

    /// Ask the daemon to close the session
    async fn quit(&mut self) -> Result<()>;
}

/// Opens control sessions
///
/// Instances hold an `Arc<dyn ControlConnector>` so that a session can be
/// re-established after the original one dropped.
#[async_trait]
pub trait ControlConnector: Send + Sync + Debug {
    /// Connect to the control port on loopback and authenticate
    async fn connect(&self, port: u16, password: &str) -> Result<Box<dyn ControlSession>>;
}
