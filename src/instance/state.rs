//! Instance lifecycle state and the record returned by a successful start

use crate::helper::LOOPBACK_HOST;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a [`ProxyInstance`](super::ProxyInstance)
///
/// ```text
/// Idle -> Starting -> AwaitingBootstrap -> Ready -> Stopping -> Idle
///            \               \
///             +---------------+--> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// No process, no session
    Idle,
    /// Creating the data directory and spawning the daemon
    Starting,
    /// Daemon spawned, waiting for the bootstrap marker
    AwaitingBootstrap,
    /// Bootstrapped; the control session may or may not be connected
    Ready,
    /// Teardown in progress
    Stopping,
    /// The last start failed and its resources were released
    Failed,
}

impl InstanceState {
    /// Whether `start` may be called in this state
    pub fn can_start(&self) -> bool {
        matches!(self, InstanceState::Idle | InstanceState::Failed)
    }

    /// Whether a start is in flight
    pub fn is_starting(&self) -> bool {
        matches!(
            self,
            InstanceState::Starting | InstanceState::AwaitingBootstrap
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceState::Idle => "idle",
            InstanceState::Starting => "starting",
            InstanceState::AwaitingBootstrap => "awaiting bootstrap",
            InstanceState::Ready => "ready",
            InstanceState::Stopping => "stopping",
            InstanceState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Endpoint description of a started instance
///
/// Serialized with the field names `id`, `socksHost`, `socksPort` and
/// `controlPort`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyInfo {
    /// Instance id
    pub id: String,
    /// Always the loopback address
    pub socks_host: String,
    /// SOCKS port
    pub socks_port: u16,
    /// Control port
    pub control_port: u16,
}

impl ProxyInfo {
    /// Describe an instance listening on loopback
    pub fn new(id: impl Into<String>, socks_port: u16, control_port: u16) -> Self {
        ProxyInfo {
            id: id.into(),
            socks_host: LOOPBACK_HOST.to_string(),
            socks_port,
            control_port,
        }
    }

    /// `host:port` of the SOCKS endpoint
    pub fn socks_addr(&self) -> String {
        format!("{}:{}", self.socks_host, self.socks_port)
    }

    /// `socks5h://host:port`, resolving names through the daemon
    pub fn socks_url(&self) -> String {
        format!("socks5h://{}", self.socks_addr())
    }
}
