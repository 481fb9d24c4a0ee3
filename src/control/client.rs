//! Tor control port client
//!
//! Connects to a daemon's control port on loopback, authenticates, and sends
//! signals. Every round-trip is bounded by the configured timeout so that a
//! wedged daemon cannot hold an instance hostage.

use super::codec::{quote_string, read_reply, write_command, Reply};
use super::{ControlConnector, ControlSession};
use crate::config::ControlConfig;
use crate::error::{Result, TorPoolError};
use crate::helper::LOOPBACK_HOST;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::debug;

/// Connector producing [`TorControlSession`]s
#[derive(Debug, Clone)]
pub struct TorControlConnector {
    /// Timeout for connecting and for each command round-trip
    timeout: Duration,
}

impl TorControlConnector {
    /// Create a connector with the given timeout
    pub fn new(timeout: Duration) -> Self {
        TorControlConnector { timeout }
    }

    /// Create a connector from configuration
    pub fn from_config(config: &ControlConfig) -> Self {
        Self::new(config.connect_timeout())
    }
}

impl Default for TorControlConnector {
    fn default() -> Self {
        Self::from_config(&ControlConfig::default())
    }
}

#[async_trait]
impl ControlConnector for TorControlConnector {
    async fn connect(&self, port: u16, password: &str) -> Result<Box<dyn ControlSession>> {
        let session = TorControlSession::connect(port, password, self.timeout).await?;
        Ok(Box::new(session))
    }
}

/// Authenticated session on a Tor control port
#[derive(Debug)]
pub struct TorControlSession {
    conn: BufReader<TcpStream>,
    port: u16,
    timeout: Duration,
}

impl TorControlSession {
    /// Connect to `127.0.0.1:<port>` and authenticate with `password`
    pub async fn connect(port: u16, password: &str, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((LOOPBACK_HOST, port)))
            .await
            .map_err(|_| {
                TorPoolError::Control(format!("Connection timeout to control port {}", port))
            })?
            .map_err(|e| {
                TorPoolError::Control(format!("Failed to connect to control port {}: {}", port, e))
            })?;

        let mut session = TorControlSession {
            conn: BufReader::new(stream),
            port,
            timeout,
        };

        session
            .command(&format!("AUTHENTICATE {}", quote_string(password)))
            .await?
            .check("AUTHENTICATE")?;

        debug!("Control session established on port {}", port);
        Ok(session)
    }

    /// Control port this session is connected to
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Send a raw command and read its reply
    pub async fn command(&mut self, command: &str) -> Result<Reply> {
        let port = self.port;
        let timeout = self.timeout;
        let conn = &mut self.conn;
        let round_trip = async move {
            write_command(conn, command).await?;
            read_reply(conn).await
        };

        tokio::time::timeout(timeout, round_trip)
            .await
            .map_err(|_| {
                TorPoolError::Control(format!("Control port {} did not answer in time", port))
            })?
    }
}

#[async_trait]
impl ControlSession for TorControlSession {
    async fn signal(&mut self, name: &str) -> Result<()> {
        let command = format!("SIGNAL {}", name);
        self.command(&command).await?.check(&command)?;
        Ok(())
    }

    async fn quit(&mut self) -> Result<()> {
        self.command("QUIT").await?.check("QUIT")?;
        Ok(())
    }
}
