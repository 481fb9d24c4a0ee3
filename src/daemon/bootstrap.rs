//! Bootstrap detection
//!
//! A daemon is ready once it prints the bootstrap marker on stdout. The wait
//! ends on the first of: the marker, a fatal marker on stderr, process exit,
//! or the deadline.

use super::process::{wait_exited, OutputLine, OutputStream, ProcessStatus};
use crate::error::{Result, TorPoolError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Printed on stdout once the daemon has finished bootstrapping
pub const BOOTSTRAP_MARKER: &str = "Bootstrapped 100%";

/// Printed on stderr when the daemon cannot bind its ports or write its state
pub const ERROR_MARKERS: [&str; 2] = ["Address already in use", "Permission denied"];

/// What a single output line means for the bootstrap wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// Bootstrap completed
    Ready,
    /// Fatal condition; carries the offending line
    Fatal(String),
    /// Nothing of interest
    Ignore,
}

/// Classify a daemon output line
pub fn classify(line: &OutputLine) -> LineEvent {
    match line.stream {
        OutputStream::Stdout if line.line.contains(BOOTSTRAP_MARKER) => LineEvent::Ready,
        OutputStream::Stderr if ERROR_MARKERS.iter().any(|m| line.line.contains(m)) => {
            LineEvent::Fatal(line.line.clone())
        }
        _ => LineEvent::Ignore,
    }
}

/// Wait for bootstrap completion
///
/// Returns `Timeout`, `Exited` or `Daemon` for the three failure outcomes.
/// Output already buffered when the process exits is still inspected, so a
/// marker printed right before exit is not lost.
pub async fn wait_for_bootstrap(
    output: &mut mpsc::Receiver<OutputLine>,
    status: &mut watch::Receiver<ProcessStatus>,
    timeout: Duration,
) -> Result<()> {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut output_open = true;

    loop {
        tokio::select! {
            biased;

            line = output.recv(), if output_open => match line {
                Some(line) => match classify(&line) {
                    LineEvent::Ready => return Ok(()),
                    LineEvent::Fatal(message) => return Err(TorPoolError::Daemon(message)),
                    LineEvent::Ignore => {}
                },
                None => {
                    debug!("Daemon output closed before bootstrap");
                    output_open = false;
                }
            },
            exited = wait_exited(status) => {
                while let Ok(line) = output.try_recv() {
                    match classify(&line) {
                        LineEvent::Ready => return Ok(()),
                        LineEvent::Fatal(message) => return Err(TorPoolError::Daemon(message)),
                        LineEvent::Ignore => {}
                    }
                }
                return Err(TorPoolError::Exited(exited.to_string()));
            }
            _ = &mut deadline => {
                return Err(TorPoolError::Timeout(timeout));
            }
        }
    }
}
