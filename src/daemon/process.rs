//! Spawned daemon process
//!
//! The child is owned by a supervisor task, which reaps it and publishes its
//! exit on a watch channel. The [`DaemonProcess`] handle can therefore be
//! observed for exit, sent a graceful signal and force-killed without any
//! caller holding the child. Dropping the handle force-kills the process.

use crate::error::{Result, TorPoolError};
use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

/// How long to wait for the process to be reaped after SIGKILL
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Buffered output lines awaiting the bootstrap watcher
const OUTPUT_CHANNEL_SIZE: usize = 64;

/// Build the fixed daemon argument list
pub fn daemon_args(socks_port: u16, control_port: u16, data_dir: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::with_capacity(16);
    let mut push = |flag: &str, value: OsString| {
        args.push(flag.into());
        args.push(value);
    };

    push("--SocksPort", socks_port.to_string().into());
    push("--ControlPort", control_port.to_string().into());
    push("--HashedControlPassword", "".into());
    push("--DataDirectory", data_dir.as_os_str().to_os_string());
    push("--NewCircuitPeriod", "10".into());
    push("--MaxCircuitDirtiness", "10".into());
    push("--CircuitBuildTimeout", "5".into());
    push("--LearnCircuitBuildTimeout", "0".into());

    args
}

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// A single line of daemon output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// Source pipe
    pub stream: OutputStream,
    /// Line text without the terminator
    pub line: String,
}

/// Liveness of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Still running
    Running,
    /// Reaped with the given status
    Exited(ExitStatus),
    /// Gone, but the exit status could not be collected
    Lost,
}

impl ProcessStatus {
    /// Whether the process is no longer running
    pub fn has_exited(&self) -> bool {
        !matches!(self, ProcessStatus::Running)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Exited(status) => write!(f, "{}", status),
            ProcessStatus::Lost => write!(f, "exit status unavailable"),
        }
    }
}

/// Wait until the watched process is no longer running
pub async fn wait_exited(rx: &mut watch::Receiver<ProcessStatus>) -> ProcessStatus {
    loop {
        let status = *rx.borrow_and_update();
        if status.has_exited() {
            return status;
        }
        if rx.changed().await.is_err() {
            let status = *rx.borrow();
            return if status.has_exited() {
                status
            } else {
                ProcessStatus::Lost
            };
        }
    }
}

/// A freshly spawned daemon and the receiving end of its output
#[derive(Debug)]
pub struct SpawnedDaemon {
    /// Process handle
    pub process: DaemonProcess,
    /// Interleaved stdout/stderr lines, closed once both pipes hit EOF
    pub output: mpsc::Receiver<OutputLine>,
}

/// Handle to a running daemon process
#[derive(Debug)]
pub struct DaemonProcess {
    /// OS process id
    pid: Option<u32>,
    /// Exit status published by the supervisor task
    status_rx: watch::Receiver<ProcessStatus>,
    /// Force-kill request; dropping it also kills
    kill_tx: Option<oneshot::Sender<()>>,
}

impl DaemonProcess {
    /// Spawn `executable` with `args`, labelling its log output with `label`
    pub fn spawn(executable: &Path, args: &[OsString], label: &str) -> Result<SpawnedDaemon> {
        let mut child = Command::new(executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TorPoolError::Spawn {
                executable: executable.display().to_string(),
                source,
            })?;

        let pid = child.id();
        debug!("Tor {} spawned with pid {:?}", label, pid);

        let (output_tx, output) = mpsc::channel(OUTPUT_CHANNEL_SIZE);
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, OutputStream::Stdout, label.to_string(), output_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, OutputStream::Stderr, label.to_string(), output_tx);
        }

        let (status_tx, status_rx) = watch::channel(ProcessStatus::Running);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let supervisor_label = label.to_string();

        tokio::spawn(async move {
            let exited = tokio::select! {
                waited = child.wait() => Some(waited),
                _ = kill_rx => None,
            };

            let waited = match exited {
                Some(waited) => waited,
                None => {
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to kill Tor {}: {}", supervisor_label, e);
                    }
                    child.wait().await
                }
            };

            let status = match waited {
                Ok(status) => {
                    debug!("Tor {} exited: {}", supervisor_label, status);
                    ProcessStatus::Exited(status)
                }
                Err(e) => {
                    warn!("Failed to reap Tor {}: {}", supervisor_label, e);
                    ProcessStatus::Lost
                }
            };
            let _ = status_tx.send(status);
        });

        Ok(SpawnedDaemon {
            process: DaemonProcess {
                pid,
                status_rx,
                kill_tx: Some(kill_tx),
            },
            output,
        })
    }

    /// OS process id, if the process had one when spawned
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current liveness
    pub fn status(&self) -> ProcessStatus {
        *self.status_rx.borrow()
    }

    /// A receiver that observes the process exit
    pub fn status_watcher(&self) -> watch::Receiver<ProcessStatus> {
        self.status_rx.clone()
    }

    /// Wait up to `timeout` for the process to exit
    pub async fn wait_exit(&self, timeout: Duration) -> Option<ProcessStatus> {
        let mut rx = self.status_rx.clone();
        tokio::time::timeout(timeout, wait_exited(&mut rx)).await.ok()
    }

    /// Ask the process to exit (SIGTERM)
    #[cfg(unix)]
    pub fn terminate(&mut self) -> std::io::Result<()> {
        let pid = match self.pid {
            Some(pid) if !self.status().has_exited() => pid,
            _ => return Ok(()),
        };
        let pid = libc::pid_t::try_from(pid)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: kill(2) with a pid we spawned and have not yet reaped.
        let ret = unsafe { libc::kill(pid, libc::SIGTERM) };
        if ret == -1 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    /// Ask the process to exit; without POSIX signals this is a kill
    #[cfg(not(unix))]
    pub fn terminate(&mut self) -> std::io::Result<()> {
        self.kill();
        Ok(())
    }

    /// Force-kill the process
    pub fn kill(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
    }

    /// Terminate gracefully, force-kill after `grace`, and wait for the reap
    pub async fn shutdown(mut self, grace: Duration, label: &str) -> ProcessStatus {
        if let Err(e) = self.terminate() {
            warn!("Failed to send SIGTERM to Tor {}: {}", label, e);
        }

        if let Some(status) = self.wait_exit(grace).await {
            return status;
        }

        debug!("Tor {} still running after {:?}, killing", label, grace);
        self.kill();

        match self.wait_exit(KILL_REAP_TIMEOUT).await {
            Some(status) => status,
            None => {
                warn!("Tor {} was not reaped after SIGKILL", label);
                ProcessStatus::Running
            }
        }
    }
}

/// Forward every line of `reader` until EOF
///
/// Lines are decoded lossily; the pipe is drained to the end so the daemon
/// never writes into a closed pipe.
fn forward_lines<R>(reader: R, stream: OutputStream, label: String, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    debug!("Tor {} {}: {}", label, stream, line);
                    if !tx.is_closed() {
                        let _ = tx.send(OutputLine { stream, line }).await;
                    }
                }
                Err(e) => {
                    debug!("Tor {} {} read error: {}", label, stream, e);
                    break;
                }
            }
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh() -> PathBuf {
        PathBuf::from("/bin/sh")
    }

    fn script(body: &str) -> Vec<OsString> {
        vec!["-c".into(), body.into()]
    }

    #[test]
    fn test_daemon_args() {
        let args = daemon_args(9060, 9061, Path::new("/tmp/tor-test"));
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();
        assert_eq!(
            args,
            vec![
                "--SocksPort",
                "9060",
                "--ControlPort",
                "9061",
                "--HashedControlPassword",
                "",
                "--DataDirectory",
                "/tmp/tor-test",
                "--NewCircuitPeriod",
                "10",
                "--MaxCircuitDirtiness",
                "10",
                "--CircuitBuildTimeout",
                "5",
                "--LearnCircuitBuildTimeout",
                "0",
            ]
        );
    }

    #[tokio::test]
    async fn test_spawn_missing_executable() {
        let err = DaemonProcess::spawn(Path::new("/nonexistent/tor"), &[], "test").unwrap_err();
        assert!(matches!(err, TorPoolError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_output_lines_are_forwarded() {
        let spawned = DaemonProcess::spawn(
            &sh(),
            &script("echo out-line; echo err-line >&2"),
            "test",
        )
        .unwrap();
        let mut output = spawned.output;

        let mut lines = Vec::new();
        while let Some(line) = output.recv().await {
            lines.push(line);
        }
        assert!(lines.contains(&OutputLine {
            stream: OutputStream::Stdout,
            line: "out-line".to_string()
        }));
        assert!(lines.contains(&OutputLine {
            stream: OutputStream::Stderr,
            line: "err-line".to_string()
        }));

        let status = spawned.process.wait_exit(Duration::from_secs(5)).await;
        assert!(matches!(status, Some(ProcessStatus::Exited(s)) if s.success()));
    }

    #[tokio::test]
    async fn test_invalid_utf8_output_is_forwarded() {
        let spawned = DaemonProcess::spawn(
            &sh(),
            &script("printf '\\377\\376 garbage\\n'; echo after"),
            "test",
        )
        .unwrap();
        let mut output = spawned.output;

        let mut lines = Vec::new();
        while let Some(line) = output.recv().await {
            lines.push(line.line);
        }
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" garbage"));
        assert_eq!(lines[1], "after");

        let status = spawned.process.wait_exit(Duration::from_secs(5)).await;
        assert!(matches!(status, Some(ProcessStatus::Exited(s)) if s.success()));
    }

    #[tokio::test]
    async fn test_shutdown_graceful() {
        let spawned = DaemonProcess::spawn(&sh(), &script("sleep 30"), "test").unwrap();
        assert_eq!(spawned.process.status(), ProcessStatus::Running);
        assert!(spawned.process.pid().is_some());

        let status = spawned
            .process
            .shutdown(Duration::from_secs(5), "test")
            .await;
        assert!(status.has_exited());
    }

    #[tokio::test]
    async fn test_shutdown_forces_kill() {
        let spawned = DaemonProcess::spawn(
            &sh(),
            &script("trap '' TERM; echo ready; while true; do sleep 1; done"),
            "test",
        )
        .unwrap();
        let mut output = spawned.output;
        // Wait until the trap is installed
        assert_eq!(output.recv().await.unwrap().line, "ready");

        let status = spawned
            .process
            .shutdown(Duration::from_millis(200), "test")
            .await;
        assert!(status.has_exited());
    }

    #[tokio::test]
    async fn test_drop_kills_process() {
        let spawned = DaemonProcess::spawn(&sh(), &script("sleep 30"), "test").unwrap();
        let mut watcher = spawned.process.status_watcher();
        drop(spawned);

        let status = tokio::time::timeout(Duration::from_secs(5), wait_exited(&mut watcher))
            .await
            .unwrap();
        assert!(status.has_exited());
    }
}
