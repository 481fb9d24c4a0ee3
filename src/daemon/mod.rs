//! Daemon process module for Torpool
//!
//! Everything about the external Tor process itself: finding the executable,
//! spawning it with the fixed flag set, streaming its output, detecting
//! bootstrap, and terminating it.

mod bootstrap;
mod executable;
mod process;

pub use bootstrap::{classify, wait_for_bootstrap, LineEvent, BOOTSTRAP_MARKER, ERROR_MARKERS};
pub use executable::{
    find_in, locate_executable, locate_named, resolve_executable, resolve_named, search_dirs,
    EXECUTABLE_NAME,
};
pub use process::{
    daemon_args, wait_exited, DaemonProcess, OutputLine, OutputStream, ProcessStatus,
    SpawnedDaemon,
};
