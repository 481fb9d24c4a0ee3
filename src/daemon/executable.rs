//! Locating the Tor executable
//!
//! When no explicit path is configured the executable is searched for next to
//! the running binary, in the working directory, in cargo's install directory
//! and finally on `PATH`. The first existing file wins.

use crate::error::{Result, TorPoolError};
use std::path::{Path, PathBuf};

/// File name of the daemon executable on this platform
#[cfg(windows)]
pub const EXECUTABLE_NAME: &str = "tor.exe";

/// File name of the daemon executable on this platform
#[cfg(not(windows))]
pub const EXECUTABLE_NAME: &str = "tor";

/// Resolve the daemon executable using the default search order
pub fn resolve_executable() -> Result<PathBuf> {
    resolve_named(EXECUTABLE_NAME)
}

/// Resolve an executable with the given file name using the default search order
pub fn resolve_named(name: &str) -> Result<PathBuf> {
    let dirs = search_dirs();
    find_in(&dirs, name).ok_or_else(|| {
        TorPoolError::Config(format!(
            "{} not found next to the binary, in ./bin, in cargo's bin directory or on PATH; \
             set daemon.executable to its location",
            name
        ))
    })
}

/// Resolve the daemon executable on the blocking pool
pub async fn locate_executable() -> Result<PathBuf> {
    locate_named(EXECUTABLE_NAME).await
}

/// [`resolve_named`] on the blocking pool; the search stats every `PATH` entry
pub async fn locate_named(name: &str) -> Result<PathBuf> {
    let name = name.to_string();
    tokio::task::spawn_blocking(move || resolve_named(&name))
        .await
        .map_err(|e| TorPoolError::Config(format!("Executable lookup failed: {}", e)))?
}

/// First `dir/name` that exists as a file
pub fn find_in(dirs: &[PathBuf], name: &str) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Directories searched, in priority order
pub fn search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir.join("bin"));
        dirs.insert(0, exe_dir);
    }

    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd.clone());
        dirs.push(cwd.join("bin"));
    }

    if let Some(cargo_home) = cargo_home() {
        dirs.push(cargo_home.join("bin"));
    }

    if let Some(path) = std::env::var_os("PATH") {
        dirs.extend(std::env::split_paths(&path));
    }

    dirs
}

fn cargo_home() -> Option<PathBuf> {
    if let Some(home) = std::env::var_os("CARGO_HOME") {
        return Some(PathBuf::from(home));
    }
    let home = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"))?;
    Some(PathBuf::from(home).join(".cargo"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_in_first_match_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("tor"), b"").unwrap();

        let dirs = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        assert_eq!(find_in(&dirs, "tor"), Some(second.path().join("tor")));

        std::fs::write(first.path().join("tor"), b"").unwrap();
        assert_eq!(find_in(&dirs, "tor"), Some(first.path().join("tor")));
    }

    #[test]
    fn test_find_in_ignores_directories() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("tor")).unwrap();

        let dirs = vec![root.path().to_path_buf()];
        assert_eq!(find_in(&dirs, "tor"), None);
    }

    #[test]
    fn test_search_dirs_order() {
        let dirs = search_dirs();
        let cwd = std::env::current_dir().unwrap();

        let cwd_pos = dirs.iter().position(|d| *d == cwd).unwrap();
        assert_eq!(dirs[cwd_pos + 1], cwd.join("bin"));

        let exe_dir = std::env::current_exe().unwrap().parent().unwrap().to_path_buf();
        assert_eq!(dirs[0], exe_dir);
        assert_eq!(dirs[1], exe_dir.join("bin"));
    }

    #[test]
    fn test_resolve_missing_is_config_error() {
        let err = resolve_named("torpool-definitely-not-installed").unwrap_err();
        assert!(matches!(err, TorPoolError::Config(_)));
        assert!(err.to_string().contains("daemon.executable"));
    }

    #[tokio::test]
    async fn test_locate_named_runs_off_runtime() {
        // Cargo runs tests from the package root
        let found = locate_named("Cargo.toml").await.unwrap();
        assert!(found.ends_with("Cargo.toml"));

        let err = locate_named("torpool-definitely-not-installed").await.unwrap_err();
        assert!(matches!(err, TorPoolError::Config(_)));
    }
}
