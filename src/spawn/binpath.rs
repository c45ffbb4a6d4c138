use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use super::SpawnError;

/// Name of the binary agents call back into for MCP and hooks
pub const DAEMON_BINARY: &str = "conductor";

/// Locate the `conductor` binary: the override when given, then the running
/// executable when it is `conductor` itself, then a `PATH` lookup.
pub fn locate_daemon(override_path: Option<&Path>) -> Result<PathBuf, SpawnError> {
    locate_daemon_in(override_path, None)
}

/// Like [`locate_daemon`], searching `search_path` instead of `$PATH` when
/// one is given
pub fn locate_daemon_in(
    override_path: Option<&Path>,
    search_path: Option<&OsStr>,
) -> Result<PathBuf, SpawnError> {
    if let Some(path) = override_path.filter(|p| !p.as_os_str().is_empty()) {
        return Ok(path.to_path_buf());
    }

    if let Ok(exe) = std::env::current_exe() {
        if exe.file_stem().and_then(|s| s.to_str()) == Some(DAEMON_BINARY) {
            return Ok(exe);
        }
    }

    let not_found = |cause: String| SpawnError::BinaryNotFound {
        binary: DAEMON_BINARY.to_string(),
        cause,
    };
    match search_path {
        Some(paths) if paths.is_empty() => Err(not_found("search path is empty".to_string())),
        Some(paths) => {
            let cwd = std::env::current_dir().unwrap_or_default();
            which::which_in(DAEMON_BINARY, Some(paths), cwd).map_err(|e| not_found(e.to_string()))
        }
        None => which::which(DAEMON_BINARY).map_err(|e| not_found(e.to_string())),
    }
}
