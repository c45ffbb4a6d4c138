mod client;

pub use client::TmuxClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Window index reserved for a role's primary window
pub const PRIMARY_WINDOW_INDEX: u32 = 0;

/// Represents a tmux window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmuxWindow {
    pub index: u32,
    pub name: String,
    /// Whether this is the session's current window
    pub active: bool,
}

#[derive(Debug, Error)]
pub enum TmuxError {
    #[error("tmux session not found: {0}")]
    SessionNotFound(String),
    #[error("tmux command failed: {command}: {output}")]
    Command { command: String, output: String },
    #[error("unexpected tmux output: {0}")]
    Parse(String),
    #[error("failed to run tmux: {0}")]
    Io(#[from] std::io::Error),
}

/// Window operations the orchestrator needs from the terminal multiplexer
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Whether `window` exists in session `group`. A missing session or
    /// server is reported as `false`, not as an error.
    async fn window_exists(&self, group: &str, window: &str) -> Result<bool, TmuxError>;

    /// Open a new window running `command` and return its index
    async fn spawn_agent(
        &self,
        group: &str,
        window: &str,
        command: &str,
        working_dir: &Path,
    ) -> Result<u32, TmuxError>;

    /// Take over the session's first window (index 0) for `command`
    async fn spawn_primary_window(
        &self,
        group: &str,
        window: &str,
        command: &str,
        working_dir: &Path,
    ) -> Result<(), TmuxError>;
}
