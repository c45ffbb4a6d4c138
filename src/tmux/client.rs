use async_trait::async_trait;
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::debug;

use super::{Multiplexer, TmuxError, TmuxWindow, PRIMARY_WINDOW_INDEX};
use crate::spawn::shell_quote;

/// Client for interacting with tmux via CLI
pub struct TmuxClient {
    /// Path to tmux binary
    tmux_path: String,
    /// Server socket name (`tmux -L`); the default server when `None`
    socket: Option<String>,
}

impl TmuxClient {
    pub fn new() -> Self {
        Self::with_path("tmux")
    }

    pub fn with_path(tmux_path: impl Into<String>) -> Self {
        Self {
            tmux_path: tmux_path.into(),
            socket: None,
        }
    }

    /// Talk to the server on socket `name` instead of the default one
    pub fn with_socket(mut self, name: impl Into<String>) -> Self {
        self.socket = Some(name.into());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.tmux_path);
        if let Some(socket) = &self.socket {
            cmd.args(["-L", socket.as_str()]);
        }
        cmd
    }

    async fn run(&self, args: &[&str]) -> Result<Output, TmuxError> {
        debug!(?args, "tmux");
        Ok(self.command().args(args).output().await?)
    }

    /// Run a command that must succeed, returning its trimmed stdout
    async fn run_checked(&self, command: &str, args: &[&str]) -> Result<String, TmuxError> {
        let output = self.run(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(TmuxError::Command {
                command: command.to_string(),
                output: stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Check if tmux server is running
    pub async fn is_server_running(&self) -> bool {
        self.command()
            .arg("list-sessions")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Check if a session with exactly this name exists
    pub async fn session_exists(&self, name: &str) -> Result<bool, TmuxError> {
        let target = session_target(name);
        let output = self.run(&["has-session", "-t", target.as_str()]).await?;
        Ok(output.status.success())
    }

    /// Create a detached session starting in `working_dir`
    pub async fn create_session(&self, name: &str, working_dir: &Path) -> Result<(), TmuxError> {
        let dir = working_dir.to_string_lossy();
        let mut args = vec!["new-session", "-d", "-s", name];
        if !dir.is_empty() {
            args.extend(["-c", &*dir]);
        }
        self.run_checked("new-session", &args).await?;
        Ok(())
    }

    /// Create the session unless it exists; returns whether it already did
    async fn ensure_session(&self, name: &str, working_dir: &Path) -> Result<bool, TmuxError> {
        if self.session_exists(name).await? {
            return Ok(true);
        }
        self.create_session(name, working_dir).await?;
        Ok(false)
    }

    /// List all windows of a session
    pub async fn list_windows(&self, group: &str) -> Result<Vec<TmuxWindow>, TmuxError> {
        // Without this a missing `proj` would resolve to `proj-old` by prefix
        if !self.session_exists(group).await? {
            return Err(TmuxError::SessionNotFound(group.to_string()));
        }

        // Format: window_index|window_name|window_active
        let target = session_target(group);
        let output = self
            .run(&[
                "list-windows",
                "-t",
                target.as_str(),
                "-F",
                "#{window_index}|#{window_name}|#{window_active}",
            ])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("no server running")
                || stderr.contains("can't find session")
                || stderr.contains("no such session")
                || stderr.contains("error connecting")
            {
                return Err(TmuxError::SessionNotFound(group.to_string()));
            }
            return Err(TmuxError::Command {
                command: "list-windows".to_string(),
                output: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().filter_map(parse_window_line).collect())
    }

    /// Create a window after the current one and return its index
    pub async fn create_window(
        &self,
        group: &str,
        window: &str,
        working_dir: &Path,
    ) -> Result<u32, TmuxError> {
        // Trailing colon forces tmux to resolve the target as a session name
        let target = format!("{}:", session_target(group));
        let dir = working_dir.to_string_lossy();
        let mut args = vec![
            "new-window",
            "-a",
            "-t",
            target.as_str(),
            "-n",
            window,
            "-P",
            "-F",
            "#{window_index}",
        ];
        if !dir.is_empty() {
            args.extend(["-c", &*dir]);
        }

        let stdout = self.run_checked("new-window", &args).await?;
        stdout
            .parse()
            .map_err(|_| TmuxError::Parse(format!("window index '{}'", stdout)))
    }

    /// Type `command` into a window and press Enter
    pub async fn send_keys(&self, group: &str, index: u32, command: &str) -> Result<(), TmuxError> {
        let target = window_target(group, index);
        self.run_checked("send-keys", &["send-keys", "-t", target.as_str(), command, "Enter"])
            .await?;
        Ok(())
    }

    pub async fn rename_window(&self, group: &str, index: u32, name: &str) -> Result<(), TmuxError> {
        let target = window_target(group, index);
        self.run_checked("rename-window", &["rename-window", "-t", target.as_str(), name])
            .await?;
        Ok(())
    }

    /// Get the command to attach to a window (for external execution)
    pub fn attach_command(&self, group: &str, window: &str) -> Vec<String> {
        let mut cmd = vec![self.tmux_path.clone()];
        if let Some(socket) = &self.socket {
            cmd.extend(["-L".to_string(), socket.clone()]);
        }
        cmd.extend([
            "attach-session".to_string(),
            "-t".to_string(),
            format!("{}:{}", session_target(group), window),
        ]);
        cmd
    }
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Exact-match session target; a bare name would also match by prefix
fn session_target(group: &str) -> String {
    format!("={}", group)
}

fn window_target(group: &str, index: u32) -> String {
    format!("={}:{}", group, index)
}

fn parse_window_line(line: &str) -> Option<TmuxWindow> {
    let mut parts = line.splitn(3, '|');
    let index = parts.next()?.trim().parse().ok()?;
    let name = parts.next()?.to_string();
    let active = parts.next()? == "1";
    Some(TmuxWindow {
        index,
        name,
        active,
    })
}

#[async_trait]
impl Multiplexer for TmuxClient {
    async fn window_exists(&self, group: &str, window: &str) -> Result<bool, TmuxError> {
        match self.list_windows(group).await {
            Ok(windows) => Ok(windows.iter().any(|w| w.name == window)),
            Err(TmuxError::SessionNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn spawn_agent(
        &self,
        group: &str,
        window: &str,
        command: &str,
        working_dir: &Path,
    ) -> Result<u32, TmuxError> {
        self.ensure_session(group, working_dir).await?;
        let index = self.create_window(group, window, working_dir).await?;
        self.send_keys(group, index, command).await?;
        Ok(index)
    }

    async fn spawn_primary_window(
        &self,
        group: &str,
        window: &str,
        command: &str,
        working_dir: &Path,
    ) -> Result<(), TmuxError> {
        let existed = self.ensure_session(group, working_dir).await?;
        self.rename_window(group, PRIMARY_WINDOW_INDEX, window)
            .await?;

        // A reused session may have drifted away from the project directory
        let command = if existed && !working_dir.as_os_str().is_empty() {
            format!(
                "cd {} && {}",
                shell_quote(&working_dir.to_string_lossy()),
                command
            )
        } else {
            command.to_string()
        };
        self.send_keys(group, PRIMARY_WINDOW_INDEX, &command).await
    }
}
