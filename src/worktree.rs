//! Git worktrees giving each ticket agent its own checkout and branch.
//!
//! A worktree lives at `<base>/<name>` on branch `ticket/<slug>`, where the
//! base defaults to `~/.conductor/worktrees`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Output;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Prefix of the feature branch created for each worktree
pub const BRANCH_PREFIX: &str = "ticket/";

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("git {command} failed: {output}")]
    Command { command: String, output: String },
    #[error("worktree already exists: {}", .0.display())]
    Exists(PathBuf),
    #[error("failed to run git: {0}")]
    Io(#[from] std::io::Error),
}

/// A checkout created for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worktree {
    pub path: PathBuf,
    /// Feature branch checked out in `path`
    pub branch: String,
}

#[async_trait]
pub trait WorktreeManager: Send + Sync {
    /// Add a worktree of `repo` named `name` on a new branch `ticket/<slug>`
    async fn create(&self, repo: &Path, name: &str, slug: &str) -> Result<Worktree, WorktreeError>;

    /// Remove the worktree and delete its branch
    async fn remove(&self, repo: &Path, worktree: &Worktree) -> Result<(), WorktreeError>;
}

/// Worktrees managed through the `git` CLI
pub struct GitWorktrees {
    git_path: String,
    base_dir: PathBuf,
}

impl GitWorktrees {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            git_path: "git".to_string(),
            base_dir: base_dir.into(),
        }
    }

    /// Worktrees under `~/.conductor/worktrees`
    pub fn in_home() -> Self {
        let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
        Self::new(home.join(".conductor").join("worktrees"))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    async fn run(&self, repo: &Path, args: &[&str]) -> Result<Output, WorktreeError> {
        debug!(repo = %repo.display(), ?args, "git");
        Ok(Command::new(&self.git_path)
            .args(args)
            .current_dir(repo)
            .output()
            .await?)
    }

    async fn run_checked(
        &self,
        repo: &Path,
        command: &str,
        args: &[&str],
    ) -> Result<(), WorktreeError> {
        let output = self.run(repo, args).await?;
        if !output.status.success() {
            let mut text = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if text.is_empty() {
                text = String::from_utf8_lossy(&output.stdout).trim().to_string();
            }
            return Err(WorktreeError::Command {
                command: command.to_string(),
                output: text,
            });
        }
        Ok(())
    }
}

impl Default for GitWorktrees {
    fn default() -> Self {
        Self::in_home()
    }
}

#[async_trait]
impl WorktreeManager for GitWorktrees {
    async fn create(&self, repo: &Path, name: &str, slug: &str) -> Result<Worktree, WorktreeError> {
        let path = self.base_dir.join(name);
        if path.exists() {
            return Err(WorktreeError::Exists(path));
        }
        tokio::fs::create_dir_all(&self.base_dir).await?;

        let branch = format!("{}{}", BRANCH_PREFIX, slug);
        let path_str = path.to_string_lossy();
        self.run_checked(
            repo,
            "worktree add",
            &["worktree", "add", &path_str, "-b", &branch],
        )
        .await?;

        debug!(path = %path.display(), %branch, "created worktree");
        Ok(Worktree { path, branch })
    }

    async fn remove(&self, repo: &Path, worktree: &Worktree) -> Result<(), WorktreeError> {
        let path_str = worktree.path.to_string_lossy();
        self.run_checked(
            repo,
            "worktree remove",
            &["worktree", "remove", &path_str, "--force"],
        )
        .await?;
        self.run_checked(repo, "branch -D", &["branch", "-D", &worktree.branch])
            .await?;

        debug!(path = %worktree.path.display(), branch = %worktree.branch, "removed worktree");
        Ok(())
    }
}
