//! Project configuration loaded from `.conductor/conductor.yaml`.
//!
//! ```yaml
//! name: my-project          # tmux session agents are spawned into
//! extend: ~/conductor-base  # optional base directory with its own conductor.yaml
//! architect:
//!   agent: claude
//! ticket:
//!   work:
//!     agent: claude
//!     args: ["--model", "opus"]
//!   research:
//!     agent: opencode
//! git:
//!   worktrees: true         # ticket agents work in their own git worktree
//! ```
//!
//! A project file is layered over its `extend` base, which is layered over
//! the built-in defaults. Scalars from the upper layer win when set, `args`
//! lists are replaced wholesale and ticket types are merged per entry.
//! `git.worktrees` is enabled when either layer enables it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::spawn::AgentKind;

/// Directory holding per-project state and configuration
pub const PROJECT_DIR: &str = ".conductor";
const CONFIG_FILE: &str = "conductor.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("project not found: no .conductor/ directory above {}", .0.display())]
    ProjectNotFound(PathBuf),
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid config: {field}: {message}")]
    Validation { field: String, message: String },
    #[error("extend path not found: {path} (resolved to {})", .resolved.display())]
    ExtendNotFound { path: String, resolved: PathBuf },
    #[error("circular extend: {} was already loaded", .0.display())]
    CircularExtend(PathBuf),
}

/// Agent selection for one role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent: String,
    /// Extra CLI arguments appended to the agent command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl RoleConfig {
    fn claude() -> Self {
        Self {
            agent: AgentKind::Claude.as_str().to_string(),
            args: Vec::new(),
        }
    }

    fn overlay(&self, upper: &RoleConfig) -> RoleConfig {
        RoleConfig {
            agent: if upper.agent.is_empty() {
                self.agent.clone()
            } else {
                upper.agent.clone()
            },
            args: if upper.args.is_empty() {
                self.args.clone()
            } else {
                upper.args.clone()
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default)]
    pub worktrees: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extend: Option<String>,
    /// tmux session name for this project
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub architect: RoleConfig,
    /// Role configuration per ticket type
    #[serde(default)]
    pub ticket: BTreeMap<String, RoleConfig>,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(skip)]
    resolved_extend: Option<PathBuf>,
}

impl ProjectConfig {
    pub fn defaults() -> Self {
        let mut ticket = BTreeMap::new();
        ticket.insert(
            crate::ticket::DEFAULT_TICKET_TYPE.to_string(),
            RoleConfig::claude(),
        );
        Self {
            architect: RoleConfig::claude(),
            ticket,
            ..Self::default()
        }
    }

    /// Load the configuration of the project rooted at `project_root`.
    /// A missing file yields the defaults.
    pub fn load(project_root: &Path) -> Result<Self, ConfigError> {
        let path = project_root.join(PROJECT_DIR).join(CONFIG_FILE);
        load_layered(&path, project_root, &mut HashSet::new())
    }

    /// Absolute path of the `extend` base directory, when one is configured
    pub fn resolved_extend_path(&self) -> Option<&Path> {
        self.resolved_extend.as_deref()
    }

    /// Role configuration for a ticket type
    pub fn ticket_role(&self, ticket_type: &str) -> Result<&RoleConfig, ConfigError> {
        self.ticket
            .get(ticket_type)
            .ok_or_else(|| ConfigError::Validation {
                field: format!("ticket.{}", ticket_type),
                message: format!("no ticket configuration found for type '{}'", ticket_type),
            })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_agent("architect.agent", &self.architect.agent)?;
        for (ticket_type, role) in &self.ticket {
            check_agent(&format!("ticket.{}.agent", ticket_type), &role.agent)?;
        }
        Ok(())
    }

    fn overlay(&self, upper: &ProjectConfig) -> ProjectConfig {
        let mut ticket = self.ticket.clone();
        for (ticket_type, role) in &upper.ticket {
            let merged = match ticket.get(ticket_type) {
                Some(lower) => lower.overlay(role),
                None => role.clone(),
            };
            ticket.insert(ticket_type.clone(), merged);
        }

        ProjectConfig {
            extend: upper.extend.clone(),
            name: if upper.name.is_empty() {
                self.name.clone()
            } else {
                upper.name.clone()
            },
            architect: self.architect.overlay(&upper.architect),
            ticket,
            git: GitConfig {
                worktrees: upper.git.worktrees || self.git.worktrees,
            },
            resolved_extend: self.resolved_extend.clone(),
        }
    }
}

fn check_agent(field: &str, agent: &str) -> Result<(), ConfigError> {
    if agent.is_empty() || agent.parse::<AgentKind>().is_ok() {
        return Ok(());
    }
    Err(ConfigError::Validation {
        field: field.to_string(),
        message: format!("must be one of: {}", AgentKind::NAMES.join(", ")),
    })
}

fn load_layered(
    path: &Path,
    config_root: &Path,
    visited: &mut HashSet<PathBuf>,
) -> Result<ProjectConfig, ConfigError> {
    let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(key.clone()) {
        return Err(ConfigError::CircularExtend(key));
    }

    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ProjectConfig::defaults()),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let raw: ProjectConfig = if data.trim().is_empty() {
        ProjectConfig::default()
    } else {
        serde_yaml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    };

    let merged = match raw.extend.as_deref().filter(|e| !e.is_empty()) {
        None => ProjectConfig::defaults().overlay(&raw),
        Some(extend) => {
            let base_root = resolve_extend(extend, config_root)?;
            let base = load_layered(&base_root.join(CONFIG_FILE), &base_root, visited)?;
            let mut merged = base.overlay(&raw);
            merged.resolved_extend = Some(base_root);
            merged
        }
    };

    merged.validate()?;
    Ok(merged)
}

/// Resolve an `extend` entry: `~` expands to the home directory, relative
/// paths are taken from the directory holding the referring config.
fn resolve_extend(extend: &str, config_root: &Path) -> Result<PathBuf, ConfigError> {
    let expanded = match extend.strip_prefix('~') {
        Some(rest) => {
            let home = dirs::home_dir().unwrap_or_default();
            home.join(rest.trim_start_matches('/'))
        }
        None => PathBuf::from(extend),
    };

    let resolved = if expanded.is_absolute() {
        expanded
    } else {
        config_root.join(expanded)
    };

    if !resolved.is_dir() {
        return Err(ConfigError::ExtendNotFound {
            path: extend.to_string(),
            resolved,
        });
    }
    Ok(resolved)
}

/// Walk up from `start` to the first directory containing `.conductor/`
pub fn find_project_root(start: &Path) -> Result<PathBuf, ConfigError> {
    let start = if start.is_absolute() {
        start.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|source| ConfigError::Io {
                path: start.to_path_buf(),
                source,
            })?
            .join(start)
    };

    start
        .ancestors()
        .find(|dir| dir.join(PROJECT_DIR).is_dir())
        .map(Path::to_path_buf)
        .ok_or(ConfigError::ProjectNotFound(start))
}
