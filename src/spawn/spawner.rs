use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::agent::{opencode_config_content, AgentKind, LaunchSpec};
use super::artifacts::{
    self, shell_quote, LauncherScript, McpConfig, McpParams, SettingsConfig,
};
use super::binpath::locate_daemon_in;
use super::prompt::{self, PromptError, PromptResolver, PromptRole, Stage};
use super::state::{detect_state, SessionState};
use super::SpawnError;
use crate::session::{SessionStore, ARCHITECT_SESSION_KEY, META_SESSION_KEY};
use crate::ticket::{generate_slug, Ticket, TicketStore, DEFAULT_TICKET_TYPE};
use crate::tmux::{Multiplexer, TmuxError, PRIMARY_WINDOW_INDEX};
use crate::worktree::{GitWorktrees, Worktree, WorktreeManager};

static TMUX_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

/// What an agent is spawned for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AgentRole {
    /// Works a single ticket in its own window
    #[default]
    TicketAgent,
    /// One per project, in the session's first window
    Architect,
    /// One per user, in the dedicated meta session
    Meta,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::TicketAgent => "ticket_agent",
            AgentRole::Architect => "architect",
            AgentRole::Meta => "meta",
        }
    }

    /// Key of the role session in a `SessionStore`; ticket agents have none
    pub fn session_key(self) -> Option<&'static str> {
        match self {
            AgentRole::TicketAgent => None,
            AgentRole::Architect => Some(ARCHITECT_SESSION_KEY),
            AgentRole::Meta => Some(META_SESSION_KEY),
        }
    }

    fn replaces_system_prompt(self) -> bool {
        !matches!(self, AgentRole::TicketAgent)
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved spawn; nothing here is looked up again from config
#[derive(Debug, Clone, Default)]
pub struct SpawnRequest {
    pub role: AgentRole,
    pub agent: AgentKind,
    /// tmux session the window is created in
    pub group: String,
    pub project_path: Option<PathBuf>,
    pub tickets_dir: Option<PathBuf>,
    pub ticket_id: Option<String>,
    pub ticket: Option<Ticket>,
    pub project_name: Option<String>,
    pub agent_args: Vec<String>,
    /// `extend` base directory, consulted for prompts the project lacks
    pub base_config_path: Option<PathBuf>,
    /// Run a ticket agent in its own git worktree of `project_path`
    pub use_worktree: bool,
}

/// Reattach an agent conversation to a new window
#[derive(Debug, Clone, Default)]
pub struct ResumeRequest {
    pub role: AgentRole,
    pub agent: AgentKind,
    pub group: String,
    pub project_path: Option<PathBuf>,
    pub tickets_dir: Option<PathBuf>,
    pub ticket_id: Option<String>,
    /// Upstream conversation id
    pub resume_id: String,
    pub window: String,
    pub agent_args: Vec<String>,
    /// Directory the window opens in; `project_path` when unset
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnResult {
    pub success: bool,
    pub ticket_id: Option<String>,
    /// Id of the recorded session; `None` for resumes and untracked roles
    pub session_id: Option<String>,
    pub window: String,
    pub window_index: u32,
    pub mcp_config_path: Option<PathBuf>,
    pub settings_path: Option<PathBuf>,
    pub message: String,
}

impl SpawnResult {
    fn failure(ticket_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            ticket_id: ticket_id.map(str::to_string),
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Why a launch stopped after the session was recorded
enum LaunchError {
    /// Reported to the caller as an unsuccessful `SpawnResult`
    Soft(String),
    Hard(SpawnError),
}

struct Launched {
    window_index: u32,
    mcp_config_path: PathBuf,
    settings_path: Option<PathBuf>,
}

struct Prompts {
    kickoff: String,
    system: Option<String>,
}

/// Executes spawn, resume and fresh for a single agent.
///
/// The spawner keeps no state between calls; racing calls for the same
/// ticket must be serialized by the caller.
pub struct Spawner {
    tickets: Arc<dyn TicketStore>,
    sessions: Option<Arc<dyn SessionStore>>,
    mux: Arc<dyn Multiplexer>,
    worktrees: Arc<dyn WorktreeManager>,
    daemon_path: Option<PathBuf>,
    search_path: Option<OsString>,
    artifact_dir: Option<PathBuf>,
}

impl Spawner {
    pub fn new(tickets: Arc<dyn TicketStore>, mux: Arc<dyn Multiplexer>) -> Self {
        Self {
            tickets,
            sessions: None,
            mux,
            worktrees: Arc::new(GitWorktrees::in_home()),
            daemon_path: None,
            search_path: None,
            artifact_dir: None,
        }
    }

    pub fn with_session_store(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Use this `conductor` binary instead of searching for one
    pub fn with_daemon_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.daemon_path = Some(path.into());
        self
    }

    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    pub fn with_worktrees(mut self, worktrees: Arc<dyn WorktreeManager>) -> Self {
        self.worktrees = worktrees;
        self
    }

    /// Search these directories for `conductor` instead of `$PATH`
    pub fn with_search_path(mut self, paths: impl Into<OsString>) -> Self {
        self.search_path = Some(paths.into());
        self
    }

    fn daemon(&self) -> Result<PathBuf, SpawnError> {
        locate_daemon_in(self.daemon_path.as_deref(), self.search_path.as_deref())
    }

    fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Start a new agent session.
    ///
    /// Either the window is running with its session recorded and artifacts
    /// in place, or everything created along the way has been undone.
    pub async fn spawn(&self, req: &SpawnRequest) -> Result<SpawnResult, SpawnError> {
        validate_spawn_request(req)?;

        let ticket_id = req.ticket_id.as_deref();
        if let (AgentRole::TicketAgent, Some(id)) = (req.role, ticket_id) {
            let (current, _) = self.tickets.get(id).await?;
            let state = detect_state(current.session.as_ref(), &req.group, Some(&*self.mux)).await?;
            if state.state == SessionState::Active {
                return Ok(SpawnResult::failure(
                    ticket_id,
                    "ticket already has an active session",
                ));
            }
        }

        let daemon = self.daemon()?;
        let window = window_name(req);
        let conversation_id = req
            .agent
            .assigns_conversation_id()
            .then(|| uuid::Uuid::new_v4().to_string());

        let worktree = self.create_worktree(req, &window).await?;
        let session_id = match self
            .record_session(req, &window, conversation_id.clone(), worktree.clone())
            .await
        {
            Ok(id) => id,
            Err(e) => {
                if let Some(worktree) = &worktree {
                    self.remove_worktree(req, worktree, "rollback").await;
                }
                return Err(e);
            }
        };

        let mut written = Vec::new();
        let launched = self
            .launch(
                req,
                &window,
                &daemon,
                conversation_id.as_deref(),
                worktree.as_ref(),
                &mut written,
            )
            .await;

        match launched {
            Ok(launched) => {
                info!(
                    role = %req.role,
                    agent = %req.agent,
                    ticket_id = ticket_id.unwrap_or_default(),
                    window = %window,
                    index = launched.window_index,
                    "spawned agent"
                );
                Ok(SpawnResult {
                    success: true,
                    ticket_id: ticket_id.map(str::to_string),
                    session_id,
                    message: format!("Agent session spawned in tmux window '{}'", window),
                    window,
                    window_index: launched.window_index,
                    mcp_config_path: Some(launched.mcp_config_path),
                    settings_path: launched.settings_path,
                })
            }
            Err(failure) => {
                self.rollback(req, worktree.as_ref(), &written).await;
                match failure {
                    LaunchError::Soft(message) => {
                        warn!(role = %req.role, window = %window, %message, "spawn rolled back");
                        Ok(SpawnResult::failure(ticket_id, message))
                    }
                    LaunchError::Hard(err) => Err(err),
                }
            }
        }
    }

    /// Reopen a window for an existing agent conversation. No session
    /// record is created.
    pub async fn resume(&self, req: &ResumeRequest) -> Result<SpawnResult, SpawnError> {
        if req.resume_id.trim().is_empty() {
            return Err(SpawnError::config("resume_id", "cannot be empty"));
        }
        validate_group(&req.group)?;
        let ticket_id = req.ticket_id.as_deref().filter(|id| !id.is_empty());
        if req.role == AgentRole::TicketAgent && ticket_id.is_none() {
            return Err(SpawnError::config(
                "ticket_id",
                "cannot be empty for ticket agent resume",
            ));
        }
        if req.window.is_empty() {
            return Err(SpawnError::config("window", "cannot be empty"));
        }

        let daemon = self.daemon()?;
        let dir = self.artifact_dir();
        let id = artifact_id(req.role, ticket_id);

        let mcp = McpConfig::generate(&McpParams {
            daemon: &daemon,
            ticket_id,
            ticket_type: None,
            tickets_dir: req.tickets_dir.as_deref(),
            project_path: req.project_path.as_deref(),
            group: &req.group,
            meta: req.role == AgentRole::Meta,
        });
        let mcp_path = artifacts::write_mcp_config(&dir, id, &mcp)
            .await
            .map_err(|e| SpawnError::io("write MCP config", e))?;
        let mut written = vec![mcp_path.clone()];

        let settings_path = if req.agent.supports_settings() {
            match artifacts::write_settings(&dir, id, &SettingsConfig::with_hooks(&daemon)).await {
                Ok(path) => {
                    written.push(path.clone());
                    Some(path)
                }
                Err(e) => {
                    self.remove_artifacts(&written).await;
                    return Err(SpawnError::io("write settings", e));
                }
            }
        } else {
            None
        };

        let env = match launch_env(req.agent, req.role, id, req.project_path.as_deref(), &mcp, None, None) {
            Ok(env) => env,
            Err(e) => {
                self.remove_artifacts(&written).await;
                return Err(e);
            }
        };
        let spec = LaunchSpec {
            replace_system_prompt: req.role.replaces_system_prompt(),
            mcp_config: Some(&mcp_path),
            settings: settings_path.as_deref(),
            resume_id: Some(req.resume_id.as_str()),
            args: &req.agent_args,
            ..LaunchSpec::default()
        };
        let launcher = LauncherScript {
            env,
            cleanup: written.clone(),
            command: req.agent.command(&spec),
        };
        let launcher_path = match artifacts::write_launcher(&dir, id, &launcher).await {
            Ok(path) => path,
            Err(e) => {
                self.remove_artifacts(&written).await;
                return Err(SpawnError::io("write launcher script", e));
            }
        };
        written.push(launcher_path.clone());

        let command = launch_command(&launcher_path);
        let working_dir = req
            .working_dir
            .as_deref()
            .or(req.project_path.as_deref())
            .unwrap_or(Path::new(""));
        let window_index = match self
            .open_window(req.role, &req.group, &req.window, &command, working_dir)
            .await
        {
            Ok(index) => index,
            Err(e) => {
                self.remove_artifacts(&written).await;
                warn!(role = %req.role, window = %req.window, error = %e, "resume failed");
                return Ok(SpawnResult::failure(
                    ticket_id,
                    format!("failed to spawn agent in tmux: {}", e),
                ));
            }
        };

        info!(role = %req.role, agent = %req.agent, window = %req.window, "resumed agent");
        Ok(SpawnResult {
            success: true,
            ticket_id: ticket_id.map(str::to_string),
            session_id: None,
            window: req.window.clone(),
            window_index,
            mcp_config_path: Some(mcp_path),
            settings_path,
            message: format!("Session resumed in tmux window '{}'", req.window),
        })
    }

    /// End whatever session is recorded and spawn a new one. The previous
    /// session's worktree and branch are removed first.
    pub async fn fresh(&self, req: &SpawnRequest) -> Result<SpawnResult, SpawnError> {
        validate_spawn_request(req)?;
        self.daemon()?;

        match req.role.session_key() {
            None => {
                if let Some(id) = req.ticket_id.as_deref().filter(|id| !id.is_empty()) {
                    match self.tickets.get(id).await {
                        Ok((ticket, _)) if ticket.session.is_some() => {
                            if let Err(e) = self.tickets.end_session(id).await {
                                warn!(ticket_id = id, error = %e, "fresh: failed to end existing session");
                            }
                            if let Some(worktree) =
                                ticket.session.as_ref().and_then(|s| s.worktree.as_ref())
                            {
                                self.remove_worktree(req, worktree, "fresh").await;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!(ticket_id = id, error = %e, "fresh: failed to load ticket"),
                    }
                }
            }
            Some(key) => {
                if let Some(sessions) = &self.sessions {
                    match sessions.get_by_key(key).await {
                        Ok(Some(_)) => {
                            if let Err(e) = sessions.end(key).await {
                                warn!(key, error = %e, "fresh: failed to end existing session");
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!(key, error = %e, "fresh: failed to load session"),
                    }
                }
            }
        }

        self.spawn(req).await
    }

    async fn record_session(
        &self,
        req: &SpawnRequest,
        window: &str,
        resume_id: Option<String>,
        worktree: Option<Worktree>,
    ) -> Result<Option<String>, SpawnError> {
        let agent = req.agent.as_str();
        match (req.role.session_key(), req.ticket_id.as_deref()) {
            (None, Some(id)) => {
                let session = self
                    .tickets
                    .set_session(id, agent, window, resume_id, worktree)
                    .await?;
                Ok(Some(session.id))
            }
            (Some(key), _) => match &self.sessions {
                Some(sessions) => {
                    let session = sessions.create(key, agent, window, resume_id).await?;
                    Ok(Some(session.id))
                }
                None => Ok(None),
            },
            (None, None) => Ok(None),
        }
    }

    /// Check out the ticket's worktree when the request asks for one
    async fn create_worktree(
        &self,
        req: &SpawnRequest,
        window: &str,
    ) -> Result<Option<Worktree>, SpawnError> {
        if !req.use_worktree || req.role != AgentRole::TicketAgent {
            return Ok(None);
        }
        let Some(project) = req.project_path.as_deref() else {
            return Ok(None);
        };
        let name = uuid::Uuid::new_v4().to_string();
        let worktree = self.worktrees.create(project, &name, window).await?;
        info!(
            ticket_id = req.ticket_id.as_deref().unwrap_or_default(),
            path = %worktree.path.display(),
            branch = %worktree.branch,
            "created worktree"
        );
        Ok(Some(worktree))
    }

    async fn remove_worktree(&self, req: &SpawnRequest, worktree: &Worktree, during: &str) {
        let Some(project) = req.project_path.as_deref() else {
            warn!(path = %worktree.path.display(), during, "no project path to remove worktree from");
            return;
        };
        if let Err(e) = self.worktrees.remove(project, worktree).await {
            warn!(path = %worktree.path.display(), during, error = %e, "failed to remove worktree");
        }
    }

    /// Write the artifacts and open the window. Every file written is
    /// pushed onto `written` as soon as it exists.
    async fn launch(
        &self,
        req: &SpawnRequest,
        window: &str,
        daemon: &Path,
        conversation_id: Option<&str>,
        worktree: Option<&Worktree>,
        written: &mut Vec<PathBuf>,
    ) -> Result<Launched, LaunchError> {
        let dir = self.artifact_dir();
        let ticket_id = req.ticket_id.as_deref();
        let id = artifact_id(req.role, ticket_id);
        let hard = |context: &str, e: std::io::Error| LaunchError::Hard(SpawnError::io(context, e));

        let mcp = McpConfig::generate(&McpParams {
            daemon,
            ticket_id: ticket_id.filter(|_| req.role == AgentRole::TicketAgent),
            ticket_type: req.ticket.as_ref().map(Ticket::effective_type),
            tickets_dir: req.tickets_dir.as_deref(),
            project_path: req.project_path.as_deref(),
            group: &req.group,
            meta: req.role == AgentRole::Meta,
        });
        let mcp_config_path = artifacts::write_mcp_config(&dir, id, &mcp)
            .await
            .map_err(|e| hard("write MCP config", e))?;
        written.push(mcp_config_path.clone());

        let settings_path = if req.agent.supports_settings() {
            let path = artifacts::write_settings(&dir, id, &SettingsConfig::with_hooks(daemon))
                .await
                .map_err(|e| hard("write settings", e))?;
            written.push(path.clone());
            Some(path)
        } else {
            None
        };

        let prompts = build_prompts(req, window, worktree)
            .await
            .map_err(|e| LaunchError::Soft(format!("failed to load {} prompt: {}", req.role, e)))?;

        let prompt_path = artifacts::write_prompt_file(&dir, id, "prompt", &prompts.kickoff)
            .await
            .map_err(|e| hard("write prompt file", e))?;
        written.push(prompt_path.clone());

        let system_path = match &prompts.system {
            Some(system) => {
                let path = artifacts::write_prompt_file(&dir, id, "sysprompt", system)
                    .await
                    .map_err(|e| hard("write system prompt file", e))?;
                written.push(path.clone());
                Some(path)
            }
            None => None,
        };

        let env = launch_env(
            req.agent,
            req.role,
            id,
            req.project_path.as_deref(),
            &mcp,
            prompts.system.as_deref(),
            system_path.as_deref(),
        )
        .map_err(LaunchError::Hard)?;

        let spec = LaunchSpec {
            prompt_file: Some(&prompt_path),
            system_prompt_file: system_path.as_deref(),
            replace_system_prompt: req.role.replaces_system_prompt(),
            mcp_config: Some(&mcp_config_path),
            settings: settings_path.as_deref(),
            resume_id: None,
            session_id: conversation_id,
            args: &req.agent_args,
        };
        let launcher = LauncherScript {
            env,
            cleanup: written.clone(),
            command: req.agent.command(&spec),
        };
        let launcher_path = artifacts::write_launcher(&dir, id, &launcher)
            .await
            .map_err(|e| hard("write launcher script", e))?;
        written.push(launcher_path.clone());
        debug!(launcher = %launcher_path.display(), "wrote launcher");

        let command = launch_command(&launcher_path);
        let working_dir = worktree
            .map(|w| w.path.as_path())
            .or(req.project_path.as_deref())
            .unwrap_or(Path::new(""));
        let window_index = self
            .open_window(req.role, &req.group, window, &command, working_dir)
            .await
            .map_err(|e| LaunchError::Soft(format!("failed to spawn agent in tmux: {}", e)))?;

        Ok(Launched {
            window_index,
            mcp_config_path,
            settings_path,
        })
    }

    async fn open_window(
        &self,
        role: AgentRole,
        group: &str,
        window: &str,
        command: &str,
        working_dir: &Path,
    ) -> Result<u32, TmuxError> {
        match role {
            AgentRole::TicketAgent => {
                self.mux
                    .spawn_agent(group, window, command, working_dir)
                    .await
            }
            AgentRole::Architect | AgentRole::Meta => {
                self.mux
                    .spawn_primary_window(group, window, command, working_dir)
                    .await?;
                Ok(PRIMARY_WINDOW_INDEX)
            }
        }
    }

    /// Undo a partial spawn. Failures are logged; the original error wins.
    async fn rollback(
        &self,
        req: &SpawnRequest,
        worktree: Option<&Worktree>,
        written: &[PathBuf],
    ) {
        match (req.role.session_key(), req.ticket_id.as_deref()) {
            (None, Some(id)) => {
                if let Err(e) = self.tickets.end_session(id).await {
                    warn!(ticket_id = id, error = %e, "rollback: failed to end session");
                }
            }
            (Some(key), _) => {
                if let Some(sessions) = &self.sessions {
                    if let Err(e) = sessions.end(key).await {
                        warn!(key, error = %e, "rollback: failed to end session");
                    }
                }
            }
            (None, None) => {}
        }
        self.remove_artifacts(written).await;
        if let Some(worktree) = worktree {
            self.remove_worktree(req, worktree, "rollback").await;
        }
    }

    async fn remove_artifacts(&self, paths: &[PathBuf]) {
        for path in paths {
            if let Err(e) = artifacts::remove_artifact(path).await {
                warn!(path = %path.display(), error = %e, "failed to remove artifact");
            }
        }
    }
}

/// Check that `name` can be used as a tmux session or window name
pub fn validate_tmux_name(name: &str) -> Result<(), String> {
    if name.len() > 128 {
        return Err("exceeds maximum length of 128 characters".to_string());
    }
    if name.starts_with('-') {
        return Err("cannot start with a hyphen".to_string());
    }
    if name.contains([':', '.']) {
        return Err("cannot contain colons or periods".to_string());
    }
    if !TMUX_NAME.is_match(name) {
        return Err("must contain only letters, digits, underscores and hyphens".to_string());
    }
    Ok(())
}

fn validate_group(group: &str) -> Result<(), SpawnError> {
    if group.is_empty() {
        return Err(SpawnError::config("session_group", "cannot be empty"));
    }
    validate_tmux_name(group).map_err(|message| SpawnError::config("session_group", message))
}

fn validate_spawn_request(req: &SpawnRequest) -> Result<(), SpawnError> {
    validate_group(&req.group)?;

    if let Some(path) = &req.project_path {
        if !path.exists() {
            return Err(SpawnError::config(
                "project_path",
                format!("directory does not exist: {}", path.display()),
            ));
        }
    }

    match req.role {
        AgentRole::TicketAgent => {
            if req.ticket_id.as_deref().unwrap_or_default().is_empty() {
                return Err(SpawnError::config(
                    "ticket_id",
                    "cannot be empty for ticket agent",
                ));
            }
            if req.ticket.is_none() {
                return Err(SpawnError::config(
                    "ticket",
                    "cannot be missing for ticket agent",
                ));
            }
            if req.use_worktree && req.project_path.is_none() {
                return Err(SpawnError::config(
                    "project_path",
                    "required to create a worktree",
                ));
            }
        }
        AgentRole::Architect => {
            if req.project_name.as_deref().unwrap_or_default().is_empty() {
                return Err(SpawnError::config(
                    "project_name",
                    "cannot be empty for architect",
                ));
            }
        }
        AgentRole::Meta => {}
    }
    Ok(())
}

/// Window names are derived, never stored in the request
fn window_name(req: &SpawnRequest) -> String {
    match (req.role, &req.ticket) {
        (AgentRole::TicketAgent, Some(ticket)) => generate_slug(&ticket.title),
        (AgentRole::TicketAgent, None) => "ticket".to_string(),
        (role, _) => role.as_str().to_string(),
    }
}

/// Suffix of artifact file names, also exported as `CONDUCTOR_TICKET_ID`
fn artifact_id(role: AgentRole, ticket_id: Option<&str>) -> &str {
    match (role.session_key(), ticket_id) {
        (Some(key), _) => key,
        (None, Some(id)) => id,
        (None, None) => "ticket",
    }
}

fn launch_command(launcher: &Path) -> String {
    format!("bash {}", shell_quote(&launcher.to_string_lossy()))
}

fn launch_env(
    agent: AgentKind,
    role: AgentRole,
    id: &str,
    project_path: Option<&Path>,
    mcp: &McpConfig,
    system_prompt: Option<&str>,
    system_prompt_file: Option<&Path>,
) -> Result<Vec<(String, String)>, SpawnError> {
    let mut env = vec![("CONDUCTOR_TICKET_ID".to_string(), id.to_string())];
    if let Some(project) = project_path {
        env.push((
            "CONDUCTOR_PROJECT".to_string(),
            project.to_string_lossy().to_string(),
        ));
    }
    if agent == AgentKind::OpenCode {
        let content = opencode_config_content(
            mcp,
            system_prompt,
            system_prompt_file,
            role.replaces_system_prompt(),
        )
        .map_err(|e| SpawnError::io("encode OpenCode config", std::io::Error::other(e)))?;
        env.push(("OPENCODE_CONFIG_CONTENT".to_string(), content));
    }
    Ok(env)
}

async fn build_prompts(
    req: &SpawnRequest,
    window: &str,
    worktree: Option<&Worktree>,
) -> Result<Prompts, PromptError> {
    let resolver = PromptResolver::new(
        req.project_path.as_deref(),
        req.base_config_path.as_deref(),
    );

    let path_str = |p: &Option<PathBuf>| {
        p.as_ref()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default()
    };
    let mut vars: BTreeMap<&str, String> = BTreeMap::new();
    vars.insert("project_path", path_str(&req.project_path));
    vars.insert("tickets_dir", path_str(&req.tickets_dir));
    vars.insert("session_group", req.group.clone());
    vars.insert(
        "current_date",
        Local::now().format("%Y-%m-%d %H:%M %Z").to_string(),
    );
    vars.insert(
        "project_name",
        req.project_name.clone().unwrap_or_default(),
    );

    let role = match req.role {
        AgentRole::TicketAgent => {
            let ticket_type = req
                .ticket
                .as_ref()
                .map(Ticket::effective_type)
                .unwrap_or(DEFAULT_TICKET_TYPE);
            if let Some(ticket) = &req.ticket {
                vars.insert("ticket_title", ticket.title.clone());
                vars.insert("ticket_body", ticket.body.clone());
            }
            vars.insert("ticket_id", req.ticket_id.clone().unwrap_or_default());
            vars.insert("ticket_type", ticket_type.to_string());
            vars.insert("slug", window.to_string());
            vars.insert(
                "worktree_path",
                worktree
                    .map(|w| w.path.to_string_lossy().to_string())
                    .unwrap_or_default(),
            );
            vars.insert(
                "worktree_branch",
                worktree.map(|w| w.branch.clone()).unwrap_or_default(),
            );
            PromptRole::Ticket(ticket_type)
        }
        AgentRole::Architect => PromptRole::Architect,
        AgentRole::Meta => PromptRole::Meta,
    };

    let system = resolver.resolve(role, Stage::System).await?;
    let system = prompt::render(&system, &vars)?;
    let kickoff = resolver.resolve(role, Stage::Kickoff).await?;
    let kickoff = prompt::render(&kickoff, &vars)?;

    Ok(Prompts {
        kickoff,
        system: Some(system).filter(|s| !s.trim().is_empty()),
    })
}
