use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::spawner::{AgentRole, ResumeRequest, SpawnRequest, SpawnResult, Spawner};
use super::state::{detect_state, SessionState, StateInfo};
use super::{AgentKind, SpawnError};
use crate::config::{ProjectConfig, RoleConfig, PROJECT_DIR};
use crate::locks::KeyedLocks;
use crate::session::{FileSessionStore, SessionStore};
use crate::ticket::{Ticket, TicketStatus, TicketStore};
use crate::tmux::Multiplexer;
use crate::worktree::WorktreeManager;

/// tmux session hosting the meta agent
pub const META_SESSION_GROUP: &str = "conductor-meta";

/// What the caller wants done with a ticket's agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Spawn unless an agent is already running
    #[default]
    Normal,
    /// Reattach an orphaned agent's conversation
    Resume,
    /// Discard the previous session and start over
    Fresh,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::Resume => "resume",
            Mode::Fresh => "fresh",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = SpawnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "normal" => Ok(Mode::Normal),
            "resume" => Ok(Mode::Resume),
            "fresh" => Ok(Mode::Fresh),
            _ => Err(SpawnError::config(
                "mode",
                "must be 'normal', 'resume', or 'fresh'",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Spawned,
    Resumed,
    AlreadyActive,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Spawned => "spawned",
            Outcome::Resumed => "resumed",
            Outcome::AlreadyActive => "already_active",
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrchestrateRequest {
    pub ticket_id: String,
    pub mode: Mode,
    /// Agent program; falls back to the ticket type's config, then claude
    pub agent: Option<String>,
    pub project_path: PathBuf,
    /// tmux session; falls back to the config `name`
    pub session_group: Option<String>,
    /// Defaults to `<project>/.conductor/tickets`
    pub tickets_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct OrchestrateResult {
    pub outcome: Outcome,
    pub ticket: Ticket,
    pub ticket_status: TicketStatus,
    /// `None` when the outcome is `AlreadyActive`
    pub spawn_result: Option<SpawnResult>,
    pub state: StateInfo,
    pub session_group: String,
}

/// Orchestrate an architect or meta agent
#[derive(Debug, Clone, Default)]
pub struct RoleRequest {
    pub role: AgentRole,
    pub mode: Mode,
    pub agent: Option<String>,
    /// Required for the architect; the meta agent starts here when given
    pub project_path: Option<PathBuf>,
    pub session_group: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RoleResult {
    pub outcome: Outcome,
    pub role: AgentRole,
    pub spawn_result: Option<SpawnResult>,
    pub state: StateInfo,
    pub session_group: String,
}

/// Transition chosen by the state×mode matrix
#[derive(Debug, Clone, PartialEq, Eq)]
enum Decision {
    Spawn,
    Resume(String),
    Fresh,
    AlreadyActive,
}

fn decide(subject: &str, state: &StateInfo, mode: Mode) -> Result<Decision, SpawnError> {
    let reject = |message: &str| -> Result<Decision, SpawnError> {
        Err(SpawnError::state(subject, state.state, message))
    };

    match (state.state, mode) {
        (SessionState::Normal | SessionState::Ended, Mode::Normal) => Ok(Decision::Spawn),
        (SessionState::Active, Mode::Normal) => Ok(Decision::AlreadyActive),
        (SessionState::Orphaned, Mode::Normal) => {
            reject("session is orphaned; use mode 'resume' or 'fresh'")
        }

        (SessionState::Normal, Mode::Resume) => reject("no session to resume"),
        (SessionState::Active, Mode::Resume | Mode::Fresh) => {
            reject("session is active; wait for it to finish or close the window")
        }
        (SessionState::Orphaned, Mode::Resume) => match state.resume_id() {
            Some(id) => Ok(Decision::Resume(id.to_string())),
            None => reject("session has no resume id; use mode 'fresh'"),
        },
        (SessionState::Ended, Mode::Resume) => reject("session has ended; use mode 'fresh'"),

        (SessionState::Normal, Mode::Fresh) => reject("no session to clear"),
        (SessionState::Orphaned | SessionState::Ended, Mode::Fresh) => Ok(Decision::Fresh),
    }
}

/// Single entry point front ends use to start agents.
///
/// Attempts on the same ticket (or role) are serialized from state
/// detection until the session is recorded, so concurrent callers cannot
/// both observe `Normal` and spawn twice.
pub struct Orchestrator {
    tickets: Arc<dyn TicketStore>,
    mux: Arc<dyn Multiplexer>,
    architect_sessions: Option<Arc<dyn SessionStore>>,
    meta_sessions: Option<Arc<dyn SessionStore>>,
    worktrees: Option<Arc<dyn WorktreeManager>>,
    daemon_path: Option<PathBuf>,
    artifact_dir: Option<PathBuf>,
    locks: KeyedLocks,
}

impl Orchestrator {
    pub fn new(tickets: Arc<dyn TicketStore>, mux: Arc<dyn Multiplexer>) -> Self {
        Self {
            tickets,
            mux,
            architect_sessions: None,
            meta_sessions: None,
            worktrees: None,
            daemon_path: None,
            artifact_dir: None,
            locks: KeyedLocks::new(),
        }
    }

    /// Session store for a role. Without one the architect uses the
    /// project's `sessions.json` and meta the user-wide file.
    pub fn with_session_store(mut self, role: AgentRole, sessions: Arc<dyn SessionStore>) -> Self {
        match role {
            AgentRole::Architect => self.architect_sessions = Some(sessions),
            AgentRole::Meta => self.meta_sessions = Some(sessions),
            AgentRole::TicketAgent => {}
        }
        self
    }

    /// Manager for ticket worktrees; `~/.conductor/worktrees` via git otherwise
    pub fn with_worktrees(mut self, worktrees: Arc<dyn WorktreeManager>) -> Self {
        self.worktrees = Some(worktrees);
        self
    }

    pub fn with_daemon_path(mut self, path: Option<PathBuf>) -> Self {
        self.daemon_path = path;
        self
    }

    pub fn with_artifact_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.artifact_dir = dir;
        self
    }

    fn spawner(&self, sessions: Option<Arc<dyn SessionStore>>) -> Spawner {
        let mut spawner = Spawner::new(self.tickets.clone(), self.mux.clone());
        if let Some(sessions) = sessions {
            spawner = spawner.with_session_store(sessions);
        }
        if let Some(path) = &self.daemon_path {
            spawner = spawner.with_daemon_path(path.clone());
        }
        if let Some(dir) = &self.artifact_dir {
            spawner = spawner.with_artifact_dir(dir.clone());
        }
        if let Some(worktrees) = &self.worktrees {
            spawner = spawner.with_worktrees(worktrees.clone());
        }
        spawner
    }

    pub async fn orchestrate(
        &self,
        req: &OrchestrateRequest,
    ) -> Result<OrchestrateResult, SpawnError> {
        let config = load_config(&req.project_path)?;

        let _guard = self.locks.lock(&req.ticket_id).await;
        let (ticket, status) = self.tickets.get(&req.ticket_id).await?;

        let ticket_type = ticket.effective_type().to_string();
        let role_config = config
            .ticket_role(&ticket_type)
            .map_err(|e| SpawnError::config(format!("ticket.{}", ticket_type), e.to_string()))?;
        let agent = resolve_agent(req.agent.as_deref(), role_config)?;
        let group = resolve_group(req.session_group.as_deref(), &config.name)?;
        let tickets_dir = req
            .tickets_dir
            .clone()
            .unwrap_or_else(|| req.project_path.join(PROJECT_DIR).join("tickets"));

        let state = detect_state(ticket.session.as_ref(), &group, Some(&*self.mux)).await?;
        let decision = decide(&req.ticket_id, &state, req.mode)?;
        debug!(
            ticket_id = %req.ticket_id,
            state = %state.state,
            mode = %req.mode,
            ?decision,
            "orchestrating"
        );

        let spawner = self.spawner(None);
        let (outcome, result) = match decision {
            Decision::AlreadyActive => {
                return Ok(OrchestrateResult {
                    outcome: Outcome::AlreadyActive,
                    ticket,
                    ticket_status: status,
                    spawn_result: None,
                    state,
                    session_group: group,
                });
            }
            Decision::Resume(resume_id) => {
                let session = state.session.as_ref();
                let window = session.map(|s| s.window.clone()).unwrap_or_default();
                let working_dir = session
                    .and_then(|s| s.worktree.as_ref())
                    .map(|w| w.path.clone());
                let resume = ResumeRequest {
                    role: AgentRole::TicketAgent,
                    agent,
                    group: group.clone(),
                    project_path: Some(req.project_path.clone()),
                    tickets_dir: Some(tickets_dir),
                    ticket_id: Some(req.ticket_id.clone()),
                    resume_id,
                    window,
                    agent_args: role_config.args.clone(),
                    working_dir,
                };
                (Outcome::Resumed, spawner.resume(&resume).await?)
            }
            Decision::Spawn | Decision::Fresh => {
                let spawn = SpawnRequest {
                    role: AgentRole::TicketAgent,
                    agent,
                    group: group.clone(),
                    project_path: Some(req.project_path.clone()),
                    tickets_dir: Some(tickets_dir),
                    ticket_id: Some(req.ticket_id.clone()),
                    ticket: Some(ticket),
                    project_name: Some(config.name.clone()).filter(|n| !n.is_empty()),
                    agent_args: role_config.args.clone(),
                    base_config_path: config.resolved_extend_path().map(Path::to_path_buf),
                    use_worktree: config.git.worktrees,
                };
                let result = if decision == Decision::Fresh {
                    spawner.fresh(&spawn).await?
                } else {
                    spawner.spawn(&spawn).await?
                };
                (Outcome::Spawned, result)
            }
        };

        if !result.success {
            return Err(SpawnError::Failed(result.message));
        }

        if status == TicketStatus::Backlog {
            if let Err(e) = self
                .tickets
                .move_to(&req.ticket_id, TicketStatus::Progress)
                .await
            {
                warn!(ticket_id = %req.ticket_id, error = %e, "failed to move ticket to progress");
            }
        }

        let (ticket, ticket_status) = self.tickets.get(&req.ticket_id).await?;
        info!(ticket_id = %req.ticket_id, %outcome, window = %result.window, "orchestrated ticket agent");

        Ok(OrchestrateResult {
            outcome,
            ticket,
            ticket_status,
            spawn_result: Some(result),
            state,
            session_group: group,
        })
    }

    /// Apply the same matrix to the architect or meta agent
    pub async fn orchestrate_role(&self, req: &RoleRequest) -> Result<RoleResult, SpawnError> {
        let (sessions, group, agent, args, project_name, base) = match req.role {
            AgentRole::Architect => {
                let project = req
                    .project_path
                    .as_deref()
                    .ok_or_else(|| SpawnError::config("project_path", "required for architect"))?;
                let config = load_config(project)?;
                let sessions = self
                    .architect_sessions
                    .clone()
                    .unwrap_or_else(|| Arc::new(FileSessionStore::for_project(project)));
                let group = resolve_group(req.session_group.as_deref(), &config.name)?;
                let agent = resolve_agent(req.agent.as_deref(), &config.architect)?;
                let name = if config.name.is_empty() {
                    project
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default()
                } else {
                    config.name.clone()
                };
                (
                    sessions,
                    group,
                    agent,
                    config.architect.args.clone(),
                    Some(name),
                    config.resolved_extend_path().map(Path::to_path_buf),
                )
            }
            AgentRole::Meta => {
                let sessions = self
                    .meta_sessions
                    .clone()
                    .unwrap_or_else(|| Arc::new(FileSessionStore::for_user()));
                let group = resolve_group(req.session_group.as_deref(), META_SESSION_GROUP)?;
                let agent = resolve_agent(req.agent.as_deref(), &RoleConfig::default())?;
                (sessions, group, agent, Vec::new(), None, None)
            }
            AgentRole::TicketAgent => {
                return Err(SpawnError::config(
                    "role",
                    "ticket agents are orchestrated per ticket",
                ))
            }
        };

        let key = req.role.session_key().unwrap_or_default();
        let _guard = self.locks.lock(&format!("{}:{}", key, group)).await;

        let session = sessions.get_by_key(key).await?;
        let state = detect_state(session.as_ref(), &group, Some(&*self.mux)).await?;
        let decision = decide(key, &state, req.mode)?;
        debug!(role = %req.role, state = %state.state, mode = %req.mode, ?decision, "orchestrating role");

        let spawner = self.spawner(Some(sessions));
        let (outcome, result) = match decision {
            Decision::AlreadyActive => {
                return Ok(RoleResult {
                    outcome: Outcome::AlreadyActive,
                    role: req.role,
                    spawn_result: None,
                    state,
                    session_group: group,
                });
            }
            Decision::Resume(resume_id) => {
                let resume = ResumeRequest {
                    role: req.role,
                    agent,
                    group: group.clone(),
                    project_path: req.project_path.clone(),
                    resume_id,
                    window: req.role.as_str().to_string(),
                    agent_args: args,
                    ..ResumeRequest::default()
                };
                (Outcome::Resumed, spawner.resume(&resume).await?)
            }
            Decision::Spawn | Decision::Fresh => {
                let spawn = SpawnRequest {
                    role: req.role,
                    agent,
                    group: group.clone(),
                    project_path: req.project_path.clone(),
                    tickets_dir: req
                        .project_path
                        .as_ref()
                        .filter(|_| req.role == AgentRole::Architect)
                        .map(|p| p.join(PROJECT_DIR).join("tickets")),
                    project_name,
                    agent_args: args,
                    base_config_path: base,
                    ..SpawnRequest::default()
                };
                let result = if decision == Decision::Fresh {
                    spawner.fresh(&spawn).await?
                } else {
                    spawner.spawn(&spawn).await?
                };
                (Outcome::Spawned, result)
            }
        };

        if !result.success {
            return Err(SpawnError::Failed(result.message));
        }
        info!(role = %req.role, %outcome, group = %group, "orchestrated role agent");

        Ok(RoleResult {
            outcome,
            role: req.role,
            spawn_result: Some(result),
            state,
            session_group: group,
        })
    }
}

fn load_config(project_path: &Path) -> Result<ProjectConfig, SpawnError> {
    ProjectConfig::load(project_path).map_err(|e| SpawnError::config("project_path", e.to_string()))
}

/// Request override, then role config, then claude
fn resolve_agent(requested: Option<&str>, role: &RoleConfig) -> Result<AgentKind, SpawnError> {
    let name = requested
        .filter(|a| !a.is_empty())
        .or(Some(role.agent.as_str()).filter(|a| !a.is_empty()));
    match name {
        Some(name) => name
            .parse::<AgentKind>()
            .map_err(|message| SpawnError::config("agent", message)),
        None => Ok(AgentKind::Claude),
    }
}

fn resolve_group(requested: Option<&str>, configured: &str) -> Result<String, SpawnError> {
    let group = requested.filter(|g| !g.is_empty()).unwrap_or(configured);
    if group.is_empty() {
        return Err(SpawnError::config(
            "session_group",
            "no tmux session given and none configured (set `name` in conductor.yaml)",
        ));
    }
    Ok(group.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ARCHITECT_SESSION_KEY, META_SESSION_KEY};
    use crate::spawn::test_support::{FakeMux, FakeSessionStore, FakeTicketStore, FakeWorktrees};
    use crate::ticket::Session;
    use crate::worktree::Worktree;
    use chrono::Utc;
    use tempfile::TempDir;

    struct Fixture {
        store: Arc<FakeTicketStore>,
        mux: Arc<FakeMux>,
        sessions: Arc<FakeSessionStore>,
        worktrees: Arc<FakeWorktrees>,
        project: TempDir,
        artifacts: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let fx = Self {
                store: Arc::new(FakeTicketStore::new()),
                mux: Arc::new(FakeMux::new()),
                sessions: Arc::new(FakeSessionStore::new()),
                worktrees: Arc::new(FakeWorktrees::new()),
                project: tempfile::tempdir().unwrap(),
                artifacts: tempfile::tempdir().unwrap(),
            };
            let dir = fx.project.path().join(PROJECT_DIR);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("conductor.yaml"), "name: proj\n").unwrap();
            fx
        }

        fn orchestrator(&self) -> Orchestrator {
            Orchestrator::new(self.store.clone(), self.mux.clone())
                .with_session_store(AgentRole::Architect, self.sessions.clone())
                .with_session_store(AgentRole::Meta, self.sessions.clone())
                .with_daemon_path(Some(PathBuf::from("/usr/local/bin/conductor")))
                .with_artifact_dir(Some(self.artifacts.path().to_path_buf()))
                .with_worktrees(self.worktrees.clone())
        }

        fn request(&self, id: &str, mode: Mode) -> OrchestrateRequest {
            OrchestrateRequest {
                ticket_id: id.to_string(),
                mode,
                project_path: self.project.path().to_path_buf(),
                ..OrchestrateRequest::default()
            }
        }

        /// Put ticket `T1` into `state`
        fn ticket_in(&self, state: SessionState) {
            self.store
                .add_ticket("T1", "Test Ticket", TicketStatus::Backlog);
            let session = Session::new("T1", "claude", "test-ticket", Some("conv-1".to_string()));
            match state {
                SessionState::Normal => {}
                SessionState::Active => {
                    self.store.attach_session("T1", session);
                    self.mux.add_window("proj", "test-ticket");
                }
                SessionState::Orphaned => self.store.attach_session("T1", session),
                SessionState::Ended => {
                    let mut ended = session;
                    ended.ended_at = Some(Utc::now());
                    self.store.attach_session("T1", ended);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_state_mode_matrix() {
        use Mode::{Fresh, Normal, Resume};
        use SessionState::{Active, Ended, Orphaned};

        let cases: [(SessionState, Mode, Option<Outcome>); 12] = [
            (SessionState::Normal, Normal, Some(Outcome::Spawned)),
            (SessionState::Normal, Resume, None),
            (SessionState::Normal, Fresh, None),
            (Active, Normal, Some(Outcome::AlreadyActive)),
            (Active, Resume, None),
            (Active, Fresh, None),
            (Orphaned, Normal, None),
            (Orphaned, Resume, Some(Outcome::Resumed)),
            (Orphaned, Fresh, Some(Outcome::Spawned)),
            (Ended, Normal, Some(Outcome::Spawned)),
            (Ended, Resume, None),
            (Ended, Fresh, Some(Outcome::Spawned)),
        ];

        for (state, mode, expected) in cases {
            let fx = Fixture::new();
            fx.ticket_in(state);
            let result = fx.orchestrator().orchestrate(&fx.request("T1", mode)).await;

            match expected {
                Some(outcome) => {
                    let result = result.unwrap_or_else(|e| panic!("{} / {}: {}", state, mode, e));
                    assert_eq!(result.outcome, outcome, "{} / {}", state, mode);
                    assert_eq!(result.state.state, state);
                    assert_eq!(result.session_group, "proj");
                }
                None => {
                    let err = result.unwrap_err();
                    assert!(err.is_state_error(), "{} / {}: {}", state, mode, err);
                    assert_eq!(fx.mux.spawn_count(), 0, "{} / {}", state, mode);
                    assert_eq!(fx.store.set_session_count(), 0);
                    assert_eq!(fx.store.end_session_count(), 0);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_already_active_has_no_side_effects() {
        let fx = Fixture::new();
        fx.ticket_in(SessionState::Active);

        let result = fx
            .orchestrator()
            .orchestrate(&fx.request("T1", Mode::Normal))
            .await
            .unwrap();

        assert_eq!(result.outcome, Outcome::AlreadyActive);
        assert!(result.spawn_result.is_none());
        assert_eq!(result.ticket_status, TicketStatus::Backlog);
        assert_eq!(fx.mux.spawn_count(), 0);
        assert_eq!(fx.store.move_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_spawns_do_not_double_spawn() {
        let fx = Fixture::new();
        fx.ticket_in(SessionState::Normal);
        let orchestrator = fx.orchestrator();
        let req = fx.request("T1", Mode::Normal);

        let (a, b) = tokio::join!(orchestrator.orchestrate(&req), orchestrator.orchestrate(&req));
        let mut outcomes = vec![a.unwrap().outcome, b.unwrap().outcome];
        outcomes.sort_by_key(|o| o.to_string());

        assert_eq!(outcomes, vec![Outcome::AlreadyActive, Outcome::Spawned]);
        assert_eq!(fx.mux.spawn_count(), 1);
        assert_eq!(fx.store.set_session_count(), 1);
    }

    #[tokio::test]
    async fn test_spawn_moves_backlog_to_progress() {
        let fx = Fixture::new();
        fx.ticket_in(SessionState::Normal);

        let result = fx
            .orchestrator()
            .orchestrate(&fx.request("T1", Mode::Normal))
            .await
            .unwrap();

        assert_eq!(result.ticket_status, TicketStatus::Progress);
        assert!(result.ticket.has_active_session());
        let spawn = result.spawn_result.unwrap();
        assert_eq!(spawn.window, "test-ticket");
        assert_eq!(
            result.ticket.session.map(|s| s.id),
            spawn.session_id
        );
    }

    #[tokio::test]
    async fn test_no_move_outside_backlog() {
        let fx = Fixture::new();
        fx.store
            .add_ticket("T1", "Test Ticket", TicketStatus::Review);

        let result = fx
            .orchestrator()
            .orchestrate(&fx.request("T1", Mode::Normal))
            .await
            .unwrap();

        assert_eq!(result.ticket_status, TicketStatus::Review);
        assert_eq!(fx.store.move_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_move_is_not_an_error() {
        let fx = Fixture::new();
        fx.ticket_in(SessionState::Normal);
        fx.store.fail_moves();

        let result = fx
            .orchestrator()
            .orchestrate(&fx.request("T1", Mode::Normal))
            .await
            .unwrap();

        assert_eq!(result.outcome, Outcome::Spawned);
        assert_eq!(result.ticket_status, TicketStatus::Backlog);
        assert_eq!(fx.store.move_count(), 1);
    }

    #[tokio::test]
    async fn test_spawn_failure_surfaces_as_failed() {
        let fx = Fixture::new();
        fx.ticket_in(SessionState::Normal);
        fx.mux.fail_spawn();

        let err = fx
            .orchestrator()
            .orchestrate(&fx.request("T1", Mode::Normal))
            .await
            .unwrap_err();

        assert!(matches!(err, SpawnError::Failed(ref m) if m.contains("tmux")));
        assert_eq!(fx.store.move_count(), 0);
        assert_eq!(std::fs::read_dir(fx.artifacts.path()).unwrap().count(), 0);
        assert!(!fx.store.snapshot("T1").0.has_active_session());
    }

    #[tokio::test]
    async fn test_fresh_replaces_orphaned_session() {
        let fx = Fixture::new();
        fx.ticket_in(SessionState::Orphaned);
        let old_id = fx.store.snapshot("T1").0.session.unwrap().id;

        let result = fx
            .orchestrator()
            .orchestrate(&fx.request("T1", Mode::Fresh))
            .await
            .unwrap();

        assert_eq!(fx.store.end_session_count(), 1);
        let session = result.ticket.session.unwrap();
        assert_ne!(session.id, old_id);
        assert!(session.is_active());
    }

    #[tokio::test]
    async fn test_worktree_config_reaches_spawn() {
        let fx = Fixture::new();
        std::fs::write(
            fx.project.path().join(PROJECT_DIR).join("conductor.yaml"),
            "name: proj\ngit:\n  worktrees: true\n",
        )
        .unwrap();
        fx.ticket_in(SessionState::Normal);

        let result = fx
            .orchestrator()
            .orchestrate(&fx.request("T1", Mode::Normal))
            .await
            .unwrap();

        let worktree = result.ticket.session.unwrap().worktree.unwrap();
        assert_eq!(worktree.branch, "ticket/test-ticket");
        assert_eq!(fx.mux.last_working_dir(), Some(worktree.path));
        assert_eq!(fx.worktrees.live_count(), 1);
    }

    #[tokio::test]
    async fn test_resume_reopens_in_worktree() {
        let fx = Fixture::new();
        fx.store
            .add_ticket("T1", "Test Ticket", TicketStatus::Progress);
        let mut session = Session::new("T1", "claude", "test-ticket", Some("conv-1".to_string()));
        session.worktree = Some(Worktree {
            path: PathBuf::from("/worktrees/abc"),
            branch: "ticket/test-ticket".to_string(),
        });
        fx.store.attach_session("T1", session);

        let result = fx
            .orchestrator()
            .orchestrate(&fx.request("T1", Mode::Resume))
            .await
            .unwrap();

        assert_eq!(result.outcome, Outcome::Resumed);
        assert_eq!(fx.mux.last_working_dir(), Some(PathBuf::from("/worktrees/abc")));
        assert_eq!(fx.worktrees.live_count(), 0);
    }

    #[tokio::test]
    async fn test_resume_without_handle_is_state_error() {
        let fx = Fixture::new();
        fx.store
            .add_ticket("T1", "Test Ticket", TicketStatus::Progress);
        fx.store
            .attach_session("T1", Session::new("T1", "opencode", "test-ticket", None));

        let err = fx
            .orchestrator()
            .orchestrate(&fx.request("T1", Mode::Resume))
            .await
            .unwrap_err();

        assert!(err.is_state_error());
        assert_eq!(fx.mux.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_resolution_errors() {
        let fx = Fixture::new();
        fx.ticket_in(SessionState::Normal);

        fx.store.set_ticket_type("T1", "chore");
        let err = fx
            .orchestrator()
            .orchestrate(&fx.request("T1", Mode::Normal))
            .await
            .unwrap_err();
        assert_eq!(err.config_field(), Some("ticket.chore"));

        fx.store.set_ticket_type("T1", "work");
        let req = OrchestrateRequest {
            agent: Some("vim".to_string()),
            ..fx.request("T1", Mode::Normal)
        };
        let err = fx.orchestrator().orchestrate(&req).await.unwrap_err();
        assert_eq!(err.config_field(), Some("agent"));

        std::fs::write(
            fx.project.path().join(PROJECT_DIR).join("conductor.yaml"),
            "ticket: {}\n",
        )
        .unwrap();
        let err = fx
            .orchestrator()
            .orchestrate(&fx.request("T1", Mode::Normal))
            .await
            .unwrap_err();
        assert_eq!(err.config_field(), Some("session_group"));

        std::fs::write(
            fx.project.path().join(PROJECT_DIR).join("conductor.yaml"),
            "ticket: [broken\n",
        )
        .unwrap();
        let err = fx
            .orchestrator()
            .orchestrate(&fx.request("T1", Mode::Normal))
            .await
            .unwrap_err();
        assert_eq!(err.config_field(), Some("project_path"));

        assert_eq!(fx.mux.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_request_overrides_win() {
        let fx = Fixture::new();
        fx.ticket_in(SessionState::Normal);
        let req = OrchestrateRequest {
            agent: Some("opencode".to_string()),
            session_group: Some("other".to_string()),
            ..fx.request("T1", Mode::Normal)
        };

        let result = fx.orchestrator().orchestrate(&req).await.unwrap();

        assert_eq!(result.session_group, "other");
        assert!(fx.mux.has_window("other", "test-ticket"));
        assert_eq!(result.ticket.session.unwrap().agent, "opencode");
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("".parse::<Mode>().unwrap(), Mode::Normal);
        assert_eq!("resume".parse::<Mode>().unwrap(), Mode::Resume);
        assert_eq!("fresh".parse::<Mode>().unwrap(), Mode::Fresh);
        let err = "restart".parse::<Mode>().unwrap_err();
        assert_eq!(err.config_field(), Some("mode"));
    }

    #[tokio::test]
    async fn test_architect_role_matrix() {
        let fx = Fixture::new();
        let req = RoleRequest {
            role: AgentRole::Architect,
            project_path: Some(fx.project.path().to_path_buf()),
            ..RoleRequest::default()
        };
        let orchestrator = fx.orchestrator();

        let first = orchestrator.orchestrate_role(&req).await.unwrap();
        assert_eq!(first.outcome, Outcome::Spawned);
        assert_eq!(first.session_group, "proj");
        assert!(fx.mux.has_window("proj", "architect"));

        let second = orchestrator.orchestrate_role(&req).await.unwrap();
        assert_eq!(second.outcome, Outcome::AlreadyActive);
        assert_eq!(fx.mux.primary_count(), 1);

        let err = orchestrator
            .orchestrate_role(&RoleRequest {
                mode: Mode::Fresh,
                ..req.clone()
            })
            .await
            .unwrap_err();
        assert!(err.is_state_error());
        assert!(fx.sessions.get(ARCHITECT_SESSION_KEY).unwrap().is_active());
    }

    #[tokio::test]
    async fn test_meta_resumes_orphaned_session() {
        let fx = Fixture::new();
        fx.sessions.insert(
            META_SESSION_KEY,
            Session::new(META_SESSION_KEY, "claude", "meta", Some("conv-9".to_string())),
        );
        let req = RoleRequest {
            role: AgentRole::Meta,
            mode: Mode::Resume,
            ..RoleRequest::default()
        };

        let result = fx.orchestrator().orchestrate_role(&req).await.unwrap();

        assert_eq!(result.outcome, Outcome::Resumed);
        assert_eq!(result.session_group, META_SESSION_GROUP);
        assert!(fx.mux.has_window(META_SESSION_GROUP, "meta"));
        let launcher = std::fs::read_to_string(
            fx.artifacts.path().join("conductor-launcher-meta.sh"),
        )
        .unwrap();
        assert!(launcher.contains("--resume 'conv-9'"));
    }
}
