use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossterm::event::{self, Event, KeyEventKind};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use agent_conductor::config::{find_project_root, ProjectConfig, PROJECT_DIR};
use agent_conductor::spawn::{
    detect_state, AgentRole, Mode, OrchestrateRequest, Orchestrator, Outcome, RoleRequest,
    SpawnResult, StateInfo,
};
use agent_conductor::ticket::{AgentStatus, FileTicketStore, TicketStore, DEFAULT_TICKET_TYPE};
use agent_conductor::tmux::TmuxClient;

mod actions;
mod app;

use actions::Action;
use app::{App, TicketRow};

#[derive(Parser)]
#[command(name = "conductor", version, about = "Run AI coding agents against tickets in tmux")]
struct Cli {
    /// Project directory (defaults to the nearest parent with a .conductor/)
    #[arg(long, short = 'C', global = true)]
    project: Option<PathBuf>,

    /// conductor binary agents call back into for MCP and hooks
    #[arg(long = "bin", global = true, env = "CONDUCTOR_BIN")]
    daemon_path: Option<PathBuf>,

    /// Directory for generated launch files
    #[arg(long, global = true, env = "CONDUCTOR_ARTIFACT_DIR")]
    artifact_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive ticket dashboard (default)
    Dashboard {
        /// tmux session to use instead of the configured project name
        #[arg(long)]
        session: Option<String>,
    },
    /// Start, resume or restart the agent working a ticket
    Spawn {
        ticket: String,
        #[arg(long, default_value = "normal")]
        mode: Mode,
        /// Agent runtime override (claude, opencode)
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        session: Option<String>,
    },
    /// Start the project's architect agent
    Architect {
        #[arg(long, default_value = "normal")]
        mode: Mode,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        session: Option<String>,
    },
    /// Start the user-wide meta agent
    Meta {
        #[arg(long, default_value = "normal")]
        mode: Mode,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        session: Option<String>,
    },
    /// Show the detected session state of a ticket
    State {
        ticket: String,
        #[arg(long)]
        session: Option<String>,
    },
    /// Manage tickets
    Ticket {
        #[command(subcommand)]
        command: TicketCommand,
    },
    /// Agent lifecycle hook (invoked by the agent runtime)
    Hook { event: HookEvent },
}

#[derive(Subcommand)]
enum TicketCommand {
    /// Create a ticket in the backlog
    New {
        title: String,
        #[arg(long, default_value = "")]
        body: String,
        #[arg(long = "type", default_value = DEFAULT_TICKET_TYPE)]
        ticket_type: String,
    },
    /// List tickets with their status
    List,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum HookEvent {
    PostToolUse,
    Stop,
    PermissionRequest,
}

impl HookEvent {
    fn agent_status(self) -> AgentStatus {
        match self {
            HookEvent::PostToolUse => AgentStatus::InProgress,
            HookEvent::Stop => AgentStatus::Idle,
            HookEvent::PermissionRequest => AgentStatus::WaitingPermission,
        }
    }
}

fn init_logging(to_file: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    if to_file {
        // Dashboard and hook output must stay off the terminal
        let dir = dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(PROJECT_DIR);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join("conductor.log");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn project_root(requested: Option<&Path>) -> Result<PathBuf> {
    let start = match requested {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    Ok(find_project_root(&start)?)
}

fn tickets_dir(project: &Path) -> PathBuf {
    project.join(PROJECT_DIR).join("tickets")
}

fn session_group(requested: Option<String>, project: &Path) -> Result<String> {
    if let Some(group) = requested.filter(|g| !g.is_empty()) {
        return Ok(group);
    }
    let config = ProjectConfig::load(project)?;
    if config.name.is_empty() {
        bail!("no tmux session configured: set `name` in .conductor/conductor.yaml or pass --session");
    }
    Ok(config.name)
}

fn print_spawn(outcome: Outcome, group: &str, result: Option<&SpawnResult>, state: &StateInfo) {
    match result {
        Some(result) => {
            println!("{}: {}:{}", outcome, group, result.window);
            if !result.message.is_empty() {
                println!("  {}", result.message);
            }
        }
        None => {
            let window = state
                .session
                .as_ref()
                .map(|s| s.window.as_str())
                .unwrap_or("?");
            println!("{}: {}:{}", outcome, group, window);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Dashboard { session: None });
    init_logging(matches!(
        command,
        Command::Dashboard { .. } | Command::Hook { .. }
    ))?;

    let orchestrator = |tickets: Arc<FileTicketStore>| {
        Orchestrator::new(tickets, Arc::new(TmuxClient::new()))
            .with_daemon_path(cli.daemon_path.clone())
            .with_artifact_dir(cli.artifact_dir.clone())
    };

    match command {
        Command::Dashboard { session } => {
            let project = project_root(cli.project.as_deref())?;
            let group = session_group(session, &project)?;
            let store = Arc::new(FileTicketStore::new(tickets_dir(&project)));
            run_dashboard(orchestrator(store.clone()), store, project, group).await
        }
        Command::Spawn {
            ticket,
            mode,
            agent,
            session,
        } => {
            let project = project_root(cli.project.as_deref())?;
            let store = Arc::new(FileTicketStore::new(tickets_dir(&project)));
            let result = orchestrator(store)
                .orchestrate(&OrchestrateRequest {
                    ticket_id: ticket.clone(),
                    mode,
                    agent,
                    project_path: project,
                    session_group: session,
                    tickets_dir: None,
                })
                .await
                .with_context(|| format!("failed to start agent for {}", ticket))?;
            print_spawn(
                result.outcome,
                &result.session_group,
                result.spawn_result.as_ref(),
                &result.state,
            );
            Ok(())
        }
        Command::Architect {
            mode,
            agent,
            session,
        } => {
            let project = project_root(cli.project.as_deref())?;
            let store = Arc::new(FileTicketStore::new(tickets_dir(&project)));
            let result = orchestrator(store)
                .orchestrate_role(&RoleRequest {
                    role: AgentRole::Architect,
                    mode,
                    agent,
                    project_path: Some(project),
                    session_group: session,
                })
                .await
                .context("failed to start architect")?;
            print_spawn(
                result.outcome,
                &result.session_group,
                result.spawn_result.as_ref(),
                &result.state,
            );
            Ok(())
        }
        Command::Meta {
            mode,
            agent,
            session,
        } => {
            // Meta is not tied to a project, but uses one when run inside it
            let project = project_root(cli.project.as_deref()).ok();
            let store = Arc::new(FileTicketStore::new(
                project.as_deref().map(tickets_dir).unwrap_or_default(),
            ));
            let result = orchestrator(store)
                .orchestrate_role(&RoleRequest {
                    role: AgentRole::Meta,
                    mode,
                    agent,
                    project_path: project,
                    session_group: session,
                })
                .await
                .context("failed to start meta agent")?;
            print_spawn(
                result.outcome,
                &result.session_group,
                result.spawn_result.as_ref(),
                &result.state,
            );
            Ok(())
        }
        Command::State { ticket, session } => {
            let project = project_root(cli.project.as_deref())?;
            let group = session_group(session, &project)?;
            let store = FileTicketStore::new(tickets_dir(&project));
            let (record, status) = store
                .get(&ticket)
                .await
                .with_context(|| format!("failed to read ticket {}", ticket))?;
            let mux = TmuxClient::new();
            let info = detect_state(record.session.as_ref(), &group, Some(&mux)).await?;

            println!("{} [{}] {}", record.id, status, record.title);
            println!("  state: {}", info.state);
            if let Some(session) = &info.session {
                println!("  agent: {} in {}:{}", session.agent, group, session.window);
                if let Some(resume_id) = info.resume_id() {
                    println!("  resume id: {}", resume_id);
                }
                if let Some(worktree) = &session.worktree {
                    println!("  worktree: {} ({})", worktree.path.display(), worktree.branch);
                }
            }
            Ok(())
        }
        Command::Ticket { command } => {
            let project = project_root(cli.project.as_deref())?;
            let store = FileTicketStore::new(tickets_dir(&project));
            match command {
                TicketCommand::New {
                    title,
                    body,
                    ticket_type,
                } => {
                    let ticket = store.create(&title, &body, &ticket_type).await?;
                    println!("{}", ticket.id);
                }
                TicketCommand::List => {
                    for (ticket, status) in store.list().await? {
                        println!(
                            "{:<12} {:<9} {:<10} {}",
                            ticket.id,
                            status,
                            ticket.effective_type(),
                            ticket.title
                        );
                    }
                }
            }
            Ok(())
        }
        Command::Hook { event } => {
            run_hook(event).await;
            Ok(())
        }
    }
}

/// Record agent activity. Never fails: a broken hook must not stop the agent.
async fn run_hook(event: HookEvent) {
    let (Ok(ticket_id), Ok(project)) = (
        std::env::var("CONDUCTOR_TICKET_ID"),
        std::env::var("CONDUCTOR_PROJECT"),
    ) else {
        debug!(?event, "hook outside a conductor session");
        return;
    };

    let store = FileTicketStore::new(tickets_dir(Path::new(&project)));
    if let Err(e) = store
        .update_agent_status(&ticket_id, event.agent_status())
        .await
    {
        warn!(ticket_id = %ticket_id, ?event, error = %e, "failed to record agent status");
    }
}

async fn run_dashboard(
    orchestrator: Orchestrator,
    store: Arc<FileTicketStore>,
    project: PathBuf,
    group: String,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();

    let mut terminal = ratatui::init();

    // Input handler
    let input_tx = tx.clone();
    std::thread::spawn(move || loop {
        if event::poll(Duration::from_millis(100)).unwrap_or(false) {
            if let Ok(Event::Key(key)) = event::read() {
                if key.kind == KeyEventKind::Press && input_tx.send(Action::KeyPress(key)).is_err()
                {
                    break;
                }
            }
        }
    });

    // Ticket poller
    let poll_tx = tx.clone();
    let poll_store = store.clone();
    let poll_group = group.clone();
    tokio::spawn(async move {
        let mux = TmuxClient::new();
        loop {
            let update = match TicketRow::collect(&poll_store, &mux, &poll_group).await {
                Ok(rows) => Action::TicketsUpdated(rows),
                Err(e) => Action::Error(format!("{:#}", e)),
            };
            if poll_tx.send(update).is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1000)).await;
        }
    });

    let tmux_client = TmuxClient::new();
    let mut app = App::new(group.clone());

    let result = loop {
        terminal.draw(|f| app.render(f))?;

        for pending_action in app.take_pending_actions() {
            match pending_action {
                Action::Orchestrate { ticket_id, mode } => {
                    let req = OrchestrateRequest {
                        ticket_id: ticket_id.clone(),
                        mode,
                        agent: None,
                        project_path: project.clone(),
                        session_group: Some(group.clone()),
                        tickets_dir: Some(store.root().to_path_buf()),
                    };
                    match orchestrator.orchestrate(&req).await {
                        Ok(result) => {
                            let window = result
                                .spawn_result
                                .as_ref()
                                .map(|r| r.window.clone())
                                .or_else(|| result.state.session.as_ref().map(|s| s.window.clone()))
                                .unwrap_or_default();
                            app.info(format!("{} {}: {}", ticket_id, result.outcome, window));
                        }
                        Err(e) => app.error(format!("{}: {}", ticket_id, e)),
                    }
                }
                Action::CreateTicket(title) => {
                    match store.create(&title, "", DEFAULT_TICKET_TYPE).await {
                        Ok(ticket) => app.info(format!("Created {}", ticket.id)),
                        Err(e) => app.error(format!("Failed to create ticket: {}", e)),
                    }
                }
                Action::Attach(window) => {
                    // Suspend TUI while tmux owns the terminal
                    ratatui::restore();

                    let cmd = tmux_client.attach_command(&group, &window);
                    let status = std::process::Command::new(&cmd[0])
                        .args(&cmd[1..])
                        .stdin(Stdio::inherit())
                        .stdout(Stdio::inherit())
                        .stderr(Stdio::inherit())
                        .status();

                    terminal = ratatui::init();

                    if let Err(e) = status {
                        app.error(format!("Failed to attach: {}", e));
                    }
                }
                Action::CopyAttach(window) => {
                    let cmd = tmux_client.attach_command(&group, &window).join(" ");
                    match arboard::Clipboard::new().and_then(|mut c| c.set_text(cmd)) {
                        Ok(()) => app.info("Attach command copied to clipboard"),
                        Err(e) => app.error(format!("Clipboard error: {}", e)),
                    }
                }
                _ => {}
            }
        }

        match rx.recv().await {
            Some(action) => match app.handle_action(action) {
                Ok(true) => break Ok(()),
                Ok(false) => {}
                Err(e) => break Err(e),
            },
            None => break Ok(()),
        }
    };

    ratatui::restore();
    result
}
