//! Agent session lifecycle: state detection, the spawn / resume / fresh
//! primitives and the orchestrator front ends call into.

mod agent;
mod artifacts;
mod binpath;
mod errors;
mod orchestrate;
mod prompt;
mod spawner;
mod state;

#[cfg(test)]
mod test_support;

pub use agent::{opencode_config_content, AgentKind, LaunchSpec};
pub use artifacts::{
    remove_artifact, shell_quote, write_launcher, write_mcp_config, write_prompt_file,
    write_settings, LauncherScript, McpConfig, McpParams, McpServer, SettingsConfig,
};
pub use binpath::{locate_daemon, locate_daemon_in, DAEMON_BINARY};
pub use errors::SpawnError;
pub use orchestrate::{
    Mode, OrchestrateRequest, OrchestrateResult, Orchestrator, Outcome, RoleRequest, RoleResult,
    META_SESSION_GROUP,
};
pub use prompt::{PromptError, PromptResolver, PromptRole, Stage};
pub use spawner::{
    validate_tmux_name, AgentRole, ResumeRequest, SpawnRequest, SpawnResult, Spawner,
};
pub use state::{detect_state, SessionState, StateInfo};
