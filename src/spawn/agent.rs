use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use super::artifacts::{shell_quote, McpConfig};

/// Agent entry selected in the OpenCode configuration we inject
const OPENCODE_AGENT_NAME: &str = "conductor";

/// Supported agent programs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    #[default]
    Claude,
    OpenCode,
}

/// Everything needed to render the command line of one agent launch
#[derive(Debug, Default)]
pub struct LaunchSpec<'a> {
    pub prompt_file: Option<&'a Path>,
    pub system_prompt_file: Option<&'a Path>,
    /// Replace the agent's own system prompt instead of appending to it
    pub replace_system_prompt: bool,
    pub mcp_config: Option<&'a Path>,
    pub settings: Option<&'a Path>,
    /// Conversation to pick up again
    pub resume_id: Option<&'a str>,
    /// Conversation id to assign to a new conversation
    pub session_id: Option<&'a str>,
    pub args: &'a [String],
}

impl AgentKind {
    pub const NAMES: [&'static str; 2] = ["claude", "opencode"];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::OpenCode => "opencode",
        }
    }

    /// Whether the agent accepts a settings file with lifecycle hooks
    pub fn supports_settings(self) -> bool {
        matches!(self, AgentKind::Claude)
    }

    /// Whether we pick the conversation id up front, making every spawn resumable
    pub fn assigns_conversation_id(self) -> bool {
        matches!(self, AgentKind::Claude)
    }

    /// Shell command line launching the agent
    pub fn command(self, spec: &LaunchSpec<'_>) -> String {
        let mut parts: Vec<String> = vec![self.as_str().to_string()];

        match self {
            AgentKind::Claude => {
                if let Some(prompt) = spec.prompt_file {
                    parts.push(cat_file(prompt));
                }
                if let Some(system) = spec.system_prompt_file {
                    let flag = if spec.replace_system_prompt {
                        "--system-prompt"
                    } else {
                        "--append-system-prompt"
                    };
                    parts.push(flag.to_string());
                    parts.push(cat_file(system));
                }
                if let Some(mcp) = spec.mcp_config {
                    parts.push("--mcp-config".to_string());
                    parts.push(shell_quote(&mcp.to_string_lossy()));
                }
                if let Some(settings) = spec.settings {
                    parts.push("--settings".to_string());
                    parts.push(shell_quote(&settings.to_string_lossy()));
                }
                if let Some(id) = spec.resume_id {
                    parts.push("--resume".to_string());
                    parts.push(shell_quote(id));
                } else if let Some(id) = spec.session_id {
                    parts.push("--session-id".to_string());
                    parts.push(shell_quote(id));
                }
            }
            AgentKind::OpenCode => {
                // MCP servers and system prompt arrive through OPENCODE_CONFIG_CONTENT
                parts.push("--agent".to_string());
                parts.push(OPENCODE_AGENT_NAME.to_string());
                if let Some(prompt) = spec.prompt_file {
                    parts.push("--prompt".to_string());
                    parts.push(cat_file(prompt));
                }
                if let Some(id) = spec.resume_id {
                    parts.push("--session".to_string());
                    parts.push(shell_quote(id));
                }
            }
        }

        parts.extend(spec.args.iter().map(|arg| shell_quote(arg)));
        parts.join(" ")
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" => Ok(AgentKind::Claude),
            "opencode" => Ok(AgentKind::OpenCode),
            other => Err(format!(
                "unknown agent '{}' (expected one of: {})",
                other,
                AgentKind::NAMES.join(", ")
            )),
        }
    }
}

/// `"$(cat '<path>')"`, read by the launcher shell at run time
fn cat_file(path: &Path) -> String {
    format!("\"$(cat {})\"", shell_quote(&path.to_string_lossy()))
}

/// JSON for `OPENCODE_CONFIG_CONTENT`.
///
/// Ticket agents keep OpenCode's own system prompt and get ours as an
/// instruction file; architect and meta agents replace it entirely.
pub fn opencode_config_content(
    mcp: &McpConfig,
    system_prompt: Option<&str>,
    instructions_file: Option<&Path>,
    replace_system_prompt: bool,
) -> Result<String, serde_json::Error> {
    let mut agent = json!({
        "description": "Conductor agent",
        "mode": "primary",
        "permission": { "*": "allow" },
    });
    if replace_system_prompt {
        if let Some(prompt) = system_prompt {
            agent["prompt"] = json!(prompt);
        }
    }

    let servers: BTreeMap<&str, serde_json::Value> = mcp
        .servers
        .iter()
        .map(|(name, server)| {
            let mut command = vec![server.command.clone()];
            command.extend(server.args.iter().cloned());
            let value = json!({
                "type": "local",
                "command": command,
                "environment": server.env,
            });
            (name.as_str(), value)
        })
        .collect();

    let mut config = json!({
        "agent": { OPENCODE_AGENT_NAME: agent },
        "mcp": servers,
    });
    if !replace_system_prompt {
        if let Some(file) = instructions_file {
            config["instructions"] = json!([file.to_string_lossy()]);
        }
    }

    serde_json::to_string(&config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::artifacts::McpServer;

    #[test]
    fn test_parse_agent_names() {
        assert_eq!("claude".parse::<AgentKind>().unwrap(), AgentKind::Claude);
        assert_eq!("OpenCode".parse::<AgentKind>().unwrap(), AgentKind::OpenCode);
        assert!("copilot".parse::<AgentKind>().is_err());
        for name in AgentKind::NAMES {
            assert_eq!(name.parse::<AgentKind>().unwrap().as_str(), name);
        }
    }

    #[test]
    fn test_claude_spawn_command() {
        let args = vec!["--model".to_string(), "opus".to_string()];
        let spec = LaunchSpec {
            prompt_file: Some(Path::new("/tmp/p.txt")),
            system_prompt_file: Some(Path::new("/tmp/s.txt")),
            mcp_config: Some(Path::new("/tmp/mcp.json")),
            settings: Some(Path::new("/tmp/settings.json")),
            session_id: Some("abc"),
            args: &args,
            ..LaunchSpec::default()
        };

        assert_eq!(
            AgentKind::Claude.command(&spec),
            "claude \"$(cat '/tmp/p.txt')\" --append-system-prompt \"$(cat '/tmp/s.txt')\" \
             --mcp-config '/tmp/mcp.json' --settings '/tmp/settings.json' \
             --session-id 'abc' '--model' 'opus'"
        );
    }

    #[test]
    fn test_claude_resume_replaces_session_id() {
        let spec = LaunchSpec {
            replace_system_prompt: true,
            system_prompt_file: Some(Path::new("/tmp/s.txt")),
            resume_id: Some("conv-1"),
            session_id: Some("ignored"),
            ..LaunchSpec::default()
        };

        let command = AgentKind::Claude.command(&spec);
        assert!(command.contains("--system-prompt \"$(cat '/tmp/s.txt')\""));
        assert!(command.ends_with("--resume 'conv-1'"));
        assert!(!command.contains("--session-id"));
    }

    #[test]
    fn test_opencode_command() {
        let spec = LaunchSpec {
            prompt_file: Some(Path::new("/tmp/p.txt")),
            mcp_config: Some(Path::new("/tmp/mcp.json")),
            ..LaunchSpec::default()
        };
        assert_eq!(
            AgentKind::OpenCode.command(&spec),
            "opencode --agent conductor --prompt \"$(cat '/tmp/p.txt')\""
        );
    }

    #[test]
    fn test_opencode_config_content() {
        let mut mcp = McpConfig::default();
        mcp.servers.insert(
            "conductor".to_string(),
            McpServer {
                command: "/usr/bin/conductor".to_string(),
                args: vec!["mcp".to_string()],
                env: BTreeMap::new(),
            },
        );

        let content = opencode_config_content(
            &mcp,
            Some("be helpful"),
            Some(Path::new("/tmp/s.txt")),
            false,
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(
            value["mcp"]["conductor"]["command"],
            json!(["/usr/bin/conductor", "mcp"])
        );
        assert_eq!(value["instructions"], json!(["/tmp/s.txt"]));
        assert!(value["agent"]["conductor"].get("prompt").is_none());

        let replaced = opencode_config_content(&mcp, Some("be helpful"), None, true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&replaced).unwrap();
        assert_eq!(value["agent"]["conductor"]["prompt"], "be helpful");
    }
}
