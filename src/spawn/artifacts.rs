//! Files written for a single agent launch.
//!
//! Every artifact is named `conductor-<kind>-<id>.<ext>` inside the artifact
//! directory (the OS temp dir unless configured). The launcher script removes
//! all of them, itself included, when the agent exits.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

/// Key of our server in generated MCP configs
pub const MCP_SERVER_NAME: &str = "conductor";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServer {
    pub command: String,
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// MCP configuration in the `--mcp-config` file format
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(rename = "mcpServers")]
    pub servers: BTreeMap<String, McpServer>,
}

#[derive(Debug)]
pub struct McpParams<'a> {
    pub daemon: &'a Path,
    pub ticket_id: Option<&'a str>,
    pub ticket_type: Option<&'a str>,
    pub tickets_dir: Option<&'a Path>,
    pub project_path: Option<&'a Path>,
    pub group: &'a str,
    pub meta: bool,
}

impl McpConfig {
    pub fn generate(params: &McpParams<'_>) -> Self {
        let mut args = vec!["mcp".to_string()];
        if params.meta {
            args.push("--meta".to_string());
        } else if let Some(id) = params.ticket_id {
            args.extend(["--ticket-id".to_string(), id.to_string()]);
            if let Some(ticket_type) = params.ticket_type {
                args.extend(["--ticket-type".to_string(), ticket_type.to_string()]);
            }
        }

        let mut env = BTreeMap::new();
        if let Some(dir) = params.tickets_dir {
            env.insert(
                "CONDUCTOR_TICKETS_DIR".to_string(),
                dir.to_string_lossy().to_string(),
            );
        }
        if let Some(project) = params.project_path {
            env.insert(
                "CONDUCTOR_PROJECT_PATH".to_string(),
                project.to_string_lossy().to_string(),
            );
        }
        if !params.group.is_empty() {
            env.insert("CONDUCTOR_TMUX_SESSION".to_string(), params.group.to_string());
        }

        let mut servers = BTreeMap::new();
        servers.insert(
            MCP_SERVER_NAME.to_string(),
            McpServer {
                command: params.daemon.to_string_lossy().to_string(),
                args,
                env,
            },
        );
        Self { servers }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,
    pub hooks: Vec<HookAction>,
}

/// Claude `settings.json` registering our lifecycle hooks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsConfig {
    pub hooks: BTreeMap<String, Vec<HookEntry>>,
}

impl SettingsConfig {
    pub fn with_hooks(daemon: &Path) -> Self {
        let daemon = shell_quote(&daemon.to_string_lossy());
        let entry = |matcher: Option<&str>, hook: &str| HookEntry {
            matcher: matcher.map(str::to_string),
            hooks: vec![HookAction {
                kind: "command".to_string(),
                command: format!("{} hook {}", daemon, hook),
            }],
        };

        let mut hooks = BTreeMap::new();
        hooks.insert(
            "PostToolUse".to_string(),
            vec![entry(Some("*"), "post-tool-use")],
        );
        hooks.insert("Stop".to_string(), vec![entry(None, "stop")]);
        hooks.insert(
            "PermissionRequest".to_string(),
            vec![entry(None, "permission-request")],
        );
        Self { hooks }
    }
}

/// Bash script that exports the agent environment, registers cleanup of
/// every artifact and then runs the agent command.
#[derive(Debug, Default)]
pub struct LauncherScript {
    pub env: Vec<(String, String)>,
    pub cleanup: Vec<PathBuf>,
    pub command: String,
}

impl LauncherScript {
    /// Script text for a launcher living at `own_path`
    pub fn render(&self, own_path: &Path) -> String {
        let mut script = String::from("#!/usr/bin/env bash\n");

        let mut trap = String::from("rm -f");
        for path in self.cleanup.iter().map(PathBuf::as_path).chain([own_path]) {
            trap.push(' ');
            trap.push_str(&shell_quote(&path.to_string_lossy()));
        }
        script.push_str(&format!("trap {} EXIT\n", shell_quote(&trap)));

        for (key, value) in &self.env {
            script.push_str(&format!("export {}={}\n", key, shell_quote(value)));
        }

        script.push_str(&self.command);
        script.push('\n');
        script
    }
}

/// Wrap `s` in single quotes, escaping embedded quotes as `'\''`
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn artifact_path(dir: &Path, kind: &str, id: &str, ext: &str) -> PathBuf {
    dir.join(format!("conductor-{}-{}.{}", kind, id, ext))
}

async fn write_json<T: Serialize>(path: PathBuf, value: &T) -> io::Result<PathBuf> {
    let data = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    tokio::fs::write(&path, data).await?;
    Ok(path)
}

pub async fn write_mcp_config(dir: &Path, id: &str, config: &McpConfig) -> io::Result<PathBuf> {
    write_json(artifact_path(dir, "mcp", id, "json"), config).await
}

pub async fn write_settings(
    dir: &Path,
    id: &str,
    settings: &SettingsConfig,
) -> io::Result<PathBuf> {
    write_json(artifact_path(dir, "settings", id, "json"), settings).await
}

/// Write prompt text; `kind` is `prompt` or `sysprompt`
pub async fn write_prompt_file(
    dir: &Path,
    id: &str,
    kind: &str,
    content: &str,
) -> io::Result<PathBuf> {
    let path = artifact_path(dir, kind, id, "txt");
    tokio::fs::write(&path, content).await?;
    Ok(path)
}

pub async fn write_launcher(
    dir: &Path,
    id: &str,
    launcher: &LauncherScript,
) -> io::Result<PathBuf> {
    let path = artifact_path(dir, "launcher", id, "sh");
    tokio::fs::write(&path, launcher.render(&path)).await?;
    Ok(path)
}

/// Remove an artifact; a file that is already gone is not an error
pub async fn remove_artifact(path: &Path) -> io::Result<()> {
    crate::fsutil::remove_if_exists(path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_mcp_config_for_ticket() {
        let config = McpConfig::generate(&McpParams {
            daemon: Path::new("/usr/bin/conductor"),
            ticket_id: Some("T1"),
            ticket_type: Some("work"),
            tickets_dir: Some(Path::new("/p/.conductor/tickets")),
            project_path: Some(Path::new("/p")),
            group: "proj",
            meta: false,
        });

        let value = serde_json::to_value(&config).unwrap();
        let server = &value["mcpServers"]["conductor"];
        assert_eq!(server["command"], "/usr/bin/conductor");
        assert_eq!(
            server["args"],
            serde_json::json!(["mcp", "--ticket-id", "T1", "--ticket-type", "work"])
        );
        assert_eq!(server["env"]["CONDUCTOR_TMUX_SESSION"], "proj");
        assert_eq!(server["env"]["CONDUCTOR_PROJECT_PATH"], "/p");
    }

    #[test]
    fn test_mcp_config_for_meta() {
        let config = McpConfig::generate(&McpParams {
            daemon: Path::new("conductor"),
            ticket_id: Some("ignored"),
            ticket_type: None,
            tickets_dir: None,
            project_path: None,
            group: "",
            meta: true,
        });
        assert_eq!(config.servers[MCP_SERVER_NAME].args, vec!["mcp", "--meta"]);
        assert!(config.servers[MCP_SERVER_NAME].env.is_empty());
    }

    #[test]
    fn test_settings_register_all_hooks() {
        let settings = SettingsConfig::with_hooks(Path::new("/usr/bin/conductor"));
        let value = serde_json::to_value(&settings).unwrap();

        assert_eq!(value["hooks"]["PostToolUse"][0]["matcher"], "*");
        assert_eq!(
            value["hooks"]["Stop"][0]["hooks"][0]["command"],
            "'/usr/bin/conductor' hook stop"
        );
        assert_eq!(
            value["hooks"]["PermissionRequest"][0]["hooks"][0]["type"],
            "command"
        );
        assert!(value["hooks"]["Stop"][0].get("matcher").is_none());
    }

    #[test]
    fn test_launcher_cleans_up_itself() {
        let launcher = LauncherScript {
            env: vec![("CONDUCTOR_TICKET_ID".to_string(), "T1".to_string())],
            cleanup: vec![PathBuf::from("/tmp/a.json")],
            command: "claude".to_string(),
        };
        let script = launcher.render(Path::new("/tmp/launch.sh"));

        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(lines[0], "#!/usr/bin/env bash");
        assert_eq!(
            lines[1],
            r"trap 'rm -f '\''/tmp/a.json'\'' '\''/tmp/launch.sh'\''' EXIT"
        );
        assert_eq!(lines[2], "export CONDUCTOR_TICKET_ID='T1'");
        assert_eq!(lines[3], "claude");
    }

    #[tokio::test]
    async fn test_write_and_remove_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mcp = write_mcp_config(dir.path(), "T1", &McpConfig::default())
            .await
            .unwrap();
        let prompt = write_prompt_file(dir.path(), "T1", "sysprompt", "hello")
            .await
            .unwrap();

        assert_eq!(mcp, dir.path().join("conductor-mcp-T1.json"));
        assert_eq!(prompt, dir.path().join("conductor-sysprompt-T1.txt"));
        assert_eq!(std::fs::read_to_string(&prompt).unwrap(), "hello");

        remove_artifact(&mcp).await.unwrap();
        remove_artifact(&mcp).await.unwrap();
        assert!(!mcp.exists());
    }
}
