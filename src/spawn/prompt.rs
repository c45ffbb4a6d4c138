use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::PROJECT_DIR;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("failed to read prompt {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown placeholder '{{{{{0}}}}}'")]
    UnknownPlaceholder(String),
}

/// Prompt files a role is started with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Static instructions passed as the system prompt
    System,
    /// First user message
    Kickoff,
}

impl Stage {
    fn file_name(self) -> &'static str {
        match self {
            Stage::System => "SYSTEM.md",
            Stage::Kickoff => "KICKOFF.md",
        }
    }
}

/// Which prompt family to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRole<'a> {
    Ticket(&'a str),
    Architect,
    Meta,
}

impl PromptRole<'_> {
    fn rel_dir(&self) -> PathBuf {
        match self {
            PromptRole::Ticket(ticket_type) => Path::new("ticket").join(ticket_type),
            PromptRole::Architect => PathBuf::from("architect"),
            PromptRole::Meta => PathBuf::from("meta"),
        }
    }

    fn builtin(&self, stage: Stage) -> &'static str {
        match (self, stage) {
            (PromptRole::Ticket(_), Stage::System) => include_str!("prompts/ticket_system.md"),
            (PromptRole::Ticket(_), Stage::Kickoff) => include_str!("prompts/ticket_kickoff.md"),
            (PromptRole::Architect, Stage::System) => include_str!("prompts/architect_system.md"),
            (PromptRole::Architect, Stage::Kickoff) => {
                include_str!("prompts/architect_kickoff.md")
            }
            (PromptRole::Meta, Stage::System) => include_str!("prompts/meta_system.md"),
            (PromptRole::Meta, Stage::Kickoff) => include_str!("prompts/meta_kickoff.md"),
        }
    }
}

/// Looks prompts up in the project, then in the `extend` base, then falls
/// back to the built-in defaults.
///
/// Project prompts live in `<project>/.conductor/prompts/<role>/<STAGE>.md`,
/// base prompts in `<base>/prompts/<role>/<STAGE>.md`.
#[derive(Debug, Clone, Default)]
pub struct PromptResolver {
    project: Option<PathBuf>,
    base: Option<PathBuf>,
}

impl PromptResolver {
    pub fn new(project: Option<&Path>, base: Option<&Path>) -> Self {
        Self {
            project: project.map(Path::to_path_buf),
            base: base.map(Path::to_path_buf),
        }
    }

    pub async fn resolve(&self, role: PromptRole<'_>, stage: Stage) -> Result<String, PromptError> {
        let rel = role.rel_dir().join(stage.file_name());
        let candidates = self
            .project
            .iter()
            .map(|p| p.join(PROJECT_DIR).join("prompts").join(&rel))
            .chain(self.base.iter().map(|b| b.join("prompts").join(&rel)));

        for path in candidates {
            if let Some(content) = read_if_exists(&path).await? {
                return Ok(content);
            }
        }
        Ok(role.builtin(stage).to_string())
    }
}

async fn read_if_exists(path: &Path) -> Result<Option<String>, PromptError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(PromptError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Substitute `{{name}}` placeholders. Every placeholder must have a value.
pub fn render(template: &str, vars: &BTreeMap<&str, String>) -> Result<String, PromptError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = vars
            .get(name.as_str())
            .ok_or_else(|| PromptError::UnknownPlaceholder(name.as_str().to_string()))?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }

    out.push_str(&template[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&'static str, &str)]) -> BTreeMap<&'static str, String> {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let rendered = render(
            "# {{ticket_title}}\n{{ ticket_body }}",
            &vars(&[("ticket_title", "Test Ticket"), ("ticket_body", "do it")]),
        )
        .unwrap();
        assert_eq!(rendered, "# Test Ticket\ndo it");
    }

    #[test]
    fn test_render_rejects_unknown_placeholder() {
        let err = render("hi {{nope}}", &vars(&[])).unwrap_err();
        assert!(matches!(err, PromptError::UnknownPlaceholder(ref name) if name == "nope"));
        assert!(err.to_string().contains("{{nope}}"));
    }

    #[test]
    fn test_render_leaves_single_braces() {
        let rendered = render("{not} {{a}}", &vars(&[("a", "x")])).unwrap();
        assert_eq!(rendered, "{not} x");
    }

    #[tokio::test]
    async fn test_resolution_order() {
        let project = tempfile::tempdir().unwrap();
        let base = tempfile::tempdir().unwrap();
        let resolver = PromptResolver::new(Some(project.path()), Some(base.path()));

        let builtin = resolver
            .resolve(PromptRole::Ticket("work"), Stage::Kickoff)
            .await
            .unwrap();
        assert!(builtin.contains("{{ticket_title}}"));

        let base_dir = base.path().join("prompts").join("ticket").join("work");
        std::fs::create_dir_all(&base_dir).unwrap();
        std::fs::write(base_dir.join("KICKOFF.md"), "from base").unwrap();
        let resolved = resolver
            .resolve(PromptRole::Ticket("work"), Stage::Kickoff)
            .await
            .unwrap();
        assert_eq!(resolved, "from base");

        let project_dir = project
            .path()
            .join(".conductor")
            .join("prompts")
            .join("ticket")
            .join("work");
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::write(project_dir.join("KICKOFF.md"), "from project").unwrap();
        let resolved = resolver
            .resolve(PromptRole::Ticket("work"), Stage::Kickoff)
            .await
            .unwrap();
        assert_eq!(resolved, "from project");

        // Other types are unaffected
        let other = resolver
            .resolve(PromptRole::Ticket("debug"), Stage::Kickoff)
            .await
            .unwrap();
        assert_ne!(other, "from project");
    }
}
