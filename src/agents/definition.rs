//! Agent behavior definitions.
//!
//! A definition is a markdown file `<agents_dir>/<name>.md` that opens with a
//! YAML metadata block:
//!
//! ```text
//! ---
//! tools: [get_server_logs, post_discord_alert]
//! model: claude-sonnet-4-20250514
//! max_tokens: 4096
//! ---
//! Review the last {period_minutes} minutes ({period_hours}h) of logs...
//! ```
//!
//! Nothing is cached: every `load`/`reload` re-reads the file, so edits take
//! effect before the agent's next run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::tools::{ToolRegistry, ToolSet};

const DEFAULT_MAX_TOKENS: u64 = 4096;
const FRONT_MATTER_DELIMITER: &str = "---";

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("no definition found for agent {0:?}")]
    NotFound(String),

    #[error("invalid definition for agent {name:?}: {reason}")]
    Invalid { name: String, reason: String },

    #[error("definition for agent {name:?} references unknown capability {capability:?}")]
    UnknownCapability { name: String, capability: String },
}

/// A loaded, validated behavior definition.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    /// Capability identifiers exactly as declared.
    pub capabilities: Vec<String>,
    pub model: String,
    pub max_tokens: u64,
    /// Prompt text with `{period_hours}` / `{period_minutes}` placeholders.
    pub prompt_template: String,
    /// Declared capabilities resolved against the registry.
    pub tools: ToolSet,
}

impl AgentDefinition {
    /// Substitute the lookback placeholders.
    pub fn render_prompt(&self, period_hours: u64, period_minutes: u64) -> String {
        self.prompt_template
            .replace("{period_hours}", &period_hours.to_string())
            .replace("{period_minutes}", &period_minutes.to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DefinitionMeta {
    #[serde(default)]
    tools: Vec<String>,
    model: String,
    #[serde(default = "default_max_tokens")]
    max_tokens: u64,
}

fn default_max_tokens() -> u64 {
    DEFAULT_MAX_TOKENS
}

/// Reads definitions from a directory and validates them against the
/// capability registry.
#[derive(Clone)]
pub struct DefinitionLoader {
    agents_dir: PathBuf,
    registry: Arc<ToolRegistry>,
}

impl DefinitionLoader {
    pub fn new(agents_dir: impl Into<PathBuf>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            agents_dir: agents_dir.into(),
            registry,
        }
    }

    pub fn agents_dir(&self) -> &Path {
        &self.agents_dir
    }

    /// Load the definition for `name`.
    pub fn load(&self, name: &str) -> Result<AgentDefinition, DefinitionError> {
        let path = self
            .path_for(name)
            .ok_or_else(|| DefinitionError::NotFound(name.to_string()))?;

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DefinitionError::NotFound(name.to_string()));
            }
            Err(e) => {
                return Err(DefinitionError::Invalid {
                    name: name.to_string(),
                    reason: format!("failed to read {}: {}", path.display(), e),
                });
            }
        };

        self.parse(name, &text)
    }

    /// Same as [`load`](Self::load); named separately for call sites that
    /// replace an existing definition.
    pub fn reload(&self, name: &str) -> Result<AgentDefinition, DefinitionError> {
        self.load(name)
    }

    /// Definition file for `name`, or `None` if the name could escape the
    /// definitions directory.
    fn path_for(&self, name: &str) -> Option<PathBuf> {
        let plain = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\'])
            && !name.contains('\0');
        plain.then(|| self.agents_dir.join(format!("{}.md", name)))
    }

    fn parse(&self, name: &str, text: &str) -> Result<AgentDefinition, DefinitionError> {
        let invalid = |reason: String| DefinitionError::Invalid {
            name: name.to_string(),
            reason,
        };

        let (meta, body) = split_front_matter(text)
            .ok_or_else(|| invalid("missing '---' metadata block".to_string()))?;
        let meta: DefinitionMeta =
            serde_yaml::from_str(meta).map_err(|e| invalid(format!("bad metadata: {}", e)))?;

        if meta.model.trim().is_empty() {
            return Err(invalid("model must not be empty".to_string()));
        }
        if meta.max_tokens == 0 {
            return Err(invalid("max_tokens must be positive".to_string()));
        }
        let prompt_template = body.trim();
        if prompt_template.is_empty() {
            return Err(invalid("prompt template is empty".to_string()));
        }

        let tools = self
            .registry
            .resolve(&meta.tools)
            .map_err(|capability| DefinitionError::UnknownCapability {
                name: name.to_string(),
                capability,
            })?;

        Ok(AgentDefinition {
            capabilities: meta.tools,
            model: meta.model.trim().to_string(),
            max_tokens: meta.max_tokens,
            prompt_template: prompt_template.to_string(),
            tools,
        })
    }
}

/// Split `---\n<yaml>\n---\n<body>` into its metadata and body.
fn split_front_matter(text: &str) -> Option<(&str, &str)> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let rest = text.strip_prefix(FRONT_MATTER_DELIMITER)?;
    let rest = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == FRONT_MATTER_DELIMITER {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}
