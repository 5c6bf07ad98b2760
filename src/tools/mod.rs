//! Tool capabilities agents may declare in their definitions.
//!
//! The registry is fixed at startup. Definitions name capabilities by
//! identifier, and the loader resolves them here so that a typo fails the
//! load instead of surfacing mid-run.

mod discord;
mod log_search;
mod report;

pub use discord::{DiscordAlert, DiscordConfig};
pub use log_search::{LogSearch, LogSearchConfig};
pub use report::{ReportConfig, SaveReportHtml};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{FunctionDefinition, ToolDefinition};

/// Per-call context handed to a tool.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Agent on whose behalf the tool runs.
    pub agent: String,
    /// The agent's lookback window.
    pub lookback_minutes: u64,
    /// The same window in whole hours, as rendered into the prompt.
    pub period_hours: u64,
}

/// Trait for implementing tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String>;
}

/// Registry of available tools, keyed by capability identifier.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn empty() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Registry with the built-in capabilities, configured from the environment.
    pub fn from_env() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(LogSearch::new(LogSearchConfig::from_env())));
        registry.register(Arc::new(DiscordAlert::new(DiscordConfig::from_env())));
        registry.register(Arc::new(SaveReportHtml::new(ReportConfig::from_env())));
        registry
    }

    /// Add (or replace) a tool under its own name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Identifiers of every registered capability, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Resolve capability identifiers into a tool set.
    ///
    /// Returns the first unknown identifier on failure.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<ToolSet, String> {
        let mut tools = BTreeMap::new();
        for name in names {
            let name = name.as_ref();
            let tool = self.tools.get(name).ok_or_else(|| name.to_string())?;
            tools.insert(name.to_string(), Arc::clone(tool));
        }
        Ok(ToolSet { tools })
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

/// The tools one agent definition has been granted.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Get tool schemas in LLM-compatible format.
    pub fn schemas(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                tool_type: "function".to_string(),
                function: FunctionDefinition {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: t.parameters_schema(),
                },
            })
            .collect()
    }

    /// Execute a tool by name.
    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown tool: {}", name))?;

        tool.execute(args, ctx).await
    }
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.tools.keys()).finish()
    }
}
