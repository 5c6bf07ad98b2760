//! One stateful agent: descriptor, active definition, and session history.
//!
//! # Invariants
//! - The active definition is replaced whole or not at all.
//! - History only grows by complete exchanges from successful runs, and never
//!   holds more than `session_window` of them.
//! - A runtime is owned by exactly one caller; nothing here is shared.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

use super::definition::{AgentDefinition, DefinitionLoader};
use super::log_sink::LogSink;
use super::session::{Exchange, SessionError, SessionStore};
use crate::llm::{ChatMessage, ChatOptions, LlmClient, TokenUsage, ToolCall};
use crate::roster::AgentDescriptor;
use crate::tools::ToolContext;

pub const DEFAULT_SESSION_WINDOW: usize = 20;
pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 25;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

/// Limits applied to every run.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeSettings {
    /// Exchanges kept in history.
    pub session_window: usize,
    /// Model calls allowed in one run before it is abandoned.
    pub max_tool_iterations: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            session_window: DEFAULT_SESSION_WINDOW,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// The model's final answer.
    pub output: String,
    /// Usage summed over every model call in the run.
    pub usage: TokenUsage,
    pub model_calls: usize,
    pub tool_calls: usize,
}

/// Lifetime counters for one runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub runs: u64,
    pub failures: u64,
    pub usage: TokenUsage,
}

pub struct AgentRuntime {
    descriptor: AgentDescriptor,
    definition: AgentDefinition,
    system_prompt: String,
    history: Vec<Exchange>,
    store: Arc<dyn SessionStore>,
    sink: Arc<dyn LogSink>,
    llm: Arc<dyn LlmClient>,
    settings: RuntimeSettings,
    stats: RuntimeStats,
}

impl AgentRuntime {
    /// Bind a runtime to its persisted session and render its prompt.
    ///
    /// A corrupt session file has already been moved aside by the store; the
    /// agent starts with empty history. Any other storage error is returned.
    pub async fn instantiate(
        descriptor: AgentDescriptor,
        definition: AgentDefinition,
        store: Arc<dyn SessionStore>,
        sink: Arc<dyn LogSink>,
        llm: Arc<dyn LlmClient>,
        settings: RuntimeSettings,
    ) -> Result<Self, SessionError> {
        let mut history = match store.load_session(&descriptor.name).await {
            Ok(history) => history,
            Err(e @ SessionError::Corrupt { .. }) => {
                tracing::warn!(agent = %descriptor.name, error = %e, "Starting with empty session");
                sink.log(&format!("Session reset: {}", e));
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        trim_to_window(&mut history, settings.session_window);

        let system_prompt =
            definition.render_prompt(descriptor.period_hours(), descriptor.lookback_minutes);

        tracing::info!(
            agent = %descriptor.name,
            trigger = %descriptor.trigger_mode,
            lookback_minutes = descriptor.lookback_minutes,
            history = history.len(),
            tools = ?definition.tools,
            "Agent runtime ready"
        );

        Ok(Self {
            descriptor,
            definition,
            system_prompt,
            history,
            store,
            sink,
            llm,
            settings,
            stats: RuntimeStats::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    pub fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    /// The rendered prompt currently in effect.
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn history(&self) -> &[Exchange] {
        &self.history
    }

    pub fn stats(&self) -> RuntimeStats {
        self.stats
    }

    /// Re-read the definition. On failure the previous definition stays in
    /// effect; the error is logged, never returned.
    pub fn refresh_definition(&mut self, loader: &DefinitionLoader) -> bool {
        match loader.reload(self.name()) {
            Ok(definition) => {
                let system_prompt = definition
                    .render_prompt(self.descriptor.period_hours(), self.descriptor.lookback_minutes);
                self.definition = definition;
                self.system_prompt = system_prompt;
                true
            }
            Err(e) => {
                tracing::warn!(agent = %self.name(), error = %e, "Definition reload failed, keeping previous definition");
                self.sink
                    .log(&format!("Definition reload failed, keeping previous: {}", e));
                false
            }
        }
    }

    /// Run the agent once.
    ///
    /// The exchange is appended to history and persisted only if the run
    /// succeeds. May take as long as the model takes; no timeout is applied.
    pub async fn execute(&mut self, invocation: &str) -> Result<ExecutionResult, ExecutionError> {
        let started = Instant::now();
        self.stats.runs += 1;
        self.sink.log(&format!("Run started: {}", invocation));

        let mut usage = TokenUsage::default();
        let outcome = self.run_tool_loop(invocation, &mut usage).await;
        self.stats.usage.add(&usage);

        match outcome {
            Ok((new_messages, model_calls, tool_calls)) => {
                let output = new_messages
                    .last()
                    .and_then(|m| m.content.clone())
                    .unwrap_or_default();

                self.history.push(Exchange {
                    at: Utc::now(),
                    usage,
                    messages: new_messages,
                });
                trim_to_window(&mut self.history, self.settings.session_window);
                self.persist().await;

                self.sink.log(&format!(
                    "Run finished in {:.1}s: {} model calls, {} tool calls, tokens {}/{}/{}",
                    started.elapsed().as_secs_f64(),
                    model_calls,
                    tool_calls,
                    usage.prompt_tokens,
                    usage.completion_tokens,
                    usage.total_tokens
                ));
                self.sink.log(&format!("Output: {}", output));

                Ok(ExecutionResult {
                    output,
                    usage,
                    model_calls,
                    tool_calls,
                })
            }
            Err(e) => {
                self.stats.failures += 1;
                self.sink.log(&format!("Run failed: {}", e));
                Err(e)
            }
        }
    }

    /// Model/tool round trips until the model answers without requesting a
    /// tool. Returns the messages this run added, starting with the
    /// invocation.
    async fn run_tool_loop(
        &self,
        invocation: &str,
        usage: &mut TokenUsage,
    ) -> Result<(Vec<ChatMessage>, usize, usize), ExecutionError> {
        let schemas = self.definition.tools.schemas();
        let tools = (!schemas.is_empty()).then_some(schemas.as_slice());
        let ctx = ToolContext {
            agent: self.descriptor.name.clone(),
            lookback_minutes: self.descriptor.lookback_minutes,
            period_hours: self.descriptor.period_hours(),
        };

        let mut messages = Vec::with_capacity(2 + self.history.len() * 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        for exchange in &self.history {
            messages.extend(exchange.messages.iter().cloned());
        }
        let first_new = messages.len();
        messages.push(ChatMessage::user(invocation));

        let mut tool_calls = 0;
        for model_calls in 1..=self.settings.max_tool_iterations {
            let options = ChatOptions {
                max_tokens: Some(self.definition.max_tokens),
                ..Default::default()
            };
            let response = self
                .llm
                .chat_completion_with_options(&self.definition.model, &messages, tools, options)
                .await
                .map_err(|e| ExecutionError::ExecutionFailed(e.to_string()))?;

            if let Some(u) = &response.usage {
                usage.add(u);
            }

            let requested = response.requested_tools().to_vec();
            if requested.is_empty() {
                messages.push(ChatMessage::assistant(response.content.unwrap_or_default()));
                return Ok((messages.split_off(first_new), model_calls, tool_calls));
            }

            messages.push(ChatMessage::assistant_tool_calls(response.content, requested.clone()));
            for call in &requested {
                tool_calls += 1;
                let result = self.invoke_tool(call, &ctx).await;
                messages.push(ChatMessage::tool_result(call.id.clone(), result));
            }
        }

        Err(ExecutionError::ExecutionFailed(format!(
            "model still requesting tools after {} iterations",
            self.settings.max_tool_iterations
        )))
    }

    /// Tool failures go back to the model as text; they do not fail the run.
    async fn invoke_tool(&self, call: &ToolCall, ctx: &ToolContext) -> String {
        let name = call.function.name.as_str();
        self.sink.log(&format!("Tool call: {} {}", name, call.function.arguments));
        tracing::debug!(agent = %ctx.agent, tool = %name, "Invoking tool");

        let args: Value = if call.function.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(&call.function.arguments) {
                Ok(args) => args,
                Err(e) => {
                    self.sink.log(&format!("Tool error: {}: invalid arguments: {}", name, e));
                    return format!("Tool error: invalid arguments: {}", e);
                }
            }
        };

        match self.definition.tools.execute(name, args, ctx).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(agent = %ctx.agent, tool = %name, error = %e, "Tool failed");
                self.sink.log(&format!("Tool error: {}: {}", name, e));
                format!("Tool error: {}", e)
            }
        }
    }

    async fn persist(&self) {
        if let Err(e) = self.store.save_session(self.name(), &self.history).await {
            tracing::warn!(agent = %self.name(), error = %e, "Failed to save session");
            self.sink.log(&format!("Failed to save session: {}", e));
        }
    }
}

/// Drop the oldest exchanges beyond `window`.
fn trim_to_window(history: &mut Vec<Exchange>, window: usize) {
    if history.len() > window {
        let excess = history.len() - window;
        history.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::log_sink::MemoryLogSink;
    use crate::agents::session::FileSessionStore;
    use crate::llm::testing::{Reply, ScriptedLlm};
    use crate::llm::Role;
    use crate::tools::testing::registry_with;
    use serde_json::json;
    use std::path::Path;

    struct Fixture {
        dir: tempfile::TempDir,
        loader: DefinitionLoader,
        sink: Arc<MemoryLogSink>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(dir.path().join("agents")).unwrap();
            let loader = DefinitionLoader::new(
                dir.path().join("agents"),
                Arc::new(registry_with(&["echo"])),
            );
            let fixture = Self {
                dir,
                loader,
                sink: Arc::new(MemoryLogSink::new()),
            };
            fixture.write_definition("ops", "Watch {period_minutes} minutes ({period_hours}h).");
            fixture
        }

        fn write_definition(&self, name: &str, prompt: &str) {
            std::fs::write(
                self.agents_dir().join(format!("{}.md", name)),
                format!("---\ntools: [echo]\nmodel: claude-test\n---\n{}\n", prompt),
            )
            .unwrap();
        }

        fn agents_dir(&self) -> std::path::PathBuf {
            self.dir.path().join("agents")
        }

        fn store(&self) -> Arc<FileSessionStore> {
            Arc::new(FileSessionStore::new(self.dir.path().join("sessions")))
        }

        async fn runtime(&self, llm: Arc<ScriptedLlm>, settings: RuntimeSettings) -> AgentRuntime {
            AgentRuntime::instantiate(
                AgentDescriptor::interval("ops", "1h", 3600),
                self.loader.load("ops").unwrap(),
                self.store(),
                self.sink.clone(),
                llm,
                settings,
            )
            .await
            .unwrap()
        }
    }

    fn session_path(dir: &Path) -> std::path::PathBuf {
        dir.join("sessions").join("ops.json")
    }

    #[tokio::test]
    async fn test_instantiate_renders_prompt() {
        let fx = Fixture::new();
        let rt = fx
            .runtime(Arc::new(ScriptedLlm::new(vec![])), RuntimeSettings::default())
            .await;
        assert_eq!(rt.system_prompt(), "Watch 66 minutes (2h).");
        assert!(rt.history().is_empty());
    }

    #[tokio::test]
    async fn test_execute_runs_tool_loop_and_persists() {
        let fx = Fixture::new();
        let llm = Arc::new(ScriptedLlm::new(vec![
            Reply::Tools(vec![("echo", json!({"hours": 2})), ("echo", json!({"fail": true}))]),
            Reply::Text("All quiet.".to_string()),
        ]));
        let mut rt = fx.runtime(llm.clone(), RuntimeSettings::default()).await;

        let result = rt.execute("Scheduled run").await.unwrap();
        assert_eq!(result.output, "All quiet.");
        assert_eq!(result.model_calls, 2);
        assert_eq!(result.tool_calls, 2);
        assert_eq!(result.usage, TokenUsage::new(20, 10));

        let requests = llm.requests();
        assert_eq!(requests[0][0], ChatMessage::system("Watch 66 minutes (2h)."));
        let second = &requests[1];
        let results: Vec<&str> = second
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.content.as_deref())
            .collect();
        assert_eq!(results[0], r#"echo for ops (2h): {"hours":2}"#);
        assert_eq!(results[1], "Tool error: echo asked to fail");

        let exchange = &rt.history()[0];
        assert_eq!(exchange.messages.first(), Some(&ChatMessage::user("Scheduled run")));
        assert_eq!(exchange.messages.last(), Some(&ChatMessage::assistant("All quiet.")));
        assert_eq!(exchange.messages.len(), 5);
        assert!(session_path(fx.dir.path()).exists());

        assert!(fx.sink.contains("Tool call: echo"));
        assert!(fx.sink.contains("Run finished"));
    }

    #[tokio::test]
    async fn test_history_is_sent_and_survives_restart() {
        let fx = Fixture::new();
        let mut rt = fx
            .runtime(Arc::new(ScriptedLlm::new(vec![])), RuntimeSettings::default())
            .await;
        rt.execute("first").await.unwrap();

        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let mut restarted = fx.runtime(llm.clone(), RuntimeSettings::default()).await;
        assert_eq!(restarted.history().len(), 1);

        restarted.execute("second").await.unwrap();
        let sent = &llm.requests()[0];
        assert_eq!(
            sent[1..].to_vec(),
            vec![
                ChatMessage::user("first"),
                ChatMessage::assistant("ok"),
                ChatMessage::user("second"),
            ]
        );
    }

    #[tokio::test]
    async fn test_sliding_window_drops_oldest() {
        let fx = Fixture::new();
        let settings = RuntimeSettings {
            session_window: 2,
            ..Default::default()
        };
        let mut rt = fx.runtime(Arc::new(ScriptedLlm::new(vec![])), settings).await;
        for n in 1..=3 {
            rt.execute(&format!("run {}", n)).await.unwrap();
        }

        let firsts: Vec<_> = rt
            .history()
            .iter()
            .map(|e| e.messages[0].content.clone().unwrap())
            .collect();
        assert_eq!(firsts, vec!["run 2", "run 3"]);

        let reloaded = fx
            .runtime(Arc::new(ScriptedLlm::new(vec![])), settings)
            .await;
        assert_eq!(reloaded.history().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_run_is_not_persisted() {
        let fx = Fixture::new();
        let llm = Arc::new(ScriptedLlm::new(vec![Reply::Fail("upstream 529".to_string())]));
        let mut rt = fx.runtime(llm, RuntimeSettings::default()).await;

        let err = rt.execute("go").await.unwrap_err();
        assert!(err.to_string().contains("upstream 529"));
        assert!(rt.history().is_empty());
        assert!(!session_path(fx.dir.path()).exists());
        assert_eq!(rt.stats().runs, 1);
        assert_eq!(rt.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_tool_iteration_cap() {
        let fx = Fixture::new();
        let llm = Arc::new(ScriptedLlm::new(vec![
            Reply::Tools(vec![("echo", json!({}))]),
            Reply::Tools(vec![("echo", json!({}))]),
            Reply::Tools(vec![("echo", json!({}))]),
        ]));
        let settings = RuntimeSettings {
            max_tool_iterations: 3,
            ..Default::default()
        };
        let mut rt = fx.runtime(llm.clone(), settings).await;

        assert!(matches!(
            rt.execute("loop").await,
            Err(ExecutionError::ExecutionFailed(_))
        ));
        assert_eq!(llm.calls(), 3);
        assert!(rt.history().is_empty());
        assert_eq!(rt.stats().usage, TokenUsage::new(30, 15));
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_definition_and_history() {
        let fx = Fixture::new();
        let mut rt = fx
            .runtime(Arc::new(ScriptedLlm::new(vec![])), RuntimeSettings::default())
            .await;
        rt.execute("first").await.unwrap();

        fx.write_definition("ops", "Updated {period_hours}h.");
        assert!(rt.refresh_definition(&fx.loader));
        assert_eq!(rt.system_prompt(), "Updated 2h.");

        std::fs::write(fx.agents_dir().join("ops.md"), "---\ntools: [nope]\nmodel: m\n---\nbroken").unwrap();
        assert!(!rt.refresh_definition(&fx.loader));
        assert_eq!(rt.system_prompt(), "Updated 2h.");
        assert_eq!(rt.definition().prompt_template, "Updated {period_hours}h.");
        assert_eq!(rt.definition().tools.names(), vec!["echo"]);
        assert_eq!(rt.history().len(), 1);
        assert!(fx.sink.contains("Definition reload failed"));
    }

    #[tokio::test]
    async fn test_corrupt_session_starts_empty() {
        let fx = Fixture::new();
        std::fs::create_dir_all(fx.dir.path().join("sessions")).unwrap();
        std::fs::write(session_path(fx.dir.path()), b"garbage").unwrap();

        let rt = fx
            .runtime(Arc::new(ScriptedLlm::new(vec![])), RuntimeSettings::default())
            .await;
        assert!(rt.history().is_empty());
        assert!(fx.sink.contains("Session reset"));
    }
}
