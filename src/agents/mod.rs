//! Agents module - definitions, persistent sessions, and the per-agent runtime.
//!
//! # Pieces
//! - **DefinitionLoader**: reads and validates `<name>.md` behavior definitions
//! - **SessionStore**: durable conversation history keyed by agent name
//! - **LogSink**: per-agent log trail
//! - **AgentRuntime**: one stateful executor per agent, owned by the scheduler
//!
//! # Design Principles
//! - Definitions are re-read before every run (hot reload)
//! - A bad reload never discards the working definition or the history
//! - Only successful runs touch persisted history

mod definition;
mod log_sink;
mod runtime;
mod session;

pub use definition::{AgentDefinition, DefinitionError, DefinitionLoader};
pub use log_sink::{FileLogSink, LogSink, MemoryLogSink};
pub use runtime::{
    AgentRuntime, ExecutionError, ExecutionResult, RuntimeSettings, RuntimeStats,
    DEFAULT_MAX_TOOL_ITERATIONS, DEFAULT_SESSION_WINDOW,
};
pub use session::{Exchange, FileSessionStore, SessionError, SessionStore};
