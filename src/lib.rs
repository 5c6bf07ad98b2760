//! # agent_scheduler
//!
//! Runs long-lived LLM agents on wall-clock intervals and on webhook
//! triggers, one run at a time, with per-agent conversation history that
//! survives restarts and behavior definitions that reload between runs.
//!
//! ## Architecture
//!
//! - `roster`: `AGENTS=name:cadence,...` parsing
//! - `agents`: definitions, sessions, and the per-agent runtime
//! - `scheduler`: the single-writer main loop
//! - `api`: the webhook trigger listener
//! - `tools`: capabilities agents can declare
//! - `llm`: model client

pub mod agents;
pub mod api;
pub mod config;
pub mod llm;
pub mod roster;
pub mod scheduler;
pub mod tools;

pub use config::{Config, ConfigError};
pub use scheduler::{LifecycleState, SchedulerCore, SchedulerError};
