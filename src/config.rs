//! Configuration management.
//!
//! Configuration is read from environment variables (after `.env`, if one
//! exists):
//! - `AGENTS` - Required. Roster, e.g. `server-monitor:1h,on-call:webhook`
//! - `ANTHROPIC_API_KEY` - Required. Model API credential
//! - `ANTHROPIC_BASE_URL` - Optional. Defaults to `https://api.anthropic.com`
//! - `AGENTS_DIR` - Optional. Definition directory, defaults to `./agents`
//! - `SESSIONS_DIR` - Optional. Session directory, defaults to `./sessions`
//! - `LOGS_DIR` - Optional. Per-agent log directory, defaults to `./logs`
//! - `WEBHOOK_HOST` / `WEBHOOK_PORT` - Optional. Listener address, defaults to `0.0.0.0:8080`
//! - `SESSION_WINDOW` - Optional. Exchanges kept per agent, defaults to `20`
//! - `MAX_TOOL_ITERATIONS` - Optional. Model calls per run, defaults to `25`
//!
//! Tool settings (`OPENSEARCH_*`, `DISCORD_WEBHOOK_URL`, `REPORT_OUTPUT_DIR`)
//! are read by the tools themselves and are not required at startup.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use thiserror::Error;

use crate::agents::{RuntimeSettings, DEFAULT_MAX_TOOL_ITERATIONS, DEFAULT_SESSION_WINDOW};
use crate::roster::{parse_roster, AgentDescriptor, RosterError};

const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_WEBHOOK_PORT: u16 = 8080;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(String),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: String, reason: String },

    #[error("invalid AGENTS roster: {0}")]
    Roster(#[from] RosterError),

    #[error("AGENTS roster is empty; nothing to run")]
    EmptyRoster,
}

/// Process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub agents: Vec<AgentDescriptor>,
    pub agents_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub webhook_addr: SocketAddr,
    pub settings: RuntimeSettings,
    pub anthropic_api_key: String,
    pub anthropic_base_url: String,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| get(key).ok_or_else(|| ConfigError::Missing(key.to_string()));
        let path_or = |key: &str, default: &str| PathBuf::from(get(key).unwrap_or_else(|| default.to_string()));

        let agents = parse_roster(&require("AGENTS")?)?;
        if agents.is_empty() {
            return Err(ConfigError::EmptyRoster);
        }

        let host = match get("WEBHOOK_HOST") {
            Some(host) => host.trim().parse::<IpAddr>().map_err(|e| ConfigError::Invalid {
                var: "WEBHOOK_HOST".to_string(),
                reason: e.to_string(),
            })?,
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        let port: u16 = parse_or("WEBHOOK_PORT", get("WEBHOOK_PORT"), DEFAULT_WEBHOOK_PORT)?;

        let settings = RuntimeSettings {
            session_window: parse_positive("SESSION_WINDOW", get("SESSION_WINDOW"), DEFAULT_SESSION_WINDOW)?,
            max_tool_iterations: parse_positive(
                "MAX_TOOL_ITERATIONS",
                get("MAX_TOOL_ITERATIONS"),
                DEFAULT_MAX_TOOL_ITERATIONS,
            )?,
        };

        Ok(Self {
            agents,
            agents_dir: path_or("AGENTS_DIR", "./agents"),
            sessions_dir: path_or("SESSIONS_DIR", "./sessions"),
            logs_dir: path_or("LOGS_DIR", "./logs"),
            webhook_addr: SocketAddr::new(host, port),
            settings,
            anthropic_api_key: require("ANTHROPIC_API_KEY")?,
            anthropic_base_url: get("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string()),
        })
    }
}

fn parse_or<T>(var: &str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var: var.to_string(),
            reason: format!("{:?}: {}", v, e),
        }),
        None => Ok(default),
    }
}

fn parse_positive(var: &str, value: Option<String>, default: usize) -> Result<usize, ConfigError> {
    let n = parse_or(var, value, default)?;
    if n == 0 {
        return Err(ConfigError::Invalid {
            var: var.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(n)
}
