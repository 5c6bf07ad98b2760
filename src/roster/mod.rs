//! Agent roster parsing.
//!
//! The roster is a comma-separated list of `name:cadence` entries, where the
//! cadence is either `webhook` or a duration understood by [`parse_duration`]:
//!
//! ```text
//! AGENTS=server-monitor:1h,weekly-digest:1w,on-call:webhook
//! ```

mod duration;

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

pub use duration::parse_duration;

/// Lookback window for webhook-triggered agents, which have no cadence to derive one from.
pub const DEFAULT_WEBHOOK_LOOKBACK_MINUTES: u64 = 60;

/// Cadence token that marks an agent as event-driven only.
const WEBHOOK_TOKEN: &str = "webhook";

/// Errors produced while parsing the roster or a cadence string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RosterError {
    #[error("invalid duration format: {0:?} (expected <int><m|h|d|w>, e.g. 30m, 24h)")]
    InvalidFormat(String),

    #[error("invalid roster entry: {0:?} (expected name:cadence)")]
    InvalidEntry(String),

    #[error("agent {0:?} appears more than once in the roster")]
    DuplicateAgent(String),
}

/// How an agent gets triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerMode {
    /// Runs on a fixed wall-clock cadence.
    Interval,
    /// Runs only when the inbound listener receives a trigger.
    Webhook,
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval => write!(f, "interval"),
            Self::Webhook => write!(f, "webhook"),
        }
    }
}

/// One parsed roster entry. Immutable after startup.
///
/// # Invariants
/// - `interval_seconds.is_some() == (trigger_mode == TriggerMode::Interval)`
/// - for interval agents, `lookback_minutes * 60 >= interval_seconds`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDescriptor {
    pub name: String,
    pub trigger_mode: TriggerMode,
    pub interval_seconds: Option<u64>,
    pub lookback_minutes: u64,
    /// The cadence exactly as written in the roster, for log lines.
    pub cadence: String,
}

impl AgentDescriptor {
    /// Descriptor for an interval agent. The lookback carries a 10% buffer so
    /// consecutive windows always overlap.
    pub fn interval(name: impl Into<String>, cadence: impl Into<String>, interval_seconds: u64) -> Self {
        Self {
            name: name.into(),
            trigger_mode: TriggerMode::Interval,
            interval_seconds: Some(interval_seconds),
            lookback_minutes: lookback_minutes_for(interval_seconds),
            cadence: cadence.into(),
        }
    }

    /// Descriptor for a webhook-only agent.
    pub fn webhook(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trigger_mode: TriggerMode::Webhook,
            interval_seconds: None,
            lookback_minutes: DEFAULT_WEBHOOK_LOOKBACK_MINUTES,
            cadence: WEBHOOK_TOKEN.to_string(),
        }
    }

    pub fn is_interval(&self) -> bool {
        self.trigger_mode == TriggerMode::Interval
    }

    /// Lookback rounded up to whole hours, at least one.
    pub fn period_hours(&self) -> u64 {
        self.lookback_minutes.div_ceil(60).max(1)
    }
}

/// `round(interval_seconds / 60 * 1.1)` in integer arithmetic (half rounds up).
fn lookback_minutes_for(interval_seconds: u64) -> u64 {
    (interval_seconds.saturating_mul(11).saturating_add(300) / 600).max(1)
}

/// Parse a roster string into descriptors, preserving order.
///
/// Blank entries are skipped. An empty or whitespace-only roster yields an
/// empty list; callers treat that as a startup error.
pub fn parse_roster(roster: &str) -> Result<Vec<AgentDescriptor>, RosterError> {
    let mut descriptors = Vec::new();
    let mut seen = HashSet::new();

    for raw in roster.split(',') {
        let entry = raw.trim();
        if entry.is_empty() {
            continue;
        }

        let (name, cadence) = entry
            .split_once(':')
            .ok_or_else(|| RosterError::InvalidEntry(entry.to_string()))?;
        let name = name.trim();
        let cadence = cadence.trim();
        if name.is_empty() {
            return Err(RosterError::InvalidEntry(entry.to_string()));
        }

        let descriptor = if cadence.eq_ignore_ascii_case(WEBHOOK_TOKEN) {
            AgentDescriptor::webhook(name)
        } else {
            AgentDescriptor::interval(name, cadence, parse_duration(cadence)?)
        };

        if !seen.insert(descriptor.name.clone()) {
            return Err(RosterError::DuplicateAgent(descriptor.name));
        }
        descriptors.push(descriptor);
    }

    Ok(descriptors)
}
