//! Scheduler core - decides when each agent runs.
//!
//! Two trigger sources feed one sequential execution stream: interval due
//! times (the [`ScheduleTable`]) and webhook events (the [`TriggerQueue`]).
//!
//! # Invariants
//! - Runs never overlap, across all agents.
//! - Only the main loop touches runtimes and the schedule table; the listener
//!   only pushes to the queue.
//! - Each loop pass drains webhook triggers before evaluating interval agents.
//! - After an interval run, success or failure, the next due time is the
//!   completion time plus the interval.
//! - Shutdown is observed between runs; a run in progress always finishes.

mod clock;
mod queue;

pub use clock::{Clock, ManualClock, SystemClock};
pub use queue::TriggerQueue;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agents::{AgentRuntime, DefinitionLoader, LogSink, RuntimeSettings, SessionStore};
use crate::api::TriggerListener;
use crate::llm::LlmClient;
use crate::roster::{AgentDescriptor, TriggerMode};

/// Granularity of the idle wait.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no agents could be started")]
    StartupFailure,

    #[error("trigger listener failed: {0}")]
    Listener(String),
}

/// Scheduler lifecycle. Only the main loop moves it forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Initializing,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Next-due Unix timestamps for interval agents.
#[derive(Debug, Clone, Default)]
pub struct ScheduleTable {
    due: HashMap<String, i64>,
}

impl ScheduleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, due_at: i64) {
        self.due.insert(name.into(), due_at);
    }

    pub fn due_at(&self, name: &str) -> Option<i64> {
        self.due.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.due.len()
    }

    pub fn is_empty(&self) -> bool {
        self.due.is_empty()
    }

    /// Earliest entry; ties go to the alphabetically first name.
    pub fn next(&self) -> Option<(&str, i64)> {
        self.due
            .iter()
            .map(|(name, due)| (name.as_str(), *due))
            .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))
    }

    /// Every entry due at or before `now`, earliest first, ties by name.
    pub fn due_by(&self, now: i64) -> Vec<String> {
        let mut due: Vec<(&str, i64)> = self
            .due
            .iter()
            .filter(|(_, due)| **due <= now)
            .map(|(name, due)| (name.as_str(), *due))
            .collect();
        due.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        due.into_iter().map(|(name, _)| name.to_string()).collect()
    }
}

/// Builds the log sink for one agent.
pub type SinkFactory = Arc<dyn Fn(&str) -> Arc<dyn LogSink> + Send + Sync>;

/// Everything the scheduler needs to build and drive runtimes.
pub struct SchedulerContext {
    pub loader: DefinitionLoader,
    pub store: Arc<dyn SessionStore>,
    pub llm: Arc<dyn LlmClient>,
    pub sinks: SinkFactory,
    pub settings: RuntimeSettings,
    pub clock: Arc<dyn Clock>,
    /// Where to bind the trigger listener; `None` runs without one.
    pub listen_addr: Option<SocketAddr>,
    pub poll_interval: Duration,
}

pub struct SchedulerCore {
    runtimes: BTreeMap<String, AgentRuntime>,
    schedule: ScheduleTable,
    queue: Arc<TriggerQueue>,
    loader: DefinitionLoader,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    listener: Option<TriggerListener>,
    shutdown: CancellationToken,
    state_tx: watch::Sender<LifecycleState>,
}

impl SchedulerCore {
    /// Build a runtime per descriptor, the schedule table, and the listener.
    ///
    /// Agents whose definition or session cannot be loaded are skipped with a
    /// warning; only an empty result is fatal.
    pub async fn initialize(
        descriptors: Vec<AgentDescriptor>,
        ctx: SchedulerContext,
        shutdown: CancellationToken,
    ) -> Result<Self, SchedulerError> {
        let (state_tx, _) = watch::channel(LifecycleState::Initializing);

        let mut runtimes = BTreeMap::new();
        for descriptor in descriptors {
            let name = descriptor.name.clone();
            let definition = match ctx.loader.load(&name) {
                Ok(definition) => definition,
                Err(e) => {
                    tracing::warn!(agent = %name, error = %e, "Skipping agent: definition failed to load");
                    continue;
                }
            };
            let runtime = AgentRuntime::instantiate(
                descriptor,
                definition,
                Arc::clone(&ctx.store),
                (ctx.sinks)(&name),
                Arc::clone(&ctx.llm),
                ctx.settings,
            )
            .await;
            match runtime {
                Ok(runtime) => {
                    runtimes.insert(name, runtime);
                }
                Err(e) => {
                    tracing::warn!(agent = %name, error = %e, "Skipping agent: session failed to load");
                }
            }
        }

        if runtimes.is_empty() {
            tracing::error!("No agents loaded successfully");
            return Err(SchedulerError::StartupFailure);
        }

        let now = ctx.clock.now();
        let mut schedule = ScheduleTable::new();
        for runtime in runtimes.values().filter(|r| r.descriptor().is_interval()) {
            schedule.set(runtime.name(), now);
        }

        let queue = Arc::new(TriggerQueue::new(runtimes.keys().cloned()));

        let listener = match ctx.listen_addr {
            Some(addr) => Some(
                TriggerListener::start(addr, Arc::clone(&queue))
                    .await
                    .map_err(|e| SchedulerError::Listener(format!("failed to bind {}: {}", addr, e)))?,
            ),
            None => None,
        };

        tracing::info!(
            agents = runtimes.len(),
            interval_agents = schedule.len(),
            webhook_agents = runtimes.len() - schedule.len(),
            "Scheduler initialized"
        );

        Ok(Self {
            runtimes,
            schedule,
            queue,
            loader: ctx.loader,
            clock: ctx.clock,
            poll_interval: ctx.poll_interval,
            listener,
            shutdown,
            state_tx,
        })
    }

    pub fn queue(&self) -> Arc<TriggerQueue> {
        Arc::clone(&self.queue)
    }

    pub fn schedule(&self) -> &ScheduleTable {
        &self.schedule
    }

    pub fn runtime(&self, name: &str) -> Option<&AgentRuntime> {
        self.runtimes.get(name)
    }

    pub fn agent_names(&self) -> Vec<&str> {
        self.runtimes.keys().map(String::as_str).collect()
    }

    pub fn listener_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(TriggerListener::local_addr)
    }

    pub fn state(&self) -> LifecycleState {
        *self.state_tx.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: LifecycleState) {
        self.state_tx.send_replace(state);
        tracing::info!(state = %state, "Scheduler state changed");
    }

    /// Main loop. Returns once shutdown has been requested, the current run
    /// has finished, and the listener has stopped.
    pub async fn run(&mut self) {
        self.set_state(LifecycleState::Running);

        while !self.shutdown.is_cancelled() {
            self.run_iteration().await;
            if self.shutdown.is_cancelled() {
                break;
            }
            self.wait_for_work().await;
        }

        self.set_state(LifecycleState::Draining);
        let dropped = self.queue.drain();
        if !dropped.is_empty() {
            tracing::warn!(dropped = ?dropped, "Discarding queued triggers at shutdown");
        }
        if let Some(mut listener) = self.listener.take() {
            listener.shutdown().await;
        }
        self.set_state(LifecycleState::Stopped);
    }

    /// One pass: queued webhook runs in arrival order, then every interval
    /// agent that is due. Returns the number of runs executed.
    pub async fn run_iteration(&mut self) -> usize {
        let mut runs = 0;

        let queued = self.queue.drain();
        for (i, name) in queued.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                tracing::warn!(skipped = queued.len() - i, "Shutdown requested, skipping queued triggers");
                return runs;
            }
            if !self.runtimes.contains_key(name) {
                tracing::warn!(agent = %name, "Ignoring trigger for unknown agent");
                continue;
            }
            self.run_agent(name, TriggerMode::Webhook).await;
            runs += 1;
        }

        let now = self.clock.now();
        for name in self.schedule.due_by(now) {
            if self.shutdown.is_cancelled() {
                return runs;
            }
            self.run_agent(&name, TriggerMode::Interval).await;
            runs += 1;

            let interval = self
                .runtimes
                .get(&name)
                .and_then(|r| r.descriptor().interval_seconds)
                .unwrap_or(0);
            let next = self
                .clock
                .now()
                .saturating_add(i64::try_from(interval).unwrap_or(i64::MAX));
            self.schedule.set(name.as_str(), next);
            tracing::debug!(agent = %name, next_due = next, "Rescheduled");
        }

        runs
    }

    /// Sleep until the next interval agent is due, a trigger arrives, or
    /// shutdown is requested, never longer than one poll interval.
    async fn wait_for_work(&self) {
        let sleep_for = match self.schedule.next() {
            Some((_, due)) => {
                let remaining = due.saturating_sub(self.clock.now());
                if remaining <= 0 {
                    return;
                }
                self.poll_interval.min(Duration::from_secs(remaining as u64))
            }
            None => self.poll_interval,
        };

        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = self.queue.notified() => {}
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }

    async fn run_agent(&mut self, name: &str, trigger: TriggerMode) {
        let Some(runtime) = self.runtimes.get_mut(name) else {
            return;
        };

        runtime.refresh_definition(&self.loader);

        let run_id = Uuid::new_v4();
        let message = invocation_message(runtime.descriptor(), trigger, self.clock.as_ref());
        let started = Instant::now();
        tracing::info!(agent = %name, trigger = %trigger, run_id = %run_id, "Starting run");

        match runtime.execute(&message).await {
            Ok(result) => {
                tracing::info!(
                    agent = %name,
                    trigger = %trigger,
                    run_id = %run_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    model_calls = result.model_calls,
                    tool_calls = result.tool_calls,
                    prompt_tokens = result.usage.prompt_tokens,
                    completion_tokens = result.usage.completion_tokens,
                    total_tokens = result.usage.total_tokens,
                    "Run completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    agent = %name,
                    trigger = %trigger,
                    run_id = %run_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "Run failed"
                );
            }
        }

        let stats = runtime.stats();
        tracing::info!(
            agent = %name,
            runs = stats.runs,
            failures = stats.failures,
            total_tokens = stats.usage.total_tokens,
            "Agent totals"
        );
    }
}

/// The user message that opens a run.
fn invocation_message(descriptor: &AgentDescriptor, trigger: TriggerMode, clock: &dyn Clock) -> String {
    let at = clock.now_utc().to_rfc3339();
    match trigger {
        TriggerMode::Interval => format!(
            "Scheduled run (every {}) at {}. Cover the last {} minutes.",
            descriptor.cadence, at, descriptor.lookback_minutes
        ),
        TriggerMode::Webhook => format!(
            "Webhook-triggered run at {}. Cover the last {} minutes.",
            at, descriptor.lookback_minutes
        ),
    }
}
