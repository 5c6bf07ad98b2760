//! agent-scheduler binary.
//!
//! Loads configuration from the environment (and `.env`), starts the trigger
//! listener, and runs the scheduler until SIGINT/SIGTERM.

use std::sync::Arc;

use agent_scheduler::agents::{DefinitionLoader, FileLogSink, FileSessionStore, LogSink};
use agent_scheduler::llm::{AnthropicClient, AnthropicConfig};
use agent_scheduler::scheduler::{SchedulerContext, SchedulerCore, SystemClock, DEFAULT_POLL_INTERVAL};
use agent_scheduler::tools::ToolRegistry;
use agent_scheduler::Config;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("agent_scheduler=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    tracing::info!(
        agents = config.agents.len(),
        agents_dir = %config.agents_dir.display(),
        sessions_dir = %config.sessions_dir.display(),
        logs_dir = %config.logs_dir.display(),
        webhook_addr = %config.webhook_addr,
        session_window = config.settings.session_window,
        "Starting agent scheduler"
    );
    for agent in &config.agents {
        tracing::info!(
            agent = %agent.name,
            trigger = %agent.trigger_mode,
            cadence = %agent.cadence,
            lookback_minutes = agent.lookback_minutes,
            "Configured agent"
        );
    }

    let registry = Arc::new(ToolRegistry::from_env());
    tracing::info!(tools = ?registry.names(), "Tool registry ready");

    let llm = AnthropicClient::new(
        AnthropicConfig::new(config.anthropic_api_key.clone())
            .with_base_url(config.anthropic_base_url.clone()),
    );

    let logs_dir = config.logs_dir.clone();
    let ctx = SchedulerContext {
        loader: DefinitionLoader::new(config.agents_dir.clone(), registry),
        store: Arc::new(FileSessionStore::new(config.sessions_dir.clone())),
        llm: Arc::new(llm),
        sinks: Arc::new(move |name: &str| Arc::new(FileLogSink::new(&logs_dir, name)) as Arc<dyn LogSink>),
        settings: config.settings,
        clock: Arc::new(SystemClock),
        listen_addr: Some(config.webhook_addr),
        poll_interval: DEFAULT_POLL_INTERVAL,
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let mut scheduler = SchedulerCore::initialize(config.agents, ctx, shutdown).await?;
    scheduler.run().await;

    tracing::info!("Agent scheduler stopped");
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down after the current run"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down after the current run"),
    }

    shutdown.cancel();
}
