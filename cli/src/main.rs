// Copyright (c) 2026 Cadre Contributors
// SPDX-License-Identifier: AGPL-3.0

//! # Cadre node binary
//!
//! Loads the YAML configuration, assembles the runtime (bus, global state,
//! orchestrator, scheduler, agents, timer engine, optional SQLite store),
//! and serves the HTTP control surface until a shutdown signal arrives.
//! Components are then stopped in dependency order: timer, scheduler,
//! agents.
//!
//! Any construction failure (unreadable config, duplicate agent name,
//! unresolved LLM model) aborts with a non-zero exit before the system
//! starts.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use cadre_core::application::agent::Agent;
use cadre_core::application::orchestrator::Orchestrator;
use cadre_core::application::scheduler::{AutoScheduler, TaskDispatcher};
use cadre_core::application::timer::TimerEngine;
use cadre_core::domain::config::Config;
use cadre_core::infrastructure::bus::MailboxBus;
use cadre_core::infrastructure::llm::ProviderRegistry;
use cadre_core::infrastructure::persistence::SqliteStore;
use cadre_core::infrastructure::skills::SkillLibrary;
use cadre_core::presentation::api::{self, AppState};

/// Cadre node - run the multi-agent runtime
#[derive(Parser)]
#[command(name = "cadre")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(
        short,
        long,
        env = "CADRE_CONFIG_PATH",
        value_name = "FILE",
        default_value = "config.yaml"
    )]
    config: PathBuf,

    /// HTTP API host
    #[arg(long, env = "CADRE_HOST", default_value = "127.0.0.1")]
    host: String,

    /// HTTP API port
    #[arg(long, env = "CADRE_PORT", default_value = "8000")]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CADRE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    info!("Cadre node starting");

    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load configuration {}", cli.config.display()))?;

    if config.agents.is_empty() {
        eprintln!("{}", "No agents configured; nothing to run.".yellow());
        anyhow::bail!("configuration defines no agents");
    }

    let registry = ProviderRegistry::from_config(&config.llm);

    let store = match &config.db {
        Some(db) => {
            let store = SqliteStore::open(&db.name)
                .await
                .with_context(|| format!("failed to open database {}.db", db.name))?;
            let tasks = store.task_count().await?;
            let executions = store.execution_count().await?;
            info!(db = %db.name, tasks, executions, "sqlite store opened");
            Some(Arc::new(store))
        }
        None => None,
    };

    let bus = MailboxBus::new();
    let global_state = bus.global_state();
    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&bus)));

    let tick_interval = config.scheduler.as_ref().and_then(|s| s.tick_interval);
    let mut scheduler = AutoScheduler::new(
        Arc::clone(&orchestrator) as Arc<dyn TaskDispatcher>,
        Arc::clone(&global_state),
        tick_interval,
    );
    if let Some(store) = &store {
        scheduler = scheduler.with_store(Arc::clone(store));
    }
    let scheduler = Arc::new(scheduler);

    info!(count = config.agents.len(), "creating agents");
    let mut agents = Vec::new();
    for agent_config in &config.agents {
        let llm = registry
            .resolve(&agent_config.model)
            .with_context(|| format!("agent '{}' references an unknown model", agent_config.name))?;

        let skills = match &agent_config.skill_dir {
            Some(dir) => SkillLibrary::load_directory(dir).await,
            None => SkillLibrary::empty(),
        };

        let agent = Agent::from_config(agent_config, llm, Arc::clone(&bus), skills);

        bus.register_mailbox(agent.name(), agent.mailbox())
            .with_context(|| format!("failed to register mailbox for '{}'", agent.name()))?;
        orchestrator.register_agent(Arc::clone(&agent));
        scheduler.add_agent(agent.name(), agent.max_tasks(), agent.hierarchy());

        let submit_target = Arc::clone(&scheduler);
        agent.set_task_submitter(Arc::new(move |task, priority| {
            submit_target.add_task(task, priority);
        }));
        let complete_target = Arc::clone(&scheduler);
        agent.set_completion_hook(Arc::new(move |task_id: &str, agent_name: &str, success: bool| {
            complete_target.on_task_complete(task_id, agent_name, success);
        }));

        if let Some(store) = &store {
            agent.set_store(Arc::clone(store));
            if let Err(e) = store.save_agent(agent_config).await {
                tracing::warn!(agent = %agent_config.name, error = %e, "failed to persist agent config");
            }
        }

        Arc::clone(&agent).start()?;
        agents.push(agent);
    }

    Arc::clone(&scheduler).start();

    let timer = Arc::new(TimerEngine::new(
        Arc::clone(&scheduler),
        config.timer.as_ref(),
    ));
    Arc::clone(&timer).start();

    info!(
        agent_count = agents.len(),
        queue_length = scheduler.queue_len(),
        "system initialized"
    );

    // HTTP control surface.
    let shutdown_token = CancellationToken::new();
    let app = api::router(AppState {
        scheduler: Arc::clone(&scheduler),
        orchestrator: Arc::clone(&orchestrator),
        bus: Arc::clone(&bus),
        shutdown: shutdown_token.clone(),
    });

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    info!(%addr, "HTTP API listening");
    println!("{}", format!("Cadre node ready on http://{addr}").green());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_token))
        .await
        .context("HTTP server failed")?;

    // Ordered stop: no new injections, then no new dispatches, then drain
    // the agents.
    info!("stopping timer engine");
    timer.stop().await;
    info!("stopping scheduler");
    scheduler.stop().await;
    info!("stopping agents");
    for agent in &agents {
        agent.stop().await;
    }

    info!("shutdown complete");
    Ok(())
}

/// Resolves when ctrl-c or SIGTERM arrives, or when `/api/shutdown` cancels
/// the token.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
        _ = token.cancelled() => info!("shutdown requested via API"),
    }
}

/// Initialize the tracing subscriber.
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}
