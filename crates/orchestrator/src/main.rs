//! `orchestrator`: webhook ingress, worker pool, and database migration
//! for the CI build-failure auto-fix pipeline.
//!
//! Grounded on `healer::main`'s `clap::Parser`/`Subcommand` CLI shape and
//! `tracing_subscriber` bootstrap with an `EnvFilter`, and
//! `healer::ci::server::run_server` for starting an `axum` listener
//! behind a bound `TcpListener`.

mod http;
mod prompt;
mod roles;
mod stage;
mod stages;
mod worker;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use git_driver::GitDriver;
use llm_client::{LlmClient, LlmClientConfig};
use orchestrator_config::Config;
use scm_client::{ScmClient, ScmClientConfig};
use task_store::TaskStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::http::AppState;
use crate::prompt::PromptBuilder;
use crate::stage::StageContext;

/// Hosting-provider REST calls get a generous retry budget; LLM calls are
/// retried at the diff-extraction level instead (see `llm_client`).
const SCM_MAX_RETRIES: u32 = 5;

#[derive(Parser)]
#[command(name = "orchestrator")]
#[command(about = "CI build-failure analysis, patch generation, and pull-request orchestrator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the webhook ingress HTTP server.
    Serve {
        /// Address to bind the HTTP listener to.
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: String,
    },
    /// Runs the claim/dispatch worker pool plus the lease reaper and
    /// working-directory retention sweep.
    Worker {
        /// Overrides `ORCHESTRATOR_MAX_CONCURRENT_TASKS` for this process.
        #[arg(long)]
        concurrency: Option<u32>,
    },
    /// Applies pending database migrations and exits.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("orchestrator=info")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let store = TaskStore::connect(config.database_url.expose(), config.max_concurrent_tasks.max(4)).await?;

    match cli.command {
        Commands::Migrate => {
            store.migrate().await?;
            info!("migrations applied");
        }
        Commands::Serve { addr } => {
            store.migrate().await?;
            run_serve(store, config, &addr).await?;
        }
        Commands::Worker { concurrency } => {
            store.migrate().await?;
            run_worker(store, config, concurrency).await?;
        }
    }

    Ok(())
}

async fn run_serve(store: TaskStore, config: Config, addr: &str) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(store, config));
    let app = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr, "orchestrator webhook ingress listening");
    axum::serve(listener, app).await?;

    Ok(())
}

async fn run_worker(store: TaskStore, config: Config, concurrency_override: Option<u32>) -> anyhow::Result<()> {
    let git = GitDriver::new(config.work_dir.root.clone());
    let llm = LlmClient::new(LlmClientConfig {
        base_url: config.llm.base_url.clone(),
        api_key: config.llm.api_key.expose().clone(),
        model: config.llm.model.clone(),
        max_tokens: config.llm.max_tokens,
        timeout_seconds: config.llm.timeout_seconds,
    })?;
    let scm = ScmClient::new(ScmClientConfig {
        base_url: config.provider.base_url.clone(),
        token: config.provider.token.expose().clone(),
        max_retries: SCM_MAX_RETRIES,
    })?;
    let notifier = Arc::new(ci_notify::Notifier::from_env());
    let prompts = Arc::new(PromptBuilder::load());

    let concurrency = concurrency_override.unwrap_or(config.max_concurrent_tasks).max(1);
    let retention_days = config.work_dir.retention_days;

    let ctx = StageContext {
        store: store.clone(),
        config,
        git: git.clone(),
        llm,
        scm,
        notifier,
        prompts,
    };

    let mut handles = Vec::with_capacity(concurrency as usize + 2);
    for worker_id in 0..concurrency {
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            worker::worker_loop(worker_id as usize, ctx).await;
        }));
    }
    handles.push(tokio::spawn(worker::reaper_loop(store.clone())));
    handles.push(tokio::spawn(worker::sweep_loop(git, store, retention_days)));

    info!(concurrency, "orchestrator worker pool started");
    futures::future::join_all(handles).await;

    Ok(())
}
