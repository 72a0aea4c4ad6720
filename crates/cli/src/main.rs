//! `autoflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`: start the API server (plus the background sweeps).
//! - `worker`: drain the Postgres job queue (plus the background sweeps).
//! - `sweep`: run the event, pending-run and due-wait sweeps once.
//! - `migrate`: run pending database migrations.
//! - `validate`: validate an automation definition JSON file.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use engine::models::NewAutomation;
use engine::{Automation, EngineConfig, EventBus, EventProcessor, JobWorker, PgCrm, PgStore, WorkflowExecutor};
use nodes::{BuiltinDeps, CredentialStore, NodeRegistry};
use queue::{HttpDelayQueue, JobQueue, PgJobQueue};

#[derive(Parser)]
#[command(name = "autoflow", about = "Automation execution engine for the CRM", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve {
        /// Overrides `BIND_ADDR`.
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Do not run the periodic sweeps in this process.
        #[arg(long)]
        no_sweeps: bool,
    },
    /// Start a worker that processes jobs from the Postgres queue.
    Worker {
        /// Idle poll interval in milliseconds.
        #[arg(long, default_value_t = 1_000)]
        poll_ms: u64,
        #[arg(long)]
        no_sweeps: bool,
    },
    /// Run each sweep once and exit.
    Sweep {
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate an automation definition JSON file.
    Validate {
        /// Path to the automation JSON file.
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "autoflow=info,engine=info,api=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, no_sweeps } => {
            let runtime = Runtime::build(EngineConfig::from_env()?).await?;
            let mut server = api::ServerConfig::from_env()?;
            if let Some(bind) = bind {
                server.bind_addr = bind;
            }

            let (stop, shutdown) = watch::channel(false);
            let sweeps = (!no_sweeps).then(|| runtime.spawn_sweeps(shutdown.clone()));

            let state = api::AppState::new(runtime.bus.clone(), runtime.processor.clone(), server.clone());
            api::serve(server.bind_addr, state, shutdown_signal()).await?;

            stop.send_replace(true);
            if let Some(handle) = sweeps {
                handle.await.ok();
            }
            info!("Graceful shutdown complete");
        }
        Command::Worker { poll_ms, no_sweeps } => {
            let runtime = Runtime::build(EngineConfig::from_env()?).await?;
            if runtime.config.http_queue.is_some() {
                warn!("QUEUE_URL is set; delayed steps go to the HTTP queue, this worker only drains job_queue");
            }

            let (stop, shutdown) = watch::channel(false);
            let sweeps = (!no_sweeps).then(|| runtime.spawn_sweeps(shutdown.clone()));
            let worker = JobWorker::new(
                PgJobQueue::new(runtime.pool.clone()),
                runtime.bus.executor().clone(),
                Duration::from_millis(poll_ms),
            );
            let worker = tokio::spawn(async move { worker.run(shutdown).await });

            shutdown_signal().await;
            stop.send_replace(true);
            worker.await.ok();
            if let Some(handle) = sweeps {
                handle.await.ok();
            }
            info!("Worker stopped");
        }
        Command::Sweep { limit } => {
            let runtime = Runtime::build(EngineConfig::from_env()?).await?;
            run_sweeps(&runtime.processor, limit).await;
        }
        Command::Migrate { database_url } => {
            info!("Running migrations");
            let pool = db::pool::create_pool(&database_url, 2)
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;
            info!("Migrations applied successfully");
        }
        Command::Validate { path } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read file {}", path.display()))?;
            let definition: NewAutomation = serde_json::from_str(&content).context("invalid automation JSON")?;

            // Only type names are consulted; no executor runs.
            let registry = NodeRegistry::builtin(&BuiltinDeps::new(Arc::new(nodes::mock::MockCrm::default())));
            let automation = Automation::new(
                uuid::Uuid::nil(),
                definition.name,
                definition.trigger_type,
                definition.nodes,
                definition.edges,
            );
            match engine::validate_graph(&automation, &registry) {
                Ok(start) => println!("Automation is valid. Start node: {start}"),
                Err(e) => bail!("validation failed: {e}"),
            }
        }
    }

    Ok(())
}

/// Everything a long-running command needs, wired against Postgres.
struct Runtime {
    config: EngineConfig,
    pool: db::DbPool,
    bus: Arc<EventBus>,
    processor: Arc<EventProcessor>,
}

impl Runtime {
    async fn build(config: EngineConfig) -> anyhow::Result<Self> {
        let pool = db::pool::create_pool(&config.database_url, config.database_max_connections)
            .await
            .context("failed to connect to database")?;
        db::pool::health_check(&pool).await.context("database health check failed")?;
        info!("Database connection pool created");

        let store = Arc::new(PgStore::new(pool.clone()));
        let deps = BuiltinDeps::new(Arc::new(PgCrm::new(pool.clone()))).with_action_timeout(config.action_timeout);
        let registry = Arc::new(NodeRegistry::builtin(&deps));

        let queue: Arc<dyn JobQueue> = match &config.http_queue {
            Some(http) => {
                info!(base_url = %http.base_url, "Using HTTP delay queue");
                Arc::new(HttpDelayQueue::new(http.clone())?)
            }
            None => {
                info!("Using Postgres job queue");
                Arc::new(PgJobQueue::new(pool.clone()))
            }
        };

        let mut executor = WorkflowExecutor::new(store, registry, queue, config.executor_config());
        match &config.encryption_key {
            Some(key) => executor = executor.with_credentials(CredentialStore::new(key)?),
            None => warn!("ENCRYPTION_KEY unset; node credentials are unavailable"),
        }

        let bus = Arc::new(EventBus::new(Arc::new(executor), config.dispatch_mode));
        let processor = Arc::new(EventProcessor::new(bus.clone(), config.processor_config()));
        info!(dispatch_mode = ?config.dispatch_mode, "Engine ready");

        Ok(Self { config, pool, bus, processor })
    }

    /// Run all sweeps every `sweep_interval` until `shutdown` flips.
    fn spawn_sweeps(&self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let processor = self.processor.clone();
        let interval = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => run_sweeps(&processor, SWEEP_BATCH).await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

const SWEEP_BATCH: i64 = 100;

async fn run_sweeps(processor: &EventProcessor, limit: i64) {
    if let Err(e) = processor.process_pending_events(limit).await {
        error!(error = %e, "event sweep failed");
    }
    if let Err(e) = processor.process_pending_runs(limit).await {
        error!(error = %e, "pending-run sweep failed");
    }
    if let Err(e) = processor.process_due_waits(limit).await {
        error!(error = %e, "due-wait sweep failed");
    }
}

/// Wait for Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
