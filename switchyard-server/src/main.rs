use std::path::PathBuf;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use switchyard_config::{Config, ConfigLoad, ConfigLoader};
use switchyard_core::MIGRATOR;
use switchyard_server::wiring::{build_services, connect_postgres, connect_stores};
use switchyard_server::{AppState, create_app};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "switchyard-server")]
#[command(about = "Account scheduler: snapshot cache maintenance and health endpoints")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "SWITCHYARD_CONFIG")]
    config: Option<PathBuf>,

    /// Health endpoint port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Health endpoint host (overrides config)
    #[arg(long)]
    host: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the outbox consumer and the health endpoints (default)
    Serve,
    #[command(subcommand)]
    Db(DbCommand),
    #[command(subcommand)]
    Outbox(OutboxCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply database migrations and exit
    Migrate,
}

#[derive(Debug, Subcommand)]
enum OutboxCommand {
    /// Print the consumer watermark and lag as JSON
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_runtime_config(&cli.serve)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(config).await,
        Command::Db(DbCommand::Migrate) => run_db_migrate(&config).await,
        Command::Outbox(OutboxCommand::Status) => run_outbox_status(&config).await,
    }
}

fn load_runtime_config(args: &ServeArgs) -> anyhow::Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    let ConfigLoad {
        mut config,
        warnings,
    } = loader.load().context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG.
                "info,switchyard=info,tower_http=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }
    warnings.log();

    let sched = &config.scheduler;
    info!(
        scheduler.poll_interval = ?sched.outbox_poll_interval,
        scheduler.batch_size = sched.outbox_batch_size,
        scheduler.lock_ttl = ?sched.rebuild_lock_ttl,
        scheduler.full_refresh = ?sched.full_refresh_interval,
        scheduler.failure_mode = %sched.failure_mode,
        "scheduler configuration in effect"
    );
    Ok(config)
}

async fn run_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = connect_postgres(config).await?;
    MIGRATOR
        .run(&pool)
        .await
        .context("database migration failed")?;
    info!("Database migrations applied successfully");
    Ok(())
}

async fn run_outbox_status(config: &Config) -> anyhow::Result<()> {
    let pool = connect_postgres(config).await?;
    let stores = connect_stores(config).await?;
    if stores.kind == "memory" {
        warn!("no Redis configured; the watermark reported is process-local and always empty");
    }
    let services = build_services(config, stores, pool);
    let health = services.consumer.health().await;
    println!("{}", serde_json::to_string_pretty(&health)?);
    Ok(())
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let pool = connect_postgres(&config).await?;
    let stores = connect_stores(&config).await?;
    let services = build_services(&config, stores, pool);
    info!(stores = services.store_kind, "scheduler services ready");

    let shutdown = CancellationToken::new();
    let consumer = tokio::spawn(services.consumer.clone().run(shutdown.clone()));

    let app = create_app(AppState::from_services(&services));
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "health endpoints listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown requested");
            signal.cancel();
        })
        .await
        .context("health server failed")?;

    shutdown.cancel();
    if let Err(e) = consumer.await {
        warn!(error = %e, "outbox consumer task ended abnormally");
    }
    info!("switchyard stopped");
    Ok(())
}
