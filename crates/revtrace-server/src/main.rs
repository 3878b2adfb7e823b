use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use revtrace_runtime::{Config, Runtime, SecretCodec};
use revtrace_server::{AppState, build_router};

#[derive(Parser, Debug)]
#[command(
    name = "revtrace-server",
    about = "Subscription-billing observability server",
    version
)]
struct Cli {
    /// Path to the TOML configuration file (default: $REVTRACE_CONFIG or ./revtrace.toml)
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Override the listen address
    #[arg(long)]
    bind: Option<String>,

    /// Override the database path
    #[arg(long)]
    database: Option<std::path::PathBuf>,

    /// Validate configuration and migrations, then exit
    #[arg(long)]
    check: bool,
}

// Exit codes: 0 clean shutdown, 1 unrecoverable init failure, 2 migration
// drift detected at startup
const EXIT_INIT_FAILURE: u8 = 1;
const EXIT_MIGRATION_DRIFT: u8 = 2;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "startup failed");
            eprintln!("Error: {}", err);
            if is_migration_drift(&err) {
                ExitCode::from(EXIT_MIGRATION_DRIFT)
            } else {
                ExitCode::from(EXIT_INIT_FAILURE)
            }
        }
    }
}

fn is_migration_drift(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<revtrace_store::Error>(),
            Some(revtrace_store::Error::MigrationDrift { .. })
        ) || matches!(
            cause.downcast_ref::<revtrace_runtime::Error>(),
            Some(revtrace_runtime::Error::Store(
                revtrace_store::Error::MigrationDrift { .. }
            ))
        )
    })
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(bind) = &cli.bind {
        config.bind_addr = bind.clone();
    }
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }
    Ok(config)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let secrets = SecretCodec::from_env("REVTRACE_ENCRYPTION_KEY")?;

    if cli.check {
        // Opening the store applies migrations and surfaces drift
        revtrace_store::Database::open(&config.database_path)?;
        println!("configuration and schema ok");
        return Ok(());
    }

    let tokio_runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    tokio_runtime.block_on(serve(config, secrets))
}

async fn serve(config: Config, secrets: SecretCodec) -> anyhow::Result<()> {
    let bind_addr = config.bind_addr.clone();
    let runtime = Arc::new(Runtime::start(config, secrets)?);
    let state = AppState::new(Arc::clone(&runtime));
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Workers drain their current event; the scheduler stops immediately
    match Arc::try_unwrap(runtime) {
        Ok(runtime) => runtime.shutdown(),
        Err(_) => tracing::warn!("runtime still referenced at shutdown"),
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}
