use clap::{Parser, Subcommand, ValueEnum};
use pledge_core::{DispatchConfig, PledgeEngineConfig, RegistrationConfig, StorageConfig};
use pledge_service::{build_router, ServiceConfig, ServiceState};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "pledged", version, about = "Pledge tracking and donor messaging service")]
struct Cli {
    /// Storage backend. `auto` picks postgres when a database url is configured.
    #[arg(
        long,
        value_enum,
        default_value_t = StorageMode::Auto,
        env = "PLEDGED_STORAGE",
        global = true
    )]
    storage: StorageMode,
    /// PostgreSQL url; falls back to DATABASE_URL.
    #[arg(long, env = "PLEDGED_DATABASE_URL", global = true)]
    database_url: Option<String>,
    /// Max PostgreSQL pool connections.
    #[arg(long, default_value_t = 5, env = "PLEDGED_PG_MAX_CONNECTIONS", global = true)]
    pg_max_connections: u32,
    /// Base of the links mailed for email verification.
    #[arg(
        long,
        default_value = "http://localhost:8080/v1/registrations/verify",
        env = "PLEDGED_VERIFY_BASE_URL",
        global = true
    )]
    verify_base_url: String,
    /// Pause between messages of a bulk send, in milliseconds.
    #[arg(long, default_value_t = 500, env = "PLEDGED_SEND_DELAY_MS", global = true)]
    send_delay_ms: u64,
    /// Domain for simulated email recipients.
    #[arg(long, default_value = "email.com", env = "PLEDGED_EMAIL_DOMAIN", global = true)]
    email_domain: String,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the JSON API (default).
    Serve {
        /// Socket address to bind, e.g. 127.0.0.1:8080
        #[arg(long, default_value = "127.0.0.1:8080", env = "PLEDGED_LISTEN")]
        listen: SocketAddr,
    },
    /// Send queued messages and re-queue failed ones, then exit.
    ProcessMessages {
        /// Messages sent per run.
        #[arg(long, default_value_t = 10)]
        batch_size: usize,
        /// Failed messages tried this many times are left alone.
        #[arg(long, default_value_t = 3)]
        max_retries: u32,
    },
}

fn resolve_storage(cli: &Cli) -> anyhow::Result<StorageConfig> {
    let resolved_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.storage {
        StorageMode::Memory => StorageConfig::Memory,
        StorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!("storage=postgres requires --database-url or DATABASE_URL")
            })?;
            StorageConfig::postgres(database_url, cli.pg_max_connections)
        }
        StorageMode::Auto => match resolved_url {
            Some(database_url) => StorageConfig::postgres(database_url, cli.pg_max_connections),
            None => StorageConfig::Memory,
        },
    };

    Ok(storage)
}

/// Queued messages only outlive the process in PostgreSQL; a fresh memory
/// store has nothing to send.
fn ensure_durable_storage(storage: &StorageConfig) -> anyhow::Result<()> {
    if matches!(storage, StorageConfig::Memory) {
        anyhow::bail!(
            "process-messages requires postgres storage; set --database-url or DATABASE_URL"
        );
    }
    Ok(())
}

fn service_config(cli: &Cli) -> anyhow::Result<ServiceConfig> {
    Ok(ServiceConfig {
        engine: PledgeEngineConfig {
            storage: resolve_storage(cli)?,
            dispatch: DispatchConfig {
                send_delay: Duration::from_millis(cli.send_delay_ms),
            },
            registration: RegistrationConfig {
                verify_base_url: cli.verify_base_url.clone(),
                ..RegistrationConfig::default()
            },
            ..PledgeEngineConfig::default()
        },
        email_domain: cli.email_domain.clone(),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "pledge_service=info,pledge_core=info,pledge_adapters=info,info".to_string()
        }))
        .init();

    let cli = Cli::parse();
    let config = service_config(&cli)?;
    if matches!(cli.command, Some(Command::ProcessMessages { .. })) {
        ensure_durable_storage(&config.engine.storage)?;
    }
    info!(storage = config.engine.storage.label(), "Starting pledged");
    let state = ServiceState::bootstrap(config).await?;

    match cli.command {
        Some(Command::ProcessMessages {
            batch_size,
            max_retries,
        }) => {
            let dispatcher = state.engine.dispatcher();
            let report = dispatcher
                .process_queue(batch_size.max(1), max_retries)
                .await?;
            info!(
                processed = report.processed,
                sent = report.sent,
                failed = report.failed,
                retried = report.retried,
                "Message processing finished"
            );
            let stats = dispatcher.queue_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        command => {
            let listen = match command {
                Some(Command::Serve { listen }) => listen,
                _ => default_listen()?,
            };
            let app = build_router(state);
            let listener = tokio::net::TcpListener::bind(listen).await?;
            info!("pledge-service listening on {}", listener.local_addr()?);
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}

/// Listen address when no subcommand is given.
fn default_listen() -> anyhow::Result<SocketAddr> {
    let raw = std::env::var("PLEDGED_LISTEN").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    Ok(raw.parse()?)
}
