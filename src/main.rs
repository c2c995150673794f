//! a3s-audit - audit event ingestion service
//!
//! Consumes audit envelopes from the durable queue, stores them, and serves
//! the read-only query API.

use a3s_audit::{
    open_store, query_router, AuditConfig, ConfigOverrides, DetailsValidator, DlqHandler,
    EnvelopeDecoder, IngestionConsumer, IngestionService, MemoryDlqHandler, NatsProvider,
    PgAuditStore, QueryState, QueueProvider,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "a3s-audit")]
#[command(author = "A3S Lab Team")]
#[command(version)]
#[command(about = "Audit event ingestion and query service")]
struct Cli {
    /// Configuration file path (.hcl)
    #[arg(short, long, env = "A3S_AUDIT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion workers and the query API
    Serve {
        /// Durable queue (stream) to consume
        #[arg(long, env = "AUDIT_QUEUE_NAME")]
        queue_name: Option<String>,

        /// NATS server URL
        #[arg(long, env = "NATS_URL")]
        nats_url: Option<String>,

        /// PostgreSQL URL (records are kept in memory when unset)
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,

        /// Query API port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Create the audit_events table and indexes
    Migrate {
        /// PostgreSQL URL
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
    },

    /// Publish an audit envelope read from a file
    Publish {
        /// JSON envelope file
        file: PathBuf,

        /// Deduplication id (defaults to none)
        #[arg(long)]
        msg_id: Option<String>,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("a3s_audit={},tower_http={}", log_level, log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let (mut config, _config_path) = AuditConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            queue_name,
            nats_url,
            database_url,
            port,
        } => {
            config.apply(ConfigOverrides {
                queue_name,
                nats_url,
                database_url,
                port,
            });
            config.validate()?;
            serve(config).await?;
        }
        Commands::Migrate { database_url } => {
            if let Some(url) = database_url {
                config.database.url = url;
            }
            anyhow::ensure!(!config.database.url.is_empty(), "No database url configured");
            let store = PgAuditStore::connect(&config.database).await?;
            store.ensure_schema().await?;
        }
        Commands::Publish { file, msg_id } => {
            let payload = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            EnvelopeDecoder::new()
                .decode(&payload)
                .context("Envelope would be rejected by the consumer")?;
            let provider = NatsProvider::connect(config.queue.clone()).await?;
            let sequence = provider.publish(payload.into(), msg_id.as_deref()).await?;
            println!("Published to {} (sequence {})", provider.queue_name(), sequence);
        }
        Commands::Config { default } => {
            let shown = if default { AuditConfig::default() } else { config };
            println!("{}", shown.to_hcl()?);
        }
    }

    Ok(())
}

async fn serve(config: AuditConfig) -> Result<()> {
    let store = open_store(&config.database).await?;
    let provider: Arc<dyn QueueProvider> =
        Arc::new(NatsProvider::connect(config.queue.clone()).await?);

    let dlq: Arc<dyn DlqHandler> =
        Arc::new(MemoryDlqHandler::new(config.consumer.dead_letter_capacity));
    let consumer = IngestionConsumer::new(
        Arc::clone(&store),
        EnvelopeDecoder::new(),
        DetailsValidator::new(),
    )
    .with_dlq(Arc::clone(&dlq))
    .with_max_deliver(config.consumer.max_deliver_limit());
    let stats = consumer.stats();

    let service = IngestionService::new(
        Arc::clone(&provider),
        consumer,
        config.consumer.consumer_name.clone(),
        config.consumer.to_options(),
        config.consumer.workers,
    );
    let ingestion = service.start().await?;

    let app = query_router(QueryState {
        store,
        provider: Some(provider),
        stats: Some(stats),
        dlq: Some(dlq),
        workers: Some(ingestion.liveness()),
    })
    .layer(TraceLayer::new_for_http());

    let addr = config.http.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, "Query API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ingestion.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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
    tracing::info!("Shutdown signal received");
}
