//! Standalone servicer node.
//!
//! Loads service definitions and server overrides from a JSON cluster file
//! (or starts with only the foundational services), runs the servicer loop
//! for this host, and shuts down cleanly on Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use servicer_core::DefinitionStore;
use servicer_server::executor::LoggingRunner;
use servicer_server::service::bootstrap;
use servicer_server::{
    ClusterFile, MemoryDefinitionStore, MemoryWorkStore, ServiceFactory, Servicer, ServicerConfig,
    ServicerEnv,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "servicer-node", about = "Runs the background services for one cluster host")]
struct Args {
    /// Hostname this node answers to in host lists and Server records.
    #[arg(long, env = "SERVICER_HOST", default_value = "localhost")]
    host: String,

    /// JSON file with `services` and `servers` arrays.
    #[arg(long, env = "SERVICER_CLUSTER_FILE")]
    cluster_file: Option<PathBuf>,

    /// Coordinator tick in milliseconds.
    #[arg(long, env = "SERVICER_TICK_MS", default_value_t = 1000)]
    tick_ms: u64,

    /// Interval used by definitions with a zero interval, in seconds.
    #[arg(long, env = "SERVICER_DEFAULT_INTERVAL_SECS", default_value_t = 60)]
    default_interval_secs: u64,

    /// Write stand-ins for missing foundational services back to the store.
    #[arg(long)]
    persist_defaults: bool,

    /// Emit logs as JSON lines.
    #[arg(long, env = "SERVICER_JSON_LOGS")]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let store = match &args.cluster_file {
        Some(path) => ClusterFile::load(path)?.into_store(),
        None => MemoryDefinitionStore::new(),
    };
    let definitions: Arc<dyn DefinitionStore> = Arc::new(store);

    if args.persist_defaults {
        let written = bootstrap::persist_missing_definitions(definitions.as_ref())
            .await
            .context("persisting foundational service definitions")?;
        tracing::info!(written, "foundational definitions checked");
    }

    let config = ServicerConfig {
        tick_interval: Duration::from_millis(args.tick_ms.max(1)),
        default_service_interval: Duration::from_secs(args.default_interval_secs.max(1)),
        ..ServicerConfig::for_host(args.host.clone())
    };
    let env = ServicerEnv::new(
        config,
        definitions,
        Arc::new(MemoryWorkStore::new()),
        Arc::new(LoggingRunner),
    );

    let servicer = Arc::new(Servicer::new(env, Arc::new(ServiceFactory::with_builtin())));
    let loaded = servicer.load().await;
    tracing::info!(host = %args.host, loaded, "servicer node started");
    for (name, state) in servicer.status() {
        tracing::info!(service = %name, state, "service status");
    }

    let handle = servicer.handle();
    let task = servicer.spawn();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutdown signal received");
    handle.shutdown();

    task.await.context("servicer loop panicked")?;
    tracing::info!("servicer node stopped");
    Ok(())
}
