//! # Lapor
//!
//! Treasurer ledger notifications over a WhatsApp Web session, with delayed,
//! deduplicated delivery.
//!
//! Usage:
//!   lapor serve                  # Gateway + drain loop + session (default port 3000)
//!   lapor serve --port 8080      # Custom port
//!   lapor status                 # Queue, marker and dedup cache from the store
//!   lapor queue                  # List pending messages
//!   lapor reset                  # Clear queue and dedup cache (server stopped)
//!   lapor send-test              # Queue the test notification
//!   lapor init                   # Write a default config file

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use lapor_channels::whatsapp::{BridgeFactory, SessionManager};
use lapor_channels::{
    ChannelDelivery, DeliveryExecutor, RemoteDelivery, gated_ready_timeout, validate_chat_id,
};
use lapor_core::LaporConfig;
use lapor_core::traits::Deliver;
use lapor_gateway::AppState;
use lapor_report::ReportProducer;
use lapor_scheduler::{DedupCache, DelayedQueue, Gate, marker, open_store, spawn_drain_loop};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "lapor",
    version,
    about = "📒 Lapor: treasurer notifications over WhatsApp"
)]
struct Cli {
    /// Config file (default: ~/.lapor/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway, the drain loop and the WhatsApp session
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(long)]
        host: Option<String>,
    },
    /// Show queue, marker and dedup cache
    Status,
    /// List pending messages
    Queue,
    /// Clear the queue and the dedup cache
    Reset,
    /// Queue the test notification for the next drain
    SendTest,
    /// Write a default config file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "lapor=debug,lapor_core=debug,lapor_scheduler=debug,lapor_channels=debug,lapor_report=debug,lapor_gateway=debug,tower_http=debug"
    } else {
        "lapor=info,lapor_core=info,lapor_scheduler=info,lapor_channels=info,lapor_report=info,lapor_gateway=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => LaporConfig::load_from(Path::new(&shellexpand::tilde(path).to_string()))?,
        None => LaporConfig::load()?,
    };

    match cli.command {
        Command::Serve { port, host } => serve(config, port, host).await,
        Command::Status => status(&config),
        Command::Queue => list_queue(&config),
        Command::Reset => {
            let queue = open_queue(&config)?;
            let cleared = queue.clear().await?;
            println!("🧹 Cleared {cleared} pending message(s) and the dedup cache");
            Ok(())
        }
        Command::SendTest => {
            let queue = open_queue(&config)?;
            let producer = ReportProducer::new(queue, config.report.clone());
            let message = producer.send_test().await?;
            println!("🧪 Test notification queued ({})", message.id);
            Ok(())
        }
        Command::Init => {
            let path = LaporConfig::default_path();
            if path.exists() {
                println!("⚠️  Config already exists at {}", path.display());
            } else {
                LaporConfig::default().save()?;
                println!("✅ Wrote default config to {}", path.display());
            }
            Ok(())
        }
    }
}

fn open_queue(config: &LaporConfig) -> Result<Arc<DelayedQueue>> {
    let store = open_store(&config.store)?;
    let gate = Gate::new(config.queue.gate_wait());
    Ok(Arc::new(DelayedQueue::new(store, gate, config.queue.clone())))
}

fn status(config: &LaporConfig) -> Result<()> {
    let queue = open_queue(config)?;
    let pending = queue.pending()?;
    let last_row = marker::load(queue.store())?;
    let cache = DedupCache::load(queue.store())?;

    println!("📒 Lapor status");
    println!("   Store:        {} ({})", config.store.backend, config.store.path);
    println!("   Channel:      {}", config.channel.group_id);
    println!("   Delivery:     {}", config.delivery.mode);
    println!("   Pending:      {}", pending.len());
    if let Some(next) = pending.iter().map(|m| m.scheduled_send_time).min() {
        println!("   Next due:     {}", next.to_rfc3339());
    }
    match last_row {
        Some(row) => println!("   Last row:     {row}"),
        None => println!("   Last row:     (none)"),
    }
    if let Some(cache) = cache {
        let age = Utc::now() - cache.last_sent_at;
        println!("   Last sent:    {}s ago", age.num_seconds());
    }
    Ok(())
}

fn list_queue(config: &LaporConfig) -> Result<()> {
    let queue = open_queue(config)?;
    let pending = queue.pending()?;
    if pending.is_empty() {
        println!("📭 Queue is empty");
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&pending)?);
    Ok(())
}

async fn serve(mut config: LaporConfig, port: Option<u16>, host: Option<String>) -> Result<()> {
    if let Some(port) = port {
        config.gateway.port = port;
    }
    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Err(e) = validate_chat_id(&config.channel.group_id) {
        tracing::warn!("⚠️ channel.group_id is not usable, queued messages will keep failing: {e}");
    }

    let queue = open_queue(&config)?;

    let factory = Arc::new(BridgeFactory::new(config.bridge.clone())?);
    let session = SessionManager::new(factory, config.session.clone());
    let dispatch = session.start();
    let executor = Arc::new(DeliveryExecutor::new(session.clone()));

    let deliver: Arc<dyn Deliver> = match config.delivery.mode.as_str() {
        "session" => {
            // The drain sends while holding the gate; keep its readiness wait short.
            let ready = gated_ready_timeout(
                config.session.ready_timeout(),
                config.queue.gate_wait(),
            );
            let drain_executor = DeliveryExecutor::new(session.clone()).with_ready_timeout(ready);
            Arc::new(ChannelDelivery::new(
                Arc::new(drain_executor),
                config.channel.group_id.clone(),
            ))
        }
        "remote" => Arc::new(RemoteDelivery::new(
            config.delivery.remote_url.clone(),
            config.channel.group_id.clone(),
            Duration::from_secs(config.bridge.request_timeout_secs),
        )?),
        other => anyhow::bail!("Unknown delivery mode: {other} (expected session or remote)"),
    };

    if config.session.auto_start && config.delivery.mode == "session" {
        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = session.initialize().await {
                tracing::warn!("WhatsApp session did not start cleanly: {e}");
            }
        });
    }
    let probe = session.spawn_health_probe();
    let drain = spawn_drain_loop(queue.clone(), deliver.clone(), config.queue.drain_interval());

    let state = AppState {
        producer: Arc::new(ReportProducer::new(queue.clone(), config.report.clone())),
        config,
        start_time: std::time::Instant::now(),
        queue,
        executor,
        deliver,
    };

    let result = tokio::select! {
        r = lapor_gateway::start(state) => r,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("🛑 Shutting down");
            Ok(())
        }
    };

    drain.abort();
    probe.abort();
    session.shutdown().await;
    if let Some(dispatch) = dispatch {
        dispatch.abort();
    }
    result
}
