//! netloom-controller binary.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use netloom_controller::{routes, AppState, Config, Controller, NotificationHub};
use netloom_shared::compute::client::DEFAULT_TIMEOUT;
use netloom_shared::logging::init_logging_with_default;
use netloom_shared::{ComputeApi, HttpComputeClient};

#[derive(Parser)]
#[command(
    name = "netloom-controller",
    about = "Network-topology orchestration controller",
    version
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller daemon (default).
    Serve {
        /// Listen address, overriding the configuration.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Probe a compute endpoint and print its capabilities.
    Probe {
        /// Compute base URL, e.g. http://10.0.0.5:3080
        url: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging_with_default("info");
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve { bind: None }) {
        Command::Serve { bind } => serve(config, bind).await,
        Command::Probe {
            url,
            user,
            password,
        } => probe(url, user, password).await,
    }
}

async fn serve(config: Config, bind_override: Option<String>) -> anyhow::Result<()> {
    let hub = NotificationHub::new(config.controller.queue_capacity);
    let controller = Arc::new(Controller::new(
        hub,
        Duration::from_secs(config.controller.compute_timeout_secs),
    ));

    for entry in &config.computes {
        match controller.add_compute(entry.to_create()).await {
            Ok(info) => {
                info!(compute = %info.compute_id, name = %info.name,
                    connected = info.connected, "registered configured compute");
            }
            Err(err) => {
                warn!(name = %entry.name, error = %err, "failed to register configured compute");
            }
        }
    }
    controller.spawn_probe_loop(Duration::from_secs(config.controller.probe_interval_secs));

    let state = AppState {
        controller: controller.clone(),
    };
    let app = routes::router(state);

    let addr = bind_override.unwrap_or_else(|| config.bind_addr());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "controller listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn probe(url: String, user: Option<String>, password: Option<String>) -> anyhow::Result<()> {
    let client = HttpComputeClient::new(Uuid::new_v4(), url, user, password, DEFAULT_TIMEOUT)?;
    let caps = client.probe().await?;
    println!("{}", serde_json::to_string_pretty(&caps)?);
    Ok(())
}
