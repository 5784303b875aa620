//! CLI entry points.
//!
//! `serve` runs the full pipeline; `watch` attaches a terminal
//! synchronizer to a running gateway and prints the mirrored fleet
//! state. No subcommand means `serve`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use forgewatch_client::{SyncClient, SyncClientConfig};
use forgewatch_core::wait_for_shutdown_signal;

use crate::server::{self, AppConfig};

/// Real-time machine telemetry pipeline
#[derive(Parser)]
#[command(name = "forgewatch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline: edge producers, enrichment, and the gateway
    Serve,
    /// Mirror a running gateway's stream in the terminal
    Watch {
        /// Gateway WebSocket URL
        #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
        url: String,
        /// Seconds between fleet summaries
        #[arg(long, default_value_t = 5)]
        every: u64,
    },
}

/// Dispatch the parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        None | Some(Commands::Serve) => server::run(AppConfig::load()?).await,
        Some(Commands::Watch { url, every }) => watch(url, every).await,
    }
}

async fn watch(url: String, every: u64) -> Result<()> {
    let client = Arc::new(SyncClient::new(SyncClientConfig::new(&url))?);
    let state = client.state();
    let mut status = client.status();
    info!(%url, "Watching gateway");

    let runner = client.clone();
    let run = tokio::spawn(async move { runner.run().await });

    let signal = wait_for_shutdown_signal();
    tokio::pin!(signal);
    let mut ticker = tokio::time::interval(Duration::from_secs(every.max(1)));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut signal => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("connection: {:?}", *status.borrow());
            }
            _ = ticker.tick() => {
                print_summary(&state).await;
            }
        }
    }

    client.disconnect();
    let outcome = run.await?;
    print_summary(&state).await;
    outcome?;
    Ok(())
}

async fn print_summary(state: &Arc<tokio::sync::RwLock<forgewatch_client::TelemetryState>>) {
    let mirror = state.read().await;
    let mut ids: Vec<&String> = mirror.machines().keys().collect();
    ids.sort();

    println!("--- fleet ({} machines, {} alerts) ---", ids.len(), mirror.alerts().len());
    for id in ids {
        if let Some(m) = mirror.machine(id) {
            println!(
                "{id}  {name:<16} {status:?}  score={score:.2} torque={torque:.1} wear={wear:.0}",
                name = m.name,
                status = m.status,
                score = m.latest.anomaly_score,
                torque = m.latest.reading.torque,
                wear = m.latest.reading.tool_wear,
            );
        }
    }
    for alert in mirror.alerts().iter().take(3) {
        println!(
            "  alert: {} {:?} score={:.2} at {}",
            alert.machine_name, alert.failure_type, alert.anomaly_score, alert.timestamp
        );
    }
}
