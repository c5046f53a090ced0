//! CLI command implementations

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::engine::SnipeEngine;
use crate::events::{EngineEvent, LogBatch};
use crate::gateway::PaperGateway;
use crate::policy::Policy;
use crate::venue::VenueRegistry;

/// Build the venue registry: builtin vocabularies plus an optional spec file
async fn registry(venues_file: Option<&str>) -> Result<VenueRegistry> {
    let mut registry = VenueRegistry::builtin();
    if let Some(path) = venues_file {
        let loaded = registry.load_file(path).await?;
        info!(path, loaded, "Loaded venue specs");
    }
    Ok(registry)
}

/// Run the engine over log batches read from stdin (one JSON batch per line)
pub async fn start(policy: Policy, venues_file: Option<&str>, dry_run: bool) -> Result<()> {
    if !dry_run {
        warn!("No live execution gateway configured; orders fill on paper");
    }
    info!(dry_run, "Starting sniper engine");

    let paper = Arc::new(PaperGateway::new());
    let engine = Arc::new(
        SnipeEngine::new(policy, registry(venues_file).await?, paper.clone(), paper.clone())?
            .with_market_data(paper.clone()),
    );

    // Log every engine notification
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EngineEvent::SnipeOpened {
                    asset_id,
                    entry_price,
                    cost_sol,
                    ..
                } => info!(asset = %asset_id, entry_price, cost_sol, "Snipe opened"),
                EngineEvent::AutoSellExecuted {
                    asset_id,
                    reason,
                    realized_pnl_sol,
                    ..
                } => info!(asset = %asset_id, %reason, pnl = realized_pnl_sol, "Auto-sell executed"),
                EngineEvent::SniperDetected { asset_id, trade } => {
                    warn!(asset = %asset_id, actor = %trade.actor, "Sniper detected")
                }
                EngineEvent::BuyFailed { asset_id, reason }
                | EngineEvent::SellFailed { asset_id, reason } => {
                    error!(asset = %asset_id, reason, "Order failed")
                }
                EngineEvent::CandidateRejected { asset_id, reason, .. } => {
                    info!(asset = %asset_id, reason, "Candidate rejected")
                }
                EngineEvent::MonitoringStarted { asset_id, window_secs, .. } => {
                    info!(asset = %asset_id, window_secs, "Monitoring started")
                }
            }
        }
    });

    // Feed stdin batches into the engine
    let (tx, rx) = mpsc::channel::<LogBatch>(256);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogBatch>(&line) {
                Ok(batch) => {
                    if tx.send(batch).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!(error = %e, "Skipping malformed log batch"),
            }
        }
    });

    let runner = engine.clone();
    tokio::select! {
        _ = runner.run(rx) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            engine.shutdown();
        }
    }

    let stats = engine.ledger().stats();
    info!(
        attempts = stats.snipe_attempts,
        closed = stats.closed_trades,
        realized_pnl_sol = stats.realized_pnl_sol,
        "Session finished"
    );
    Ok(())
}

/// Print the active policy with sensitive values masked
pub fn show_config(policy: &Policy) -> Result<()> {
    println!("{}", policy.masked_display());
    Ok(())
}

/// List the registered venue vocabularies
pub async fn venues(venues_file: Option<&str>) -> Result<()> {
    let registry = registry(venues_file).await?;
    for name in registry.names() {
        let spec = registry.get(&name)?;
        println!(
            "{:12} program={} markers={}",
            name,
            spec.program_id,
            spec.create_markers.len()
        );
    }
    Ok(())
}
