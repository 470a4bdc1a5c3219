//! Skillmesh Settlement Daemon
//!
//! Wires the ledger, escrow engine and booking state machine together and
//! runs the expiry sweeper on its configured interval. Request-handling
//! surfaces (HTTP, chat, video) live elsewhere; this process owns the
//! time-based side of settlement.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use skillmesh_booking::{BookingEngine, InMemoryNotifier, SkillCatalog};
use skillmesh_escrow::{EscrowEngine, StaticVerifier};
use skillmesh_ledger::Ledger;
use skillmesh_sweeper::{ExpirySweeper, SweeperConfig};
use skillmesh_types::Currency;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = SweeperConfig::from_env();
    info!(
        sweep_interval_secs = config.interval_secs,
        "starting skillmesh settlement daemon"
    );

    let ledger = Ledger::new(Currency::Usd);
    let escrow = EscrowEngine::new(ledger);
    let catalog = SkillCatalog::new();
    let verifier = Arc::new(StaticVerifier::new());
    let notifier = Arc::new(InMemoryNotifier::new());
    let engine = BookingEngine::new(catalog, escrow, verifier, notifier);

    let sweeper = ExpirySweeper::new(engine, config);
    let sweep_task = tokio::spawn(sweeper.run());

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for shutdown signal");
    info!("shutdown signal received, stopping sweeper");
    sweep_task.abort();
}
