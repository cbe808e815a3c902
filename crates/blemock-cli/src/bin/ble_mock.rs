//! # ble-mock
//!
//! Replays the registry to an Android target as a live, drifting scan feed.
//! Every cycle the simulated scan is pushed over adb and announced with a
//! broadcast intent.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::process::ExitCode;

use blemock_cli::{exit_code_for, is_production, load_settings, logging, report, shutdown};
use blemock_core::{AdbDelivery, BroadcastSession, RegistryStore, Simulator};
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = logging::init("ble-mock", is_production()) {
        eprintln!("failed to initialize logging: {e}");
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => exit_code_for(&e),
    }
}

async fn run() -> anyhow::Result<()> {
    let settings = load_settings()?;

    println!("{}", report::banner("Continuous BLE Mock Broadcaster"));

    let store = RegistryStore::new(&settings.scanner.registry_path);
    let registry = store.load_existing()?;

    let named = registry.named_addresses();
    println!("Loaded {} devices from {}", registry.len(), store.path().display());
    println!("   Named devices: {}", named.len());
    for address in &named {
        if let Some(record) = registry.get(address) {
            println!("   - {}", record.name);
        }
    }

    let delivery = AdbDelivery::live(&settings.adb);
    let targets = delivery.connected_devices().await?;
    if let Some(target) = targets.first() {
        println!("Connected to: {target}");
    }

    let simulator = Simulator::from_config(settings.simulation.clone(), &registry);
    let session = BroadcastSession::new(registry, simulator, delivery);

    println!();
    println!(
        "Broadcasting every {:.1}s (Ctrl+C to stop)",
        settings.simulation.update_interval().as_secs_f64()
    );
    println!("{}", "-".repeat(60));
    info!(remote = %settings.adb.live_remote_path, "Broadcaster running");

    let mut stop = shutdown::listen_for_shutdown();
    let summary = session
        .run(&mut stop, |r| println!("{}", report::broadcast_status(r)))
        .await;

    println!();
    println!(
        "{}",
        report::broadcast_summary(summary.cycles, summary.failed_deliveries)
    );
    Ok(())
}
