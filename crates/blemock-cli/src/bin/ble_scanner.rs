//! # ble-scanner
//!
//! Scans for nearby Bluetooth devices until interrupted and keeps every
//! sighting in the registry file.
//!
//! ```bash
//! ble-scanner
//! BLEMOCK__SCANNER__SCAN_INTERVAL_SECS=10 ble-scanner
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::process::ExitCode;

use blemock_cli::{exit_code_for, is_production, load_settings, logging, report, shutdown};
use blemock_core::{RegistryStore, ScannerSession, Settings};
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = logging::init("ble-scanner", is_production()) {
        eprintln!("failed to initialize logging: {e}");
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => exit_code_for(&e),
    }
}

async fn run() -> anyhow::Result<()> {
    let settings = load_settings()?;
    let discovery = connect_discovery().await?;
    scan(discovery, &settings).await;
    Ok(())
}

#[cfg(feature = "bluetooth")]
async fn connect_discovery() -> anyhow::Result<blemock_core::BluerDiscovery> {
    Ok(blemock_core::BluerDiscovery::new().await?)
}

#[cfg(not(feature = "bluetooth"))]
async fn connect_discovery() -> anyhow::Result<blemock_core::MockDiscovery> {
    Err(blemock_core::BleMockError::PrerequisiteMissing(
        "built without Bluetooth support (enable the `bluetooth` feature)".to_string(),
    )
    .into())
}

async fn scan<D: blemock_core::DeviceDiscovery>(discovery: D, settings: &Settings) {
    let scanner = &settings.scanner;
    let path = std::env::current_dir()
        .map(|cwd| cwd.join(&scanner.registry_path))
        .unwrap_or_else(|_| scanner.registry_path.clone());

    println!("{}", report::banner("Bluetooth Scanner Started"));
    println!("Output file: {}", path.display());
    println!("Scan interval: {} seconds", scanner.scan_interval_secs);
    println!("Press Ctrl+C to stop scanning and save results.");
    println!("{}", report::rule());
    println!();

    let session = ScannerSession::new(discovery, RegistryStore::new(&path), scanner);
    let mut stop = shutdown::listen_for_shutdown();
    info!(path = %path.display(), "Scanner running");

    let summary = session
        .run(&mut stop, |r| {
            println!("{}", report::scan_status(r));
            println!();
        })
        .await;

    println!();
    print!("{}", report::scan_summary(&summary, &path));
}
