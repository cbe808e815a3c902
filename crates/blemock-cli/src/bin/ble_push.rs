//! # ble-push
//!
//! One-shot export of the whole registry to an Android target. When no adb
//! target is available the export is written locally instead.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::process::ExitCode;

use blemock_cli::{exit_code_for, is_production, load_settings, logging, report};
use blemock_core::storage::write_atomically;
use blemock_core::{export_registry, AdbDelivery, RegistryStore, ScanDelivery};
use tracing::warn;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = logging::init("ble-push", is_production()) {
        eprintln!("failed to initialize logging: {e}");
    }

    match run().await {
        Ok(code) => code,
        Err(e) => exit_code_for(&e),
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let settings = load_settings()?;

    println!("{}", report::banner("Bluetooth Mock Data Pusher"));

    let store = RegistryStore::new(&settings.scanner.registry_path);
    let registry = store.load_existing()?;

    println!();
    println!("Loading devices from {}...", store.path().display());
    println!("   Found {} unique devices", registry.len());

    let exported = export_registry(&registry);
    let payload = serde_json::to_vec_pretty(&exported)?;
    println!();
    println!("{}", report::export_preview(&exported));

    println!();
    println!("Checking ADB connection...");
    let mut delivery = AdbDelivery::export(&settings.adb);
    let pushed = match delivery.connected_devices().await {
        Ok(targets) => {
            println!("Found {} Android device(s):", targets.len());
            for target in &targets {
                println!("   - {target}");
            }
            println!();
            println!("Pushing to {}...", delivery.remote_path());
            match delivery.push(&payload).await {
                Ok(()) => {
                    println!("Success! File pushed to {}", delivery.remote_path());
                    true
                }
                Err(e) => {
                    println!("Failed to push file: {e}");
                    false
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "No adb target");
            println!("{e}");
            false
        }
    };

    if !pushed {
        let fallback = &settings.adb.export_fallback_path;
        write_atomically(fallback, &payload)?;
        println!();
        println!("Saved locally to: {}", fallback.display());
        println!("   You can manually copy this file to your emulator/device.");
        return Ok(ExitCode::FAILURE);
    }

    println!();
    println!("{}", report::rule());
    println!("In your Android app, read from:");
    println!("   {}", delivery.remote_path());
    println!("{}", report::rule());
    Ok(ExitCode::SUCCESS)
}
