//! # ble-broadcast
//!
//! Interactive menu that advertises one configured identity at a time so a
//! phone can discover it as if the real device were nearby.
//!
//! Needs root (or `CAP_NET_ADMIN`) for the btmgmt/hcitool fallbacks.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::io::Write as _;
use std::process::ExitCode;
use std::time::Duration;

use blemock_cli::menu::{self, MenuChoice};
use blemock_cli::{exit_code_for, is_production, load_settings, logging, shutdown};
use blemock_core::{AdvertiseSettings, Advertiser, FallbackAdvertiser, StopSignal};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::time::Instant;
use tracing::{info, warn};

/// How long to keep broadcasting when stdin is closed and Enter can never
/// arrive.
const NO_INPUT_BROADCAST: Duration = Duration::from_secs(60);

type InputLines = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = logging::init("ble-broadcast", is_production()) {
        eprintln!("failed to initialize logging: {e}");
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => exit_code_for(&e),
    }
}

async fn run() -> anyhow::Result<()> {
    let settings = load_settings()?;
    start_menu(&settings.advertise).await
}

/// Prefers the BlueZ advertising API and keeps the command-line tools as a
/// fallback.
#[cfg(feature = "bluetooth")]
async fn start_menu(settings: &AdvertiseSettings) -> anyhow::Result<()> {
    let tools = FallbackAdvertiser::linux(settings.hci_device.as_str());
    match blemock_core::BluerAdvertiser::connect().await {
        Ok(bluez) => run_menu(FallbackAdvertiser::new(bluez, tools), settings).await,
        Err(e) => {
            warn!(error = %e, "BlueZ advertising unavailable, using command-line tools");
            run_menu(tools, settings).await
        }
    }
}

#[cfg(not(feature = "bluetooth"))]
async fn start_menu(settings: &AdvertiseSettings) -> anyhow::Result<()> {
    run_menu(FallbackAdvertiser::linux(settings.hci_device.as_str()), settings).await
}

async fn run_menu<A: Advertiser>(
    mut advertiser: A,
    settings: &AdvertiseSettings,
) -> anyhow::Result<()> {
    println!();
    println!("Initializing Bluetooth...");
    advertiser.prepare().await?;
    println!("Bluetooth ready!");

    let mut stop = shutdown::listen_for_shutdown();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let identities = &settings.identities;
    let heartbeat = Duration::from_secs(settings.heartbeat_secs.max(1));

    while !*stop.borrow() {
        println!();
        print!("{}", menu::render_menu(identities));
        println!();
        print!("{}", menu::prompt(identities.len()));
        std::io::stdout().flush().ok();

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = stop.changed() => None,
        };
        let Some(line) = line else { break };

        match menu::parse_choice(&line, identities.len()) {
            MenuChoice::Exit => break,
            MenuChoice::Identity(index) => {
                broadcast(
                    &mut advertiser,
                    &identities[index],
                    &mut lines,
                    &mut stop,
                    heartbeat,
                )
                .await;
            }
            MenuChoice::OutOfRange => {
                println!("   Invalid choice. Please enter 1-{}.", identities.len());
            }
            MenuChoice::NotANumber => println!("   Please enter a number."),
        }
    }

    if let Err(e) = advertiser.stop().await {
        warn!(error = %e, "Could not stop advertising on exit");
    }
    println!();
    println!("Goodbye!");
    Ok(())
}

async fn broadcast<A: Advertiser>(
    advertiser: &mut A,
    name: &str,
    lines: &mut InputLines,
    stop: &mut StopSignal,
    heartbeat: Duration,
) {
    if let Err(e) = advertiser.start(name).await {
        warn!(error = %e, name, "Advertising failed");
        println!("   Failed to start advertising: {e}");
        return;
    }

    let rule = "=".repeat(55);
    println!();
    println!("{rule}");
    println!("NOW BROADCASTING: {name}");
    println!("{rule}");
    println!();
    println!("On your Android phone:");
    println!("  1. Go to Settings > Connected devices");
    println!("  2. Tap 'Pair new device'");
    println!("  3. Look for '{name}'");
    println!();
    println!("Press Enter to stop and choose another device...");
    println!("(or Ctrl+C to exit)");
    println!();

    let started = Instant::now();
    let mut ticker = tokio::time::interval_at(started + heartbeat, heartbeat);
    let mut input_open = true;
    let deadline = tokio::time::sleep(NO_INPUT_BROADCAST);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => match line {
                Ok(Some(_)) => break,
                Ok(None) | Err(_) => {
                    info!("No interactive input, broadcasting for {NO_INPUT_BROADCAST:?}");
                    input_open = false;
                    deadline.as_mut().reset(Instant::now() + NO_INPUT_BROADCAST);
                }
            },
            () = &mut deadline, if !input_open => break,
            _ = ticker.tick() => {
                println!(
                    "   Still broadcasting '{name}'... ({}s)",
                    started.elapsed().as_secs()
                );
            }
            _ = stop.changed() => break,
        }
    }

    match advertiser.stop().await {
        Ok(()) => println!("   Stopped broadcasting"),
        Err(e) => println!("   Could not stop broadcasting: {e}"),
    }
}
