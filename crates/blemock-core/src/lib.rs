//! # blemock-core
//!
//! Core logic for collecting real Bluetooth sightings and replaying them as a
//! believable mock scan feed on an Android target.
//!
//! This crate provides:
//! - A persistent, merge-only registry of observed devices
//! - A visibility simulator that fabricates drifting scan results
//! - Discovery, delivery and advertising collaborators behind traits
//! - Scanner and broadcaster loops with cooperative shutdown
//!
//! ## Architecture
//!
//! - [`registry`] - Sighting merge rules and the device registry
//! - [`storage`] - Atomic JSON persistence of the registry
//! - [`simulator`] - Per-cycle visibility sampling and RSSI random walk
//! - [`export`] - One-shot registry export for the Android consumer
//! - [`discovery`] - Device discovery (BlueZ or scripted)
//! - [`delivery`] - Scan delivery over adb
//! - [`advertiser`] - Named-identity advertising and its state machine
//! - [`session`] - Scanner and broadcaster loops
//! - [`config`] - Layered settings loading, saving and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared helpers and small value types

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod advertiser;
pub mod config;
pub mod delivery;
pub mod discovery;
pub mod error;
pub mod export;
pub mod registry;
pub mod session;
pub mod simulator;
pub mod storage;
pub mod types;

// Re-export primary types for convenience
#[cfg(feature = "bluetooth")]
pub use advertiser::BluerAdvertiser;
pub use advertiser::{
    advertising_payload, Advertiser, AdvertiserState, BtmgmtAdvertiser, FallbackAdvertiser,
    HcitoolAdvertiser,
};
pub use config::{
    default_config_path, AdbSettings, AdvertiseSettings, ScannerSettings, Settings,
    SimulationConfig,
};
pub use delivery::{locate_adb, AdbDelivery, RecordingDelivery, ScanDelivery};
#[cfg(feature = "bluetooth")]
pub use discovery::BluerDiscovery;
pub use discovery::{
    is_valid_mac_address, normalize_address, DeviceDiscovery, DiscoveredDevice, MockDiscovery,
};
pub use error::{BleMockError, Result};
pub use export::{export_registry, ExportedDevice};
pub use registry::{DeviceRecord, MergeOutcome, MergeSummary, Registry, Sighting};
pub use session::{
    stop_channel, BroadcastReport, BroadcastSession, BroadcastSummary, ScanReport,
    ScanSummary, ScannerSession, StopSignal,
};
pub use simulator::{ScanCycle, Simulator, VisibleDeviceView};
pub use storage::{RegistryStore, DEFAULT_REGISTRY_FILE};
pub use types::{is_meaningful_name, timestamp_now, RssiBand, UNKNOWN_NAME};
