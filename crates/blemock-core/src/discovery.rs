//! Bluetooth device discovery.
//!
//! Discovery is a collaborator with a single operation: report the devices
//! observable right now, within a fixed timeout. The BlueZ adapter is only
//! compiled with the `bluetooth` feature; [`MockDiscovery`] replays scripted
//! batches for tests and dry runs.

use std::collections::VecDeque;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{BleMockError, Result};
use crate::registry::Sighting;

#[cfg(feature = "bluetooth")]
pub use bluez::BluerDiscovery;

static MAC_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)[0-9a-f]{2}(:[0-9a-f]{2}){5}$").expect("valid regex"));

/// Returns `true` for colon-separated 48-bit addresses like `AA:BB:CC:DD:EE:FF`.
///
/// macOS reports per-host UUIDs instead of hardware addresses, so callers
/// must not reject addresses that fail this check.
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_ADDRESS.is_match(address)
}

/// Canonical registry key for a reported address.
#[must_use]
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    if is_valid_mac_address(trimmed) {
        trimmed.to_ascii_uppercase()
    } else {
        trimmed.to_string()
    }
}

/// A device reported by one discovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Address as reported by the platform.
    pub address: String,
    /// Advertised name, if any.
    pub name: Option<String>,
    /// Signal strength, if reported.
    pub rssi: Option<i16>,
}

impl DiscoveredDevice {
    /// Creates a discovered device.
    pub fn new(address: impl Into<String>, name: Option<&str>, rssi: Option<i16>) -> Self {
        Self {
            address: address.into(),
            name: name.map(String::from),
            rssi,
        }
    }

    /// Converts the report into a registry sighting stamped with `timestamp`.
    #[must_use]
    pub fn into_sighting(self, timestamp: &str) -> Sighting {
        Sighting::new(
            normalize_address(&self.address),
            self.name,
            self.rssi,
            timestamp,
        )
    }
}

/// Source of "currently observable" devices.
#[allow(async_fn_in_trait)]
pub trait DeviceDiscovery {
    /// Runs one discovery pass bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`BleMockError::DiscoveryFailed`] if the platform call fails.
    async fn discover(&mut self, timeout: Duration) -> Result<Vec<DiscoveredDevice>>;
}

/// Replays scripted discovery results.
///
/// Once the script runs out every pass reports no devices.
#[derive(Debug, Default)]
pub struct MockDiscovery {
    script: VecDeque<Result<Vec<DiscoveredDevice>>>,
    calls: usize,
}

impl MockDiscovery {
    /// Creates a mock that returns `batches` in order.
    #[must_use]
    pub fn new(batches: Vec<Vec<DiscoveredDevice>>) -> Self {
        Self {
            script: batches.into_iter().map(Ok).collect(),
            calls: 0,
        }
    }

    /// Queues a successful pass.
    pub fn push_batch(&mut self, batch: Vec<DiscoveredDevice>) {
        self.script.push_back(Ok(batch));
    }

    /// Queues a failing pass.
    pub fn push_failure(&mut self, message: &str) {
        self.script
            .push_back(Err(BleMockError::DiscoveryFailed(message.to_string())));
    }

    /// Number of passes run so far.
    #[must_use]
    pub const fn calls(&self) -> usize {
        self.calls
    }
}

impl DeviceDiscovery for MockDiscovery {
    async fn discover(&mut self, _timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        self.calls += 1;
        self.script.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[cfg(feature = "bluetooth")]
mod bluez {
    use std::collections::HashSet;
    use std::time::Duration;

    use bluer::{Adapter, AdapterEvent, Address, Session};
    use futures::{pin_mut, StreamExt};
    use tracing::{debug, info};

    use super::{DeviceDiscovery, DiscoveredDevice};
    use crate::error::{BleMockError, Result};

    /// Discovery through the BlueZ daemon.
    pub struct BluerDiscovery {
        _session: Session,
        adapter: Adapter,
    }

    impl BluerDiscovery {
        /// Connects to BlueZ and powers on the default adapter.
        ///
        /// # Errors
        ///
        /// Returns [`BleMockError::PrerequisiteMissing`] if BlueZ or an
        /// adapter is unavailable.
        pub async fn new() -> Result<Self> {
            let unavailable =
                |e: bluer::Error| BleMockError::PrerequisiteMissing(format!("Bluetooth: {e}"));

            let session = Session::new().await.map_err(unavailable)?;
            let adapter = session.default_adapter().await.map_err(unavailable)?;
            adapter.set_powered(true).await.map_err(unavailable)?;
            info!(adapter = adapter.name(), "Bluetooth adapter ready");

            Ok(Self {
                _session: session,
                adapter,
            })
        }
    }

    impl DeviceDiscovery for BluerDiscovery {
        async fn discover(&mut self, timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
            let events = self.adapter.discover_devices().await?;
            pin_mut!(events);

            let mut seen: HashSet<Address> = HashSet::new();
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    () = &mut deadline => break,
                    event = events.next() => match event {
                        Some(AdapterEvent::DeviceAdded(address)) => {
                            seen.insert(address);
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }

            let mut devices = Vec::with_capacity(seen.len());
            for address in seen {
                let device = self.adapter.device(address)?;
                let name = device.name().await.ok().flatten();
                let rssi = device.rssi().await.ok().flatten();
                debug!(%address, ?name, ?rssi, "Discovered device");
                devices.push(DiscoveredDevice {
                    address: address.to_string(),
                    name,
                    rssi,
                });
            }
            Ok(devices)
        }
    }
}
