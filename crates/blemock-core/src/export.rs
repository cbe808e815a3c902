//! One-shot export of the whole registry for an Android consumer.

use serde::{Deserialize, Serialize};

use crate::registry::{DeviceRecord, Registry};
use crate::types::is_meaningful_name;

/// A registry row in the consumer's camelCase format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedDevice {
    /// Hardware address.
    pub address: String,
    /// Name or `Unknown`.
    pub name: String,
    /// Last observed signal strength.
    pub rssi: Option<i16>,
    /// First sighting.
    pub first_seen: String,
    /// Latest sighting.
    pub last_seen: String,
    /// Sighting count.
    pub times_seen: u64,
}

impl From<&DeviceRecord> for ExportedDevice {
    fn from(record: &DeviceRecord) -> Self {
        Self {
            address: record.address.clone(),
            name: record.name.clone(),
            rssi: record.rssi,
            first_seen: record.first_seen.clone(),
            last_seen: record.last_seen.clone(),
            times_seen: record.times_seen,
        }
    }
}

/// Flattens the registry: named devices first, each group by lowercase name.
#[must_use]
pub fn export_registry(registry: &Registry) -> Vec<ExportedDevice> {
    let mut devices: Vec<ExportedDevice> = registry.iter().map(ExportedDevice::from).collect();
    devices.sort_by_cached_key(|d| (!is_meaningful_name(&d.name), d.name.to_lowercase()));
    devices
}
