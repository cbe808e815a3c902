//! Accumulating registry of observed Bluetooth devices.
//!
//! The registry is an owned map from hardware address to [`DeviceRecord`].
//! Records are created on first sighting and updated on every later one;
//! they are never removed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BleMockError, Result};
use crate::types::{is_meaningful_name, UNKNOWN_NAME};

/// Everything known about one hardware address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Hardware address, unique key of the registry.
    pub address: String,

    /// Advertised name, or `Unknown`.
    pub name: String,

    /// Signal strength of the latest sighting in dBm.
    pub rssi: Option<i16>,

    /// Timestamp of the first sighting. Never changes.
    pub first_seen: String,

    /// Timestamp of the latest sighting.
    pub last_seen: String,

    /// Number of sightings merged so far.
    #[serde(default = "default_times_seen")]
    pub times_seen: u64,
}

const fn default_times_seen() -> u64 {
    1
}

impl DeviceRecord {
    /// Whether the device has a real name.
    #[must_use]
    pub fn is_named(&self) -> bool {
        is_meaningful_name(&self.name)
    }
}

/// One observation of a device by the discovery collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    /// Hardware address. Must be non-empty.
    pub address: String,
    /// Advertised name, if any.
    pub name: Option<String>,
    /// Observed signal strength in dBm.
    pub rssi: Option<i16>,
    /// When the observation was made.
    pub timestamp: String,
}

impl Sighting {
    /// Creates a sighting.
    pub fn new(
        address: impl Into<String>,
        name: Option<String>,
        rssi: Option<i16>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            name,
            rssi,
            timestamp: timestamp.into(),
        }
    }
}

/// What a merge did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new record was created.
    Created,
    /// An existing record was updated.
    Updated,
}

/// What one merged batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Addresses that got a new record, in merge order.
    pub created: Vec<String>,
    /// Sightings that updated a record.
    pub updated: usize,
    /// Sightings skipped as invalid.
    pub rejected: usize,
}

impl MergeSummary {
    /// Number of records created.
    #[must_use]
    pub fn new_count(&self) -> usize {
        self.created.len()
    }

    /// Total sightings accepted.
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.new_count() + self.updated
    }
}

/// Address-keyed store of every device ever observed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    devices: BTreeMap<String, DeviceRecord>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one sighting into the registry.
    ///
    /// # Errors
    ///
    /// Returns [`BleMockError::InvalidSighting`] if the address is blank; the
    /// registry is left untouched.
    pub fn merge(&mut self, sighting: Sighting) -> Result<MergeOutcome> {
        let address = sighting.address.trim();
        if address.is_empty() {
            return Err(BleMockError::InvalidSighting(
                "sighting has no address".to_string(),
            ));
        }

        let incoming_name = sighting.name.filter(|n| is_meaningful_name(n));

        if let Some(record) = self.devices.get_mut(address) {
            record.last_seen = sighting.timestamp;
            record.rssi = sighting.rssi;
            record.times_seen += 1;
            if let Some(name) = incoming_name {
                if !record.is_named() {
                    debug!(address, %name, "Device name discovered");
                    record.name = name;
                }
            }
            return Ok(MergeOutcome::Updated);
        }

        let record = DeviceRecord {
            address: address.to_string(),
            name: incoming_name.unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            rssi: sighting.rssi,
            first_seen: sighting.timestamp.clone(),
            last_seen: sighting.timestamp,
            times_seen: 1,
        };
        self.devices.insert(record.address.clone(), record);
        Ok(MergeOutcome::Created)
    }

    /// Merges a batch, skipping invalid sightings.
    pub fn merge_batch<I>(&mut self, sightings: I) -> MergeSummary
    where
        I: IntoIterator<Item = Sighting>,
    {
        let mut summary = MergeSummary::default();
        for sighting in sightings {
            let address = sighting.address.trim().to_string();
            match self.merge(sighting) {
                Ok(MergeOutcome::Created) => summary.created.push(address),
                Ok(MergeOutcome::Updated) => summary.updated += 1,
                Err(e) => {
                    warn!(error = %e, "Skipping sighting");
                    summary.rejected += 1;
                }
            }
        }
        summary
    }

    /// Looks up a record by address.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<&DeviceRecord> {
        self.devices.get(address)
    }

    /// Number of known devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no device has been seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Iterates over records in address order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values()
    }

    /// Addresses of devices with a real name, in address order.
    #[must_use]
    pub fn named_addresses(&self) -> Vec<&str> {
        self.iter()
            .filter(|r| r.is_named())
            .map(|r| r.address.as_str())
            .collect()
    }

    /// Addresses of devices still called `Unknown`, in address order.
    #[must_use]
    pub fn unknown_addresses(&self) -> Vec<&str> {
        self.iter()
            .filter(|r| !r.is_named())
            .map(|r| r.address.as_str())
            .collect()
    }

    /// Number of named devices.
    #[must_use]
    pub fn named_count(&self) -> usize {
        self.iter().filter(|r| r.is_named()).count()
    }

    /// Records ordered for display: by name, case-insensitively.
    #[must_use]
    pub fn sorted_for_display(&self) -> Vec<&DeviceRecord> {
        let mut records: Vec<&DeviceRecord> = self.iter().collect();
        records.sort_by_cached_key(|r| r.name.to_lowercase());
        records
    }
}

impl FromIterator<DeviceRecord> for Registry {
    fn from_iter<T: IntoIterator<Item = DeviceRecord>>(iter: T) -> Self {
        Self {
            devices: iter
                .into_iter()
                .map(|record| (record.address.clone(), record))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sighting(address: &str, name: Option<&str>, rssi: Option<i16>, at: &str) -> Sighting {
        Sighting::new(address, name.map(String::from), rssi, at)
    }

    fn seeded_registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .merge(sighting("AA", Some("Foo"), Some(-45), "t0"))
            .unwrap();
        registry.merge(sighting("BB", None, Some(-70), "t0")).unwrap();
        registry
    }

    #[test]
    fn test_new_address_creates_record() {
        let mut registry = seeded_registry();
        let outcome = registry
            .merge(sighting("CC", Some("Bar"), Some(-40), "t1"))
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Created);
        assert_eq!(registry.len(), 3);
        let c = registry.get("CC").unwrap();
        assert_eq!(c.times_seen, 1);
        assert_eq!(c.first_seen, "t1");
        assert_eq!(c.last_seen, "t1");
        assert_eq!(c.name, "Bar");
        assert_eq!(c.rssi, Some(-40));
    }

    #[test]
    fn test_unnamed_update_keeps_unknown() {
        let mut registry = seeded_registry();
        let outcome = registry
            .merge(sighting("BB", Some(""), Some(-60), "t2"))
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Updated);
        let b = registry.get("BB").unwrap();
        assert_eq!(b.name, UNKNOWN_NAME);
        assert_eq!(b.last_seen, "t2");
        assert_eq!(b.first_seen, "t0");
        assert_eq!(b.times_seen, 2);
        assert_eq!(b.rssi, Some(-60));
    }

    #[test]
    fn test_name_upgrades_from_unknown() {
        let mut registry = seeded_registry();
        registry
            .merge(sighting("BB", Some("Teja's Xbox"), None, "t3"))
            .unwrap();
        assert_eq!(registry.get("BB").unwrap().name, "Teja's Xbox");
    }

    #[test]
    fn test_known_name_is_not_replaced() {
        let mut registry = seeded_registry();
        registry
            .merge(sighting("AA", Some("Renamed"), Some(-50), "t4"))
            .unwrap();
        assert_eq!(registry.get("AA").unwrap().name, "Foo");
    }

    #[test]
    fn test_missing_rssi_is_stored_as_none() {
        let mut registry = seeded_registry();
        registry.merge(sighting("AA", None, None, "t5")).unwrap();
        assert_eq!(registry.get("AA").unwrap().rssi, None);
    }

    #[test]
    fn test_blank_address_is_rejected() {
        let mut registry = seeded_registry();
        let err = registry.merge(sighting("  ", Some("Ghost"), None, "t6"));
        assert!(matches!(err, Err(BleMockError::InvalidSighting(_))));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_merge_batch_counts() {
        let mut registry = seeded_registry();
        let summary = registry.merge_batch(vec![
            sighting("AA", None, Some(-44), "t7"),
            sighting("DD", None, Some(-80), "t7"),
            sighting("", None, None, "t7"),
        ]);
        assert_eq!(
            summary,
            MergeSummary {
                created: vec!["DD".to_string()],
                updated: 1,
                rejected: 1
            }
        );
        assert_eq!(summary.accepted(), 2);
    }

    #[test]
    fn test_partition_by_name() {
        let registry = seeded_registry();
        assert_eq!(registry.named_addresses(), vec!["AA"]);
        assert_eq!(registry.unknown_addresses(), vec!["BB"]);
        assert_eq!(registry.named_count(), 1);
    }

    #[test]
    fn test_display_order_is_case_insensitive() {
        let mut registry = Registry::new();
        registry.merge(sighting("01", Some("zeta"), None, "t")).unwrap();
        registry.merge(sighting("02", Some("Alpha"), None, "t")).unwrap();
        registry.merge(sighting("03", Some("beta"), None, "t")).unwrap();

        let names: Vec<&str> = registry
            .sorted_for_display()
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["Alpha", "beta", "zeta"]);
    }

    #[test]
    fn test_serializes_as_address_keyed_object() {
        let registry = seeded_registry();
        let json = serde_json::to_value(&registry).unwrap();
        assert_eq!(json["AA"]["name"], "Foo");
        assert_eq!(json["BB"]["times_seen"], 1);
    }

    #[test]
    fn test_missing_times_seen_defaults_to_one() {
        let json = r#"{"AA": {"address": "AA", "name": "Foo", "rssi": null,
            "first_seen": "t0", "last_seen": "t0"}}"#;
        let registry: Registry = serde_json::from_str(json).unwrap();
        assert_eq!(registry.get("AA").unwrap().times_seen, 1);
    }

    fn arb_sighting() -> impl Strategy<Value = Sighting> {
        (
            prop::sample::select(vec!["AA", "BB", "CC", "DD"]),
            prop::option::of(prop::sample::select(vec!["", "Unknown", "Foo", "Bar"])),
            prop::option::of(-100i16..0),
            0u32..1000,
        )
            .prop_map(|(address, name, rssi, t)| {
                Sighting::new(address, name.map(String::from), rssi, format!("t{t}"))
            })
    }

    proptest! {
        #[test]
        fn prop_times_seen_counts_merges(sightings in prop::collection::vec(arb_sighting(), 0..64)) {
            let mut registry = Registry::new();
            let mut expected: BTreeMap<String, u64> = BTreeMap::new();
            for s in sightings {
                *expected.entry(s.address.clone()).or_default() += 1;
                registry.merge(s).unwrap();
            }
            for (address, count) in expected {
                prop_assert_eq!(registry.get(&address).unwrap().times_seen, count);
            }
        }

        #[test]
        fn prop_first_seen_is_stable(sightings in prop::collection::vec(arb_sighting(), 1..64)) {
            let mut registry = Registry::new();
            let mut first: BTreeMap<String, String> = BTreeMap::new();
            for s in sightings {
                first.entry(s.address.clone()).or_insert_with(|| s.timestamp.clone());
                registry.merge(s).unwrap();
            }
            for (address, at) in first {
                prop_assert_eq!(&registry.get(&address).unwrap().first_seen, &at);
            }
        }

        #[test]
        fn prop_names_never_revert(sightings in prop::collection::vec(arb_sighting(), 1..64)) {
            let mut registry = Registry::new();
            for s in sightings {
                let address = s.address.clone();
                let before = registry.get(&address).map(|r| r.name.clone());
                registry.merge(s).unwrap();
                if let Some(before) = before.filter(|n| is_meaningful_name(n)) {
                    prop_assert_eq!(&registry.get(&address).unwrap().name, &before);
                }
            }
        }
    }
}
