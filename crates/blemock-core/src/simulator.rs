//! Visibility simulation: fabricates believable scan results from a registry.
//!
//! Every cycle shows all named devices plus a changing sample of unknown
//! ones. Each device keeps an RSSI baseline that takes a small bounded random
//! walk per cycle, so signals drift instead of jumping.

use std::cmp::Reverse;
use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::SimulationConfig;
use crate::registry::Registry;
use crate::types::is_meaningful_name;

/// One device as a consumer sees it during a single cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleDeviceView {
    /// Hardware address.
    pub address: String,
    /// Registry name.
    pub name: String,
    /// Simulated signal strength for this cycle.
    pub rssi: i16,
    /// Cycle timestamp.
    pub last_seen: String,
    /// First sighting from the registry.
    pub first_seen: String,
    /// Sighting count from the registry.
    pub times_seen: u64,
    /// Whether the device accepts connections this cycle.
    pub is_connectable: bool,
}

impl VisibleDeviceView {
    /// Whether the device has a real name.
    #[must_use]
    pub fn is_named(&self) -> bool {
        is_meaningful_name(&self.name)
    }
}

/// Result of one simulated scan pass, ordered for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanCycle {
    /// Visible devices: named first, then strongest signal first.
    pub devices: Vec<VisibleDeviceView>,
}

impl ScanCycle {
    /// Number of visible devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether nothing is visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Number of visible named devices.
    #[must_use]
    pub fn named_count(&self) -> usize {
        self.devices.iter().filter(|d| d.is_named()).count()
    }

    /// Device with the strongest signal.
    #[must_use]
    pub fn strongest(&self) -> Option<&VisibleDeviceView> {
        self.devices.iter().max_by_key(|d| d.rssi)
    }

    /// Serializes the device list for the consumer.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&self.devices)?)
    }
}

/// Stateful generator of [`ScanCycle`]s.
pub struct Simulator<R = StdRng> {
    config: SimulationConfig,
    rng: R,
    baselines: HashMap<String, i16>,
}

impl Simulator<StdRng> {
    /// Creates a simulator seeded from `config.seed`, or from entropy.
    ///
    /// # Panics
    ///
    /// Panics if `config` fails [`SimulationConfig::validate`].
    #[must_use]
    pub fn from_config(config: SimulationConfig, registry: &Registry) -> Self {
        let rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self::with_rng(config, rng, registry)
    }
}

impl<R: Rng> Simulator<R> {
    /// Creates a simulator with an explicit random source and seeds a
    /// baseline for every registry address.
    ///
    /// `config` is expected to have passed [`SimulationConfig::validate`];
    /// [`Settings::load_from`](crate::config::Settings::load_from) already
    /// checks it.
    ///
    /// # Panics
    ///
    /// Panics on an inverted RSSI band. Later cycles panic on a negative
    /// fluctuation or a connectable probability outside `0..=1`.
    pub fn with_rng(config: SimulationConfig, rng: R, registry: &Registry) -> Self {
        let mut simulator = Self {
            config,
            rng,
            baselines: HashMap::with_capacity(registry.len()),
        };
        for record in registry.iter() {
            simulator.baseline_mut(&record.address);
        }
        simulator
    }

    /// Simulation settings in use.
    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Current RSSI baseline of an address.
    #[must_use]
    pub fn baseline(&self, address: &str) -> Option<i16> {
        self.baselines.get(address).copied()
    }

    fn baseline_mut(&mut self, address: &str) -> &mut i16 {
        let band = self.config.rssi_band;
        let rng = &mut self.rng;
        self.baselines
            .entry(address.to_string())
            .or_insert_with(|| rng.gen_range(band.min..=band.max))
    }

    /// Number of unknown devices to show given the pool sizes.
    fn unknown_sample_size(&mut self, named: usize, unknown: usize) -> usize {
        let upper = unknown.min(self.config.max_unknown_sample);
        let lower = self.config.min_visible.saturating_sub(named).min(upper);
        self.rng.gen_range(lower..=upper)
    }

    /// Produces one scan cycle stamped with `now`.
    pub fn simulate_cycle(&mut self, registry: &Registry, now: &str) -> ScanCycle {
        let named = registry.named_addresses();
        let unknown = registry.unknown_addresses();

        let sample_size = self.unknown_sample_size(named.len(), unknown.len());
        let mut visible: Vec<&str> = named;
        visible.extend(unknown.choose_multiple(&mut self.rng, sample_size).copied());
        trace!(visible = visible.len(), sampled = sample_size, "Visibility drawn");

        let fluctuation = self.config.rssi_fluctuation;
        let band = self.config.rssi_band;
        let connectable_probability = self.config.connectable_probability;

        let mut devices = Vec::with_capacity(visible.len());
        for address in visible {
            let Some(record) = registry.get(address) else {
                continue;
            };

            let step = self.rng.gen_range(-fluctuation..=fluctuation);
            let baseline = self.baseline_mut(address);
            *baseline = band.clamp(baseline.saturating_add(step));
            let rssi = *baseline;

            devices.push(VisibleDeviceView {
                address: record.address.clone(),
                name: record.name.clone(),
                rssi,
                last_seen: now.to_string(),
                first_seen: record.first_seen.clone(),
                times_seen: record.times_seen,
                is_connectable: self.rng.gen_bool(connectable_probability),
            });
        }

        devices.sort_by(|a, b| {
            (!a.is_named(), Reverse(a.rssi), &a.address).cmp(&(
                !b.is_named(),
                Reverse(b.rssi),
                &b.address,
            ))
        });

        ScanCycle { devices }
    }
}
