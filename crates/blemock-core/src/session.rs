//! Long-running scanner and broadcaster loops.
//!
//! Both loops run until a stop is requested through a [`StopSignal`]. A stop
//! is honoured at the top of every iteration and while sleeping between
//! iterations; it never interrupts a discovery pass or a delivery that is
//! already in flight. Each iteration is described by a report handed to a
//! caller-supplied callback, which is how the binaries print status lines.

use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use rand::rngs::StdRng;
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ScannerSettings;
use crate::delivery::ScanDelivery;
use crate::discovery::DeviceDiscovery;
use crate::error::BleMockError;
use crate::registry::{DeviceRecord, MergeSummary, Registry};
use crate::simulator::Simulator;
use crate::storage::RegistryStore;
use crate::types::format_timestamp;

/// Extra time a discovery pass gets beyond its own timeout before it is
/// abandoned.
const DISCOVERY_GRACE: Duration = Duration::from_secs(5);

/// Receiving half of a stop request. `true` means stop.
pub type StopSignal = watch::Receiver<bool>;

/// Creates a stop channel in the "keep running" state.
#[must_use]
pub fn stop_channel() -> (watch::Sender<bool>, StopSignal) {
    watch::channel(false)
}

/// Sleeps for `duration`, waking early if a stop is requested.
///
/// Returns `true` if the caller should stop.
async fn pause(duration: Duration, stop: &mut StopSignal) -> bool {
    if *stop.borrow() {
        return true;
    }

    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            () = &mut sleep => return *stop.borrow(),
            changed = stop.changed() => match changed {
                Ok(()) if *stop.borrow_and_update() => return true,
                Ok(()) => {}
                // Sender gone: nobody can ask us to stop any more.
                Err(_) => {
                    (&mut sleep).await;
                    return false;
                }
            },
        }
    }
}

/// Outcome of one scanner iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanReport {
    /// Discovery succeeded and the results were merged.
    Merged {
        /// One-based iteration number.
        scan: u64,
        /// When the pass started.
        at: NaiveDateTime,
        /// Devices reported by this pass.
        found: usize,
        /// Records created during this pass.
        new_devices: Vec<DeviceRecord>,
        /// Merge counts.
        summary: MergeSummary,
        /// Registry size after the merge.
        total: usize,
        /// Set if the registry could not be written afterwards.
        save_error: Option<String>,
    },
    /// Discovery failed; the registry is unchanged.
    Failed {
        /// One-based iteration number.
        scan: u64,
        /// When the pass started.
        at: NaiveDateTime,
        /// Why discovery failed.
        error: String,
    },
}

impl ScanReport {
    /// Iteration number.
    #[must_use]
    pub const fn scan(&self) -> u64 {
        match self {
            Self::Merged { scan, .. } | Self::Failed { scan, .. } => *scan,
        }
    }
}

/// Totals at the end of a scanner run.
#[derive(Debug, Clone)]
pub struct ScanSummary {
    /// Iterations started.
    pub scans: u64,
    /// Distinct devices in the registry.
    pub unique_devices: usize,
    /// Final registry.
    pub registry: Registry,
    /// Set if the final save failed.
    pub save_error: Option<String>,
}

/// Repeatedly discovers devices and folds them into a persisted registry.
pub struct ScannerSession<D> {
    discovery: D,
    store: RegistryStore,
    registry: Registry,
    interval: Duration,
    timeout: Duration,
    max_scans: Option<u64>,
}

impl<D: DeviceDiscovery> ScannerSession<D> {
    /// Creates a session, loading whatever registry the store already holds.
    pub fn new(discovery: D, store: RegistryStore, settings: &ScannerSettings) -> Self {
        let registry = store.load_or_default();
        if !registry.is_empty() {
            info!(
                devices = registry.len(),
                path = %store.path().display(),
                "Loaded existing registry"
            );
        }
        Self {
            discovery,
            store,
            registry,
            interval: settings.scan_interval(),
            timeout: settings.discovery_timeout(),
            max_scans: None,
        }
    }

    /// Stops on its own after `scans` iterations.
    #[must_use]
    pub const fn with_max_scans(mut self, scans: u64) -> Self {
        self.max_scans = Some(scans);
        self
    }

    /// Registry as of the last merge.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Runs one discovery pass, merges it and saves the registry.
    pub async fn scan_once(&mut self, scan: u64) -> ScanReport {
        let at = Local::now().naive_local();
        let timestamp = format_timestamp(at);

        let discovered = match tokio::time::timeout(
            self.timeout + DISCOVERY_GRACE,
            self.discovery.discover(self.timeout),
        )
        .await
        {
            Ok(Ok(devices)) => devices,
            Ok(Err(e)) => {
                warn!(scan, error = %e, "Discovery failed, skipping scan");
                return ScanReport::Failed {
                    scan,
                    at,
                    error: e.to_string(),
                };
            }
            Err(_) => {
                let e = BleMockError::DiscoveryFailed(format!(
                    "no result within {:?}",
                    self.timeout + DISCOVERY_GRACE
                ));
                warn!(scan, error = %e, "Discovery timed out, skipping scan");
                return ScanReport::Failed {
                    scan,
                    at,
                    error: e.to_string(),
                };
            }
        };

        let found = discovered.len();
        let summary = self.registry.merge_batch(
            discovered
                .into_iter()
                .map(|device| device.into_sighting(&timestamp)),
        );
        let new_devices = summary
            .created
            .iter()
            .filter_map(|address| self.registry.get(address).cloned())
            .collect();

        let save_error = self.store.save(&self.registry).err().map(|e| {
            warn!(error = %e, "Could not save registry");
            e.to_string()
        });

        debug!(
            scan,
            found,
            new = summary.new_count(),
            total = self.registry.len(),
            "Scan merged"
        );

        ScanReport::Merged {
            scan,
            at,
            found,
            new_devices,
            summary,
            total: self.registry.len(),
            save_error,
        }
    }

    /// Scans until stopped, then saves one final time.
    pub async fn run<F>(mut self, stop: &mut StopSignal, mut on_scan: F) -> ScanSummary
    where
        F: FnMut(&ScanReport),
    {
        let mut scans = 0;
        loop {
            if *stop.borrow() {
                break;
            }
            scans += 1;
            let report = self.scan_once(scans).await;
            on_scan(&report);

            if self.max_scans.is_some_and(|max| scans >= max) {
                break;
            }
            if pause(self.interval, stop).await {
                break;
            }
        }

        let save_error = self.store.save(&self.registry).err().map(|e| {
            warn!(error = %e, "Final registry save failed");
            e.to_string()
        });
        info!(
            scans,
            devices = self.registry.len(),
            path = %self.store.path().display(),
            "Scanner stopped"
        );

        ScanSummary {
            scans,
            unique_devices: self.registry.len(),
            registry: self.registry,
            save_error,
        }
    }
}

/// Outcome of one broadcaster iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastReport {
    /// The cycle's payload reached the consumer.
    Delivered {
        /// One-based cycle number.
        cycle: u64,
        /// When the cycle ran.
        at: NaiveDateTime,
        /// Devices in the payload.
        visible: usize,
        /// Named devices in the payload.
        named: usize,
        /// Name and RSSI of the strongest device.
        strongest: Option<(String, i16)>,
    },
    /// The payload could not be delivered.
    Failed {
        /// One-based cycle number.
        cycle: u64,
        /// When the cycle ran.
        at: NaiveDateTime,
        /// Why delivery failed.
        error: String,
    },
}

/// Totals at the end of a broadcaster run.
#[derive(Debug)]
pub struct BroadcastSummary<D> {
    /// Cycles started.
    pub cycles: u64,
    /// Cycles whose payload could not be delivered.
    pub failed_deliveries: u64,
    /// The delivery collaborator, handed back to the caller.
    pub delivery: D,
}

/// Replays simulated scan cycles to a delivery target.
pub struct BroadcastSession<D, R = StdRng> {
    registry: Registry,
    simulator: Simulator<R>,
    delivery: D,
    interval: Duration,
    max_cycles: Option<u64>,
}

impl<D: ScanDelivery, R: Rng> BroadcastSession<D, R> {
    /// Creates a session over a loaded registry.
    pub fn new(registry: Registry, simulator: Simulator<R>, delivery: D) -> Self {
        let interval = simulator.config().update_interval();
        Self {
            registry,
            simulator,
            delivery,
            interval,
            max_cycles: None,
        }
    }

    /// Stops on its own after `cycles` iterations.
    #[must_use]
    pub const fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    /// Simulates one cycle and delivers it.
    pub async fn cycle_once(&mut self, cycle: u64) -> BroadcastReport {
        let at = Local::now().naive_local();
        let scan = self
            .simulator
            .simulate_cycle(&self.registry, &format_timestamp(at));

        let payload = match scan.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(cycle, error = %e, "Could not serialize scan");
                return BroadcastReport::Failed {
                    cycle,
                    at,
                    error: e.to_string(),
                };
            }
        };

        if let Err(e) = self.delivery.push(&payload).await {
            warn!(cycle, error = %e, "Delivery failed, retrying next cycle");
            return BroadcastReport::Failed {
                cycle,
                at,
                error: e.to_string(),
            };
        }

        if let Err(e) = self.delivery.notify_device_count(scan.len()).await {
            debug!(cycle, error = %e, "Device count notification not delivered");
        }

        BroadcastReport::Delivered {
            cycle,
            at,
            visible: scan.len(),
            named: scan.named_count(),
            strongest: scan.strongest().map(|d| (d.name.clone(), d.rssi)),
        }
    }

    /// Broadcasts until stopped.
    pub async fn run<F>(mut self, stop: &mut StopSignal, mut on_cycle: F) -> BroadcastSummary<D>
    where
        F: FnMut(&BroadcastReport),
    {
        let mut cycles = 0;
        let mut failed_deliveries = 0;
        loop {
            if *stop.borrow() {
                break;
            }
            cycles += 1;
            let report = self.cycle_once(cycles).await;
            if matches!(report, BroadcastReport::Failed { .. }) {
                failed_deliveries += 1;
            }
            on_cycle(&report);

            if self.max_cycles.is_some_and(|max| cycles >= max) {
                break;
            }
            if pause(self.interval, stop).await {
                break;
            }
        }

        info!(cycles, failed_deliveries, "Broadcaster stopped");
        BroadcastSummary {
            cycles,
            failed_deliveries,
            delivery: self.delivery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::delivery::RecordingDelivery;
    use crate::discovery::{DiscoveredDevice, MockDiscovery};
    use crate::registry::Sighting;
    use crate::simulator::VisibleDeviceView;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn fast_settings(dir: &TempDir) -> ScannerSettings {
        ScannerSettings {
            registry_path: dir.path().join("devices.json"),
            scan_interval_secs: 0,
            discovery_timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn test_scanner_merges_and_persists_each_scan() {
        let dir = TempDir::new().unwrap();
        let settings = fast_settings(&dir);
        let discovery = MockDiscovery::new(vec![
            vec![
                DiscoveredDevice::new("aa:bb:cc:dd:ee:01", Some("Keys"), Some(-60)),
                DiscoveredDevice::new("aa:bb:cc:dd:ee:02", None, Some(-80)),
            ],
            vec![DiscoveredDevice::new("aa:bb:cc:dd:ee:02", Some("Watch"), Some(-70))],
        ]);
        let store = RegistryStore::new(&settings.registry_path);
        let session = ScannerSession::new(discovery, store.clone(), &settings).with_max_scans(2);

        let (_tx, mut stop) = stop_channel();
        let mut reports = Vec::new();
        let summary = session.run(&mut stop, |r| reports.push(r.clone())).await;

        assert_eq!(summary.scans, 2);
        assert_eq!(summary.unique_devices, 2);
        assert!(summary.save_error.is_none());

        match &reports[0] {
            ScanReport::Merged {
                found, new_devices, ..
            } => {
                assert_eq!(*found, 2);
                assert_eq!(new_devices.len(), 2);
            }
            other => panic!("unexpected report {other:?}"),
        }
        match &reports[1] {
            ScanReport::Merged {
                new_devices,
                summary,
                ..
            } => {
                assert!(new_devices.is_empty());
                assert_eq!(summary.updated, 1);
            }
            other => panic!("unexpected report {other:?}"),
        }

        let saved = store.load_existing().unwrap();
        let watch = saved.get("AA:BB:CC:DD:EE:02").unwrap();
        assert_eq!(watch.name, "Watch");
        assert_eq!(watch.times_seen, 2);
    }

    #[tokio::test]
    async fn test_scanner_skips_failed_discovery() {
        let dir = TempDir::new().unwrap();
        let settings = fast_settings(&dir);
        let mut discovery = MockDiscovery::default();
        discovery.push_failure("adapter busy");
        discovery.push_batch(vec![DiscoveredDevice::new("01", None, None)]);

        let store = RegistryStore::new(&settings.registry_path);
        let session = ScannerSession::new(discovery, store, &settings).with_max_scans(2);

        let (_tx, mut stop) = stop_channel();
        let mut reports = Vec::new();
        let summary = session.run(&mut stop, |r| reports.push(r.clone())).await;

        assert!(matches!(reports[0], ScanReport::Failed { scan: 1, .. }));
        assert!(matches!(reports[1], ScanReport::Merged { scan: 2, .. }));
        assert_eq!(summary.unique_devices, 1);
    }

    /// Discovery that never answers.
    struct StalledDiscovery;

    impl DeviceDiscovery for StalledDiscovery {
        async fn discover(&mut self, _timeout: Duration) -> crate::Result<Vec<DiscoveredDevice>> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scanner_abandons_stalled_discovery() {
        let dir = TempDir::new().unwrap();
        let settings = fast_settings(&dir);
        let store = RegistryStore::new(&settings.registry_path);
        let mut session = ScannerSession::new(StalledDiscovery, store.clone(), &settings);

        let report = session.scan_once(1).await;

        match report {
            ScanReport::Failed { scan, error, .. } => {
                assert_eq!(scan, 1);
                assert!(error.starts_with("Device discovery failed"));
                assert!(error.contains("6s"));
            }
            other => panic!("unexpected report {other:?}"),
        }
        assert!(session.registry().is_empty());
        assert!(!store.exists());
    }

    #[tokio::test]
    async fn test_scanner_resumes_from_existing_registry() {
        let dir = TempDir::new().unwrap();
        let settings = fast_settings(&dir);
        let store = RegistryStore::new(&settings.registry_path);

        let mut existing = Registry::new();
        existing
            .merge(Sighting::new("01", Some("Old".into()), Some(-50), "t0"))
            .unwrap();
        store.save(&existing).unwrap();

        let session = ScannerSession::new(MockDiscovery::default(), store, &settings);
        assert_eq!(session.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_before_start_runs_nothing_but_still_saves() {
        let dir = TempDir::new().unwrap();
        let settings = fast_settings(&dir);
        let store = RegistryStore::new(&settings.registry_path);
        let session = ScannerSession::new(MockDiscovery::default(), store.clone(), &settings);

        let (tx, mut stop) = stop_channel();
        tx.send(true).unwrap();
        let summary = session.run(&mut stop, |_| {}).await;

        assert_eq!(summary.scans, 0);
        assert!(store.exists());
    }

    #[tokio::test]
    async fn test_stop_interrupts_sleep() {
        let dir = TempDir::new().unwrap();
        let mut settings = fast_settings(&dir);
        settings.scan_interval_secs = 3600;
        let store = RegistryStore::new(&settings.registry_path);
        let session = ScannerSession::new(MockDiscovery::default(), store, &settings);

        let (tx, mut stop) = stop_channel();
        let handle = tokio::spawn(async move { session.run(&mut stop, |_| {}).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let summary = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.scans, 1);
    }

    fn sample_registry() -> Registry {
        let mut registry = Registry::new();
        registry.merge_batch(vec![
            Sighting::new("01", Some("Keys".into()), Some(-60), "t0"),
            Sighting::new("02", Some("Watch".into()), Some(-45), "t0"),
            Sighting::new("03", None, Some(-90), "t0"),
            Sighting::new("04", None, None, "t0"),
        ]);
        registry
    }

    fn seeded_session(
        delivery: RecordingDelivery,
    ) -> BroadcastSession<RecordingDelivery, StdRng> {
        let registry = sample_registry();
        let config = SimulationConfig {
            update_interval_ms: 0,
            ..SimulationConfig::default()
        };
        let simulator = Simulator::with_rng(config, StdRng::seed_from_u64(7), &registry);
        BroadcastSession::new(registry, simulator, delivery)
    }

    #[tokio::test]
    async fn test_broadcast_pushes_every_cycle() {
        let session = seeded_session(RecordingDelivery::default()).with_max_cycles(3);
        let (_tx, mut stop) = stop_channel();
        let mut reports = Vec::new();
        let summary = session.run(&mut stop, |r| reports.push(r.clone())).await;

        assert_eq!(summary.cycles, 3);
        assert_eq!(summary.failed_deliveries, 0);
        assert_eq!(summary.delivery.pushes.len(), 3);
        assert_eq!(summary.delivery.notifications.len(), 3);

        for (payload, count) in summary
            .delivery
            .pushes
            .iter()
            .zip(&summary.delivery.notifications)
        {
            let devices: Vec<VisibleDeviceView> = serde_json::from_slice(payload).unwrap();
            assert_eq!(devices.len(), *count);
            assert!(devices.iter().filter(|d| d.is_named()).count() == 2);
        }

        match &reports[0] {
            BroadcastReport::Delivered {
                named, strongest, ..
            } => {
                assert_eq!(*named, 2);
                assert!(strongest.is_some());
            }
            other => panic!("unexpected report {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_broadcast_survives_delivery_failure() {
        let session = seeded_session(RecordingDelivery::failing_on(vec![0])).with_max_cycles(2);
        let (_tx, mut stop) = stop_channel();
        let mut reports = Vec::new();
        let summary = session.run(&mut stop, |r| reports.push(r.clone())).await;

        assert_eq!(summary.cycles, 2);
        assert_eq!(summary.failed_deliveries, 1);
        assert!(matches!(reports[0], BroadcastReport::Failed { cycle: 1, .. }));
        assert!(matches!(reports[1], BroadcastReport::Delivered { cycle: 2, .. }));
        assert_eq!(summary.delivery.pushes.len(), 1);
        assert_eq!(summary.delivery.notifications.len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_stops_on_request() {
        let session = seeded_session(RecordingDelivery::default());
        let (tx, mut stop) = stop_channel();
        tx.send(true).unwrap();
        let summary = session.run(&mut stop, |_| {}).await;
        assert_eq!(summary.cycles, 0);
        assert!(summary.delivery.pushes.is_empty());
    }

    #[tokio::test]
    async fn test_pause_ignores_dropped_sender() {
        let (tx, mut stop) = stop_channel();
        drop(tx);
        assert!(!pause(Duration::from_millis(10), &mut stop).await);
    }
}
