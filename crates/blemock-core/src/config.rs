//! Application configuration management.
//!
//! Settings are layered with the `config` crate:
//!
//! 1. built-in defaults
//! 2. an optional TOML file (`BLEMOCK_CONFIG`, or `config.toml` in the
//!    platform config directory)
//! 3. `BLEMOCK__SECTION__KEY` environment variables
//!
//! Every value the simulator uses is a setting rather than a constant, so a
//! test rig can tighten the RSSI band or change the connectable ratio without
//! rebuilding.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BleMockError, Result};
use crate::storage::DEFAULT_REGISTRY_FILE;
use crate::types::RssiBand;

/// Environment variable pointing at an explicit config file.
pub const CONFIG_PATH_ENV: &str = "BLEMOCK_CONFIG";

/// Prefix of per-key environment overrides.
pub const ENV_PREFIX: &str = "BLEMOCK";

/// All blemock settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Registry file and scan loop timing.
    pub scanner: ScannerSettings,
    /// Visibility simulation tuning.
    pub simulation: SimulationConfig,
    /// Android delivery via adb.
    pub adb: AdbSettings,
    /// Identities offered by the broadcast menu.
    pub advertise: AdvertiseSettings,
}

/// Scanner loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSettings {
    /// Registry file.
    pub registry_path: PathBuf,
    /// Pause between scans, in seconds.
    pub scan_interval_secs: u64,
    /// Upper bound of a single discovery call, in seconds.
    pub discovery_timeout_secs: u64,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            registry_path: PathBuf::from(DEFAULT_REGISTRY_FILE),
            scan_interval_secs: 5,
            discovery_timeout_secs: 4,
        }
    }
}

impl ScannerSettings {
    /// Scan interval as a [`Duration`].
    #[must_use]
    pub const fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// Discovery timeout as a [`Duration`].
    #[must_use]
    pub const fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }
}

/// Tuning of the visibility simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Band every simulated RSSI stays in.
    pub rssi_band: RssiBand,
    /// Largest per-cycle RSSI step, in dBm.
    pub rssi_fluctuation: i16,
    /// Visible devices to aim for when enough unknown devices exist.
    pub min_visible: usize,
    /// Most unknown devices shown in one cycle.
    pub max_unknown_sample: usize,
    /// Probability that a visible device is flagged connectable.
    pub connectable_probability: f64,
    /// Pause between cycles, in milliseconds.
    pub update_interval_ms: u64,
    /// Fixed RNG seed. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            rssi_band: RssiBand::default(),
            rssi_fluctuation: 5,
            min_visible: 10,
            max_unknown_sample: 15,
            connectable_probability: 0.7,
            update_interval_ms: 2000,
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Update interval as a [`Duration`].
    #[must_use]
    pub const fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    /// Checks the ranges the simulator draws from.
    ///
    /// # Errors
    ///
    /// Returns [`BleMockError::ConfigValidation`] listing each problem.
    pub fn validate(&self) -> Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(BleMockError::ConfigValidation(problems.join("; ")))
        }
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.rssi_band.is_valid() {
            problems.push(format!(
                "simulation.rssi_band: min {} is above max {}",
                self.rssi_band.min, self.rssi_band.max
            ));
        }
        if self.rssi_fluctuation < 0 {
            problems.push("simulation.rssi_fluctuation: must not be negative".to_string());
        }
        if !(0.0..=1.0).contains(&self.connectable_probability) {
            problems.push(format!(
                "simulation.connectable_probability: {} is outside 0..=1",
                self.connectable_probability
            ));
        }
        problems
    }
}

/// Android delivery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdbSettings {
    /// Explicit adb binary. Located automatically when unset.
    pub adb_path: Option<PathBuf>,
    /// Device path the live scan list is pushed to.
    pub live_remote_path: String,
    /// Local staging file for the live scan list.
    pub live_staging_path: PathBuf,
    /// Device path the full registry export is pushed to.
    pub export_remote_path: String,
    /// Local file written when no device is attached.
    pub export_fallback_path: PathBuf,
    /// Intent action announcing fresh scan results.
    pub intent_action: String,
}

impl Default for AdbSettings {
    fn default() -> Self {
        Self {
            adb_path: None,
            live_remote_path: "/data/local/tmp/mock_bluetooth_devices.json".to_string(),
            live_staging_path: std::env::temp_dir().join("mock_ble_live.json"),
            export_remote_path: "/sdcard/Download/mock_bluetooth_devices.json".to_string(),
            export_fallback_path: PathBuf::from("mock_bluetooth_devices.json"),
            intent_action: "com.mock.ble.SCAN_RESULT".to_string(),
        }
    }
}

/// Broadcast menu settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertiseSettings {
    /// Names offered in the menu, in display order.
    pub identities: Vec<String>,
    /// HCI controller used by the shell adapters.
    pub hci_device: String,
    /// Seconds between "still broadcasting" notices.
    pub heartbeat_secs: u64,
}

impl Default for AdvertiseSettings {
    fn default() -> Self {
        Self {
            identities: vec![
                "Bose Color II SoundLink".to_string(),
                "Teja's Keys".to_string(),
                "Teja's Xbox".to_string(),
                "Tejkdno1".to_string(),
            ],
            hci_device: "hci0".to_string(),
            heartbeat_secs: 10,
        }
    }
}

impl Settings {
    /// Loads settings from the default locations.
    ///
    /// # Errors
    ///
    /// Returns [`BleMockError::ConfigLoad`] if a source is malformed, or
    /// [`BleMockError::ConfigValidation`] if the merged values are invalid.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .or_else(default_config_path);
        Self::load_from(path.as_deref())
    }

    /// Loads settings from an optional file plus the environment.
    ///
    /// # Errors
    ///
    /// See [`Settings::load`].
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "Reading configuration file");
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Writes the settings as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        crate::storage::write_atomically(path, content.as_bytes())
    }

    /// Checks every setting and reports all violations at once.
    ///
    /// # Errors
    ///
    /// Returns [`BleMockError::ConfigValidation`] listing each problem.
    pub fn validate(&self) -> Result<()> {
        let mut problems = self.simulation.problems();

        if self.scanner.discovery_timeout_secs == 0 {
            problems.push("scanner.discovery_timeout_secs: must be positive".to_string());
        }
        if self.advertise.heartbeat_secs == 0 {
            problems.push("advertise.heartbeat_secs: must be positive".to_string());
        }
        if self.advertise.identities.iter().any(|n| n.trim().is_empty()) {
            problems.push("advertise.identities: names must not be blank".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(BleMockError::ConfigValidation(problems.join("; ")))
        }
    }
}

/// `config.toml` in the platform config directory, if one can be determined.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "blemock")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.simulation.rssi_band, RssiBand::new(-50, -25));
        assert_eq!(settings.simulation.min_visible, 10);
        assert_eq!(settings.simulation.max_unknown_sample, 15);
        assert_eq!(settings.advertise.identities.len(), 4);
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let mut settings = Settings::default();
        settings.simulation.rssi_band = RssiBand::new(-20, -60);
        settings.simulation.connectable_probability = 1.5;

        let err = settings.validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("rssi_band"));
        assert!(message.contains("connectable_probability"));
    }

    #[test]
    fn test_simulation_config_rejects_unusable_ranges() {
        SimulationConfig::default().validate().unwrap();

        let inverted = SimulationConfig {
            rssi_band: RssiBand::new(-20, -60),
            ..SimulationConfig::default()
        };
        assert!(inverted.validate().unwrap_err().is_config_error());

        let negative = SimulationConfig {
            rssi_fluctuation: -1,
            ..SimulationConfig::default()
        };
        assert!(negative
            .validate()
            .unwrap_err()
            .to_string()
            .contains("rssi_fluctuation"));

        let probability = SimulationConfig {
            connectable_probability: -0.1,
            ..SimulationConfig::default()
        };
        assert!(probability.validate().is_err());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[simulation]
min_visible = 4
connectable_probability = 0.5

[simulation.rssi_band]
min = -70
max = -40
"#,
        )
        .unwrap();

        let settings = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(settings.simulation.min_visible, 4);
        assert_eq!(settings.simulation.rssi_band, RssiBand::new(-70, -40));
        assert_eq!(settings.simulation.max_unknown_sample, 15);
        assert_eq!(settings.scanner.scan_interval_secs, 5);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_from(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(settings.scanner, ScannerSettings::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut settings = Settings::default();
        settings.simulation.seed = Some(7);
        settings.advertise.identities = vec!["Desk Speaker".to_string()];

        settings.save(&path).unwrap();
        let loaded = Settings::load_from(Some(&path)).unwrap();

        assert_eq!(loaded.simulation.seed, Some(7));
        assert_eq!(loaded.advertise.identities, vec!["Desk Speaker".to_string()]);
    }

    #[test]
    fn test_durations() {
        let settings = Settings::default();
        assert_eq!(settings.scanner.scan_interval(), Duration::from_secs(5));
        assert_eq!(settings.simulation.update_interval(), Duration::from_secs(2));
    }
}
