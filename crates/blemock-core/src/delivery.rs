//! Delivery of serialized scan results to an Android target.
//!
//! The consumer side is an app on an emulator or phone that polls a JSON file
//! and optionally listens for a broadcast intent. [`AdbDelivery`] drives that
//! through the `adb` tool.

use std::path::{Path, PathBuf};
use std::process::Output;

use tokio::process::Command;
use tracing::{debug, info};

use crate::config::AdbSettings;
use crate::error::{BleMockError, Result};
use crate::storage::write_atomically;

/// Target that accepts serialized scan results.
#[allow(async_fn_in_trait)]
pub trait ScanDelivery {
    /// Pushes a full payload to the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`BleMockError::DeliveryFailed`] on transport errors.
    async fn push(&mut self, payload: &[u8]) -> Result<()>;

    /// Tells the consumer how many devices the last payload contained.
    ///
    /// # Errors
    ///
    /// Returns [`BleMockError::DeliveryFailed`] on transport errors. Callers
    /// treat this as optional and only log it.
    async fn notify_device_count(&mut self, count: usize) -> Result<()>;
}

/// Finds a usable adb binary.
///
/// Looks at the configured path, then `$ANDROID_HOME/platform-tools`, then the
/// default macOS SDK location, then falls back to `adb` on `PATH`.
#[must_use]
pub fn locate_adb(configured: Option<&Path>) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }

    let mut candidates = Vec::new();
    if let Some(sdk) =
        std::env::var_os("ANDROID_HOME").or_else(|| std::env::var_os("ANDROID_SDK_ROOT"))
    {
        candidates.push(PathBuf::from(sdk).join("platform-tools").join("adb"));
    }
    if let Some(dirs) = directories::BaseDirs::new() {
        candidates.push(dirs.home_dir().join("Library/Android/sdk/platform-tools/adb"));
    }

    candidates
        .into_iter()
        .find(|p| p.is_file())
        .unwrap_or_else(|| PathBuf::from("adb"))
}

/// Extracts the serials of attached, authorized devices from `adb devices`.
#[must_use]
pub fn parse_adb_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// Delivery through `adb push` and `adb shell am broadcast`.
#[derive(Debug, Clone)]
pub struct AdbDelivery {
    adb: PathBuf,
    staging_path: PathBuf,
    remote_path: String,
    intent_action: String,
}

impl AdbDelivery {
    /// Creates a delivery for the live scan file.
    #[must_use]
    pub fn live(settings: &AdbSettings) -> Self {
        Self {
            adb: locate_adb(settings.adb_path.as_deref()),
            staging_path: settings.live_staging_path.clone(),
            remote_path: settings.live_remote_path.clone(),
            intent_action: settings.intent_action.clone(),
        }
    }

    /// Creates a delivery for the one-shot registry export.
    #[must_use]
    pub fn export(settings: &AdbSettings) -> Self {
        let staging_path = std::env::temp_dir().join("mock_bluetooth_devices.json");
        Self {
            adb: locate_adb(settings.adb_path.as_deref()),
            staging_path,
            remote_path: settings.export_remote_path.clone(),
            intent_action: settings.intent_action.clone(),
        }
    }

    /// adb binary in use.
    #[must_use]
    pub fn adb_path(&self) -> &Path {
        &self.adb
    }

    /// Device path payloads are pushed to.
    #[must_use]
    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    /// Lists attached devices.
    ///
    /// # Errors
    ///
    /// Returns [`BleMockError::PrerequisiteMissing`] if adb cannot be run or
    /// no device is attached.
    pub async fn connected_devices(&self) -> Result<Vec<String>> {
        let output = Command::new(&self.adb)
            .arg("devices")
            .output()
            .await
            .map_err(|e| {
                BleMockError::PrerequisiteMissing(format!(
                    "adb not runnable at {}: {e}",
                    self.adb.display()
                ))
            })?;
        if !output.status.success() {
            return Err(BleMockError::PrerequisiteMissing(format!(
                "adb devices failed: {}",
                stderr_of(&output)
            )));
        }

        let serials = parse_adb_devices(&String::from_utf8_lossy(&output.stdout));
        if serials.is_empty() {
            return Err(BleMockError::PrerequisiteMissing(
                "no emulator or device attached".to_string(),
            ));
        }
        info!(devices = ?serials, "adb target available");
        Ok(serials)
    }

    async fn run(&self, args: &[&str]) -> Result<()> {
        debug!(adb = %self.adb.display(), ?args, "Running adb");
        let output = Command::new(&self.adb)
            .args(args)
            .output()
            .await
            .map_err(|e| BleMockError::DeliveryFailed(format!("adb: {e}")))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(BleMockError::DeliveryFailed(format!(
                "adb {} exited with {}: {}",
                args.first().unwrap_or(&""),
                output.status,
                stderr_of(&output)
            )))
        }
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

impl ScanDelivery for AdbDelivery {
    async fn push(&mut self, payload: &[u8]) -> Result<()> {
        write_atomically(&self.staging_path, payload)
            .map_err(|e| BleMockError::DeliveryFailed(e.to_string()))?;
        let staging = self.staging_path.to_string_lossy().into_owned();
        self.run(&["push", staging.as_str(), self.remote_path.as_str()])
            .await
    }

    async fn notify_device_count(&mut self, count: usize) -> Result<()> {
        let count = count.to_string();
        self.run(&[
            "shell",
            "am",
            "broadcast",
            "-a",
            self.intent_action.as_str(),
            "--ei",
            "device_count",
            count.as_str(),
        ])
        .await
    }
}

/// Keeps every payload in memory. Useful for tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingDelivery {
    /// Payloads pushed so far.
    pub pushes: Vec<Vec<u8>>,
    /// Device counts announced so far.
    pub notifications: Vec<usize>,
    /// Zero-based push indices that fail instead of being recorded.
    pub fail_on: Vec<usize>,
    attempts: usize,
}

impl RecordingDelivery {
    /// Creates a recorder whose listed push attempts fail.
    #[must_use]
    pub fn failing_on(attempts: Vec<usize>) -> Self {
        Self {
            fail_on: attempts,
            ..Self::default()
        }
    }
}

impl ScanDelivery for RecordingDelivery {
    async fn push(&mut self, payload: &[u8]) -> Result<()> {
        let attempt = self.attempts;
        self.attempts += 1;
        if self.fail_on.contains(&attempt) {
            return Err(BleMockError::DeliveryFailed(format!(
                "scripted failure on push {attempt}"
            )));
        }
        self.pushes.push(payload.to_vec());
        Ok(())
    }

    async fn notify_device_count(&mut self, count: usize) -> Result<()> {
        self.notifications.push(count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_adb_devices() {
        let output = "* daemon started successfully\n\
                      List of devices attached\n\
                      emulator-5554\tdevice\n\
                      R58M123ABC\tunauthorized\n\
                      192.168.1.20:5555\tdevice\n\n";
        assert_eq!(
            parse_adb_devices(output),
            vec!["emulator-5554".to_string(), "192.168.1.20:5555".to_string()]
        );
    }

    #[test]
    fn test_parse_adb_devices_empty() {
        assert!(parse_adb_devices("List of devices attached\n\n").is_empty());
        assert!(parse_adb_devices("").is_empty());
    }

    #[test]
    fn test_configured_adb_wins() {
        let path = Path::new("/opt/android/adb");
        assert_eq!(locate_adb(Some(path)), PathBuf::from("/opt/android/adb"));
    }

    #[tokio::test]
    async fn test_missing_adb_is_a_prerequisite_error() {
        let dir = TempDir::new().unwrap();
        let settings = AdbSettings {
            adb_path: Some(dir.path().join("no-such-adb")),
            ..AdbSettings::default()
        };
        let delivery = AdbDelivery::live(&settings);
        let err = delivery.connected_devices().await.unwrap_err();
        assert!(matches!(err, BleMockError::PrerequisiteMissing(_)));
    }

    #[tokio::test]
    async fn test_push_with_missing_adb_is_a_delivery_error() {
        let dir = TempDir::new().unwrap();
        let settings = AdbSettings {
            adb_path: Some(dir.path().join("no-such-adb")),
            live_staging_path: dir.path().join("live.json"),
            ..AdbSettings::default()
        };
        let mut delivery = AdbDelivery::live(&settings);

        let err = delivery.push(b"[]").await.unwrap_err();
        assert!(matches!(err, BleMockError::DeliveryFailed(_)));
        assert_eq!(std::fs::read(dir.path().join("live.json")).unwrap(), b"[]");
    }

    #[tokio::test]
    async fn test_recording_delivery_scripted_failures() {
        let mut delivery = RecordingDelivery::failing_on(vec![1]);
        delivery.push(b"a").await.unwrap();
        assert!(delivery.push(b"b").await.is_err());
        delivery.push(b"c").await.unwrap();
        assert_eq!(delivery.pushes, vec![b"a".to_vec(), b"c".to_vec()]);
    }
}
