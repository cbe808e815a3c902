//! Persistent storage for the device registry.
//!
//! The registry lives in a single pretty-printed JSON file keyed by address.
//! Every save rewrites the whole file from memory through a temp file and a
//! rename, so readers never observe a half-written registry.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{BleMockError, Result};
use crate::registry::Registry;

/// Default registry file name, relative to the working directory.
pub const DEFAULT_REGISTRY_FILE: &str = "bluetooth_devices.json";

/// File-backed home of a [`Registry`].
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    /// Creates a store for the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the registry file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the registry file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Loads the registry, starting fresh if the file is missing or unreadable.
    ///
    /// A scanner accumulates forever, so a corrupt file is logged and replaced
    /// on the next save instead of stopping the scan.
    #[must_use]
    pub fn load_or_default(&self) -> Registry {
        if !self.exists() {
            debug!(path = %self.path.display(), "No registry file yet, starting empty");
            return Registry::new();
        }
        match self.read() {
            Ok(registry) => registry,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable registry file");
                Registry::new()
            }
        }
    }

    /// Loads a registry that must already exist.
    ///
    /// # Errors
    ///
    /// Returns [`BleMockError::PrerequisiteMissing`] if the file is absent, or
    /// an I/O or serialization error if it cannot be read.
    pub fn load_existing(&self) -> Result<Registry> {
        if !self.exists() {
            return Err(BleMockError::PrerequisiteMissing(format!(
                "registry file {} not found; run ble-scanner first",
                self.path.display()
            )));
        }
        self.read()
    }

    fn read(&self) -> Result<Registry> {
        let content = std::fs::read_to_string(&self.path)?;
        let registry: Registry = serde_json::from_str(&content)?;
        Ok(registry)
    }

    /// Writes the whole registry, replacing the previous file atomically.
    ///
    /// # Errors
    ///
    /// Returns [`BleMockError::Persistence`] if the file cannot be written.
    pub fn save(&self, registry: &Registry) -> Result<()> {
        let content = serde_json::to_string_pretty(registry)?;
        write_atomically(&self.path, content.as_bytes())
    }
}

/// Writes `bytes` next to `path` and renames the result over it.
///
/// # Errors
///
/// Returns [`BleMockError::Persistence`] if any step fails.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let persistence = |e: std::io::Error| BleMockError::Persistence {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(persistence)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    std::fs::write(&tmp_path, bytes).map_err(persistence)?;
    std::fs::rename(&tmp_path, path).map_err(persistence)?;
    Ok(())
}
