//! Shared types used across modules.

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Sentinel name for devices that never advertised a name.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Returns `true` if `name` carries a real label.
#[must_use]
pub fn is_meaningful_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty() && trimmed != UNKNOWN_NAME
}

/// Current local time as an ISO-8601 string with microseconds.
#[must_use]
pub fn timestamp_now() -> String {
    format_timestamp(Local::now().naive_local())
}

/// Formats a timestamp the way registry files store it.
#[must_use]
pub fn format_timestamp(at: NaiveDateTime) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Inclusive signal strength band in dBm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RssiBand {
    /// Weakest allowed value.
    pub min: i16,
    /// Strongest allowed value.
    pub max: i16,
}

impl RssiBand {
    /// Creates a band. Callers validate with [`RssiBand::is_valid`].
    #[must_use]
    pub const fn new(min: i16, max: i16) -> Self {
        Self { min, max }
    }

    /// Whether the band is non-empty.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.min <= self.max
    }

    /// Clamps `rssi` into the band.
    #[must_use]
    pub fn clamp(&self, rssi: i16) -> i16 {
        rssi.clamp(self.min, self.max)
    }

    /// Whether `rssi` lies inside the band.
    #[must_use]
    pub const fn contains(&self, rssi: i16) -> bool {
        rssi >= self.min && rssi <= self.max
    }
}

impl Default for RssiBand {
    /// Strong signal, close proximity.
    fn default() -> Self {
        Self::new(-50, -25)
    }
}
