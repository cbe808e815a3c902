//! Human-readable status lines and summaries.
//!
//! Everything here returns a `String`; the binaries decide where it goes.

use std::fmt::Write as _;
use std::path::Path;

use blemock_core::{
    BroadcastReport, ExportedDevice, Registry, ScanReport, ScanSummary, UNKNOWN_NAME,
};

/// Longest name shown in a broadcast status line.
const STATUS_NAME_CHARS: usize = 20;

/// Horizontal rule used around banners.
#[must_use]
pub fn rule() -> String {
    "=".repeat(60)
}

/// Title framed by rules.
#[must_use]
pub fn banner(title: &str) -> String {
    format!("{rule}\n{title}\n{rule}", rule = rule())
}

fn rssi_text(rssi: Option<i16>) -> String {
    rssi.map_or_else(|| "n/a".to_string(), |r| r.to_string())
}

fn truncate_chars(s: &str, max: usize) -> &str {
    s.char_indices().nth(max).map_or(s, |(i, _)| &s[..i])
}

/// Status block for one scanner iteration.
#[must_use]
pub fn scan_status(report: &ScanReport) -> String {
    let mut out = String::new();
    match report {
        ScanReport::Merged {
            scan,
            at,
            found,
            new_devices,
            summary,
            total,
            save_error,
        } => {
            let _ = writeln!(out, "[{}] Scan #{scan}", at.format("%H:%M:%S"));
            for device in new_devices {
                let _ = writeln!(
                    out,
                    "  NEW: {} ({}) RSSI: {}",
                    device.name,
                    device.address,
                    rssi_text(device.rssi)
                );
            }
            let _ = writeln!(
                out,
                "  Found {found} devices this scan ({} new, {} updated)",
                summary.new_count(),
                summary.updated
            );
            let _ = write!(out, "  Total unique devices: {total}");
            if let Some(e) = save_error {
                let _ = write!(out, "\n  Warning: registry not saved: {e}");
            }
        }
        ScanReport::Failed { scan, at, error } => {
            let _ = writeln!(out, "[{}] Scan #{scan}", at.format("%H:%M:%S"));
            let _ = write!(out, "  Scan error: {error}");
        }
    }
    out
}

/// Listing of every device, by name.
#[must_use]
pub fn device_listing(registry: &Registry) -> String {
    let mut out = String::new();
    for record in registry.sorted_for_display() {
        let _ = writeln!(out, "   {}", record.name);
        let _ = writeln!(out, "      Address: {}", record.address);
        let _ = writeln!(
            out,
            "      RSSI: {} dBm | Seen {} time(s)",
            rssi_text(record.rssi),
            record.times_seen
        );
    }
    out
}

/// Final scanner summary.
#[must_use]
pub fn scan_summary(summary: &ScanSummary, path: &Path) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", banner("Scanner stopped"));
    let _ = writeln!(out, "Total scans performed: {}", summary.scans);
    let _ = writeln!(out, "Total unique devices found: {}", summary.unique_devices);
    match &summary.save_error {
        None => {
            let _ = writeln!(out, "Results saved to: {}", path.display());
        }
        Some(e) => {
            let _ = writeln!(out, "Results NOT saved to {}: {e}", path.display());
        }
    }
    if !summary.registry.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "All discovered devices:");
        let _ = writeln!(out, "{}", "-".repeat(60));
        out.push_str(&device_listing(&summary.registry));
    }
    out
}

/// One-line status for a broadcaster cycle.
#[must_use]
pub fn broadcast_status(report: &BroadcastReport) -> String {
    match report {
        BroadcastReport::Delivered {
            cycle,
            at,
            visible,
            named,
            strongest,
        } => {
            let best = strongest.as_ref().map_or_else(
                || "none".to_string(),
                |(name, rssi)| format!("{} ({rssi} dBm)", truncate_chars(name, STATUS_NAME_CHARS)),
            );
            format!(
                "[{}] Cycle {cycle}: {visible} devices ({named} named) | Best: {best}",
                at.format("%H:%M:%S")
            )
        }
        BroadcastReport::Failed { cycle, at, error } => {
            format!(
                "[{}] Cycle {cycle}: push failed: {error}",
                at.format("%H:%M:%S")
            )
        }
    }
}

/// Final broadcaster summary.
#[must_use]
pub fn broadcast_summary(cycles: u64, failed_deliveries: u64) -> String {
    format!(
        "{}\nTotal cycles: {cycles} ({failed_deliveries} failed)",
        banner("Broadcast stopped")
    )
}

/// Preview of an export: named devices with a shortened address, then a
/// count of the rest.
#[must_use]
pub fn export_preview(devices: &[ExportedDevice]) -> String {
    let named: Vec<&ExportedDevice> = devices.iter().filter(|d| d.name != UNKNOWN_NAME).collect();
    let mut out = String::new();
    let _ = writeln!(out, "Named devices ({}):", named.len());
    for device in &named {
        let _ = writeln!(
            out,
            "   - {} ({}...)",
            device.name,
            truncate_chars(&device.address, 8)
        );
    }
    let _ = write!(out, "   + {} unknown devices", devices.len() - named.len());
    out
}
