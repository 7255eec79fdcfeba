use crate::catalog;
use crate::version::normalize;
use multiboot_core::InstallerDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Filesystem and journal overhead as a fraction of the payload.
pub const FILESYSTEM_OVERHEAD_FRACTION: f64 = 0.05;
/// EFI/Preboot helper files written next to every payload.
pub const FIXED_BOOT_RESERVE_MB: f64 = 200.0;
pub const MIN_PARTITION_MB: u64 = 5500;

/// Explicit sizing inputs, passed by value instead of patched into the
/// catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Buffer overrides keyed by version key (`"14"`, `"10.15"`).
    pub per_installer_buffer_overrides: BTreeMap<String, f64>,
    /// Buffer for versions the catalog does not know.
    pub global_default_buffer_gb: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            per_installer_buffer_overrides: BTreeMap::new(),
            global_default_buffer_gb: catalog::FALLBACK_BUFFER_GB,
        }
    }
}

impl SizingConfig {
    pub fn effective_buffer_gb(&self, version: &str, buffer_override_gb: Option<f64>) -> f64 {
        if let Some(buffer) = buffer_override_gb {
            return sanitize_gb(buffer);
        }
        let key = normalize(version);
        if let Some(buffer) = self.per_installer_buffer_overrides.get(key.as_str()) {
            return sanitize_gb(*buffer);
        }
        match catalog::entry(&key) {
            Some(entry) => entry.default_buffer_gb,
            None => sanitize_gb(self.global_default_buffer_gb),
        }
    }
}

fn sanitize_gb(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

pub fn required_size_mb(payload_size_kb: u64, version: &str, buffer_override_gb: Option<f64>) -> u64 {
    required_size_mb_with(&SizingConfig::default(), payload_size_kb, version, buffer_override_gb)
}

/// Partition size in whole MB for a payload: payload plus filesystem
/// overhead, boot reserve and safety buffer, rounded up once at the end and
/// never below [`MIN_PARTITION_MB`].
pub fn required_size_mb_with(
    config: &SizingConfig,
    payload_size_kb: u64,
    version: &str,
    buffer_override_gb: Option<f64>,
) -> u64 {
    let payload_mb = payload_size_kb as f64 / 1024.0;
    let buffer_mb = config.effective_buffer_gb(version, buffer_override_gb) * 1024.0;
    let overhead_mb = payload_mb * FILESYSTEM_OVERHEAD_FRACTION;
    let total_mb = payload_mb + overhead_mb + FIXED_BOOT_RESERVE_MB + buffer_mb;
    (total_mb.ceil() as u64).max(MIN_PARTITION_MB)
}

pub fn installer_size_mb(config: &SizingConfig, installer: &InstallerDescriptor) -> u64 {
    required_size_mb_with(
        config,
        installer.payload_size_kb,
        &installer.version,
        installer.buffer_override_gb,
    )
}
