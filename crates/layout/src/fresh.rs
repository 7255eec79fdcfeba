use crate::naming::installer_volume_name;
use crate::PlanError;
use multiboot_core::{
    FileSystem, InstallerDescriptor, PartitionPlanEntry, SizeSpec, DATA_VOLUME_NAME,
    EFI_VOLUME_NAME,
};
use multiboot_sizing::{installer_size_mb, SizingConfig};
use serde::Serialize;
use tracing::debug;

pub const EFI_RESERVE_MB: u64 = 1024;
/// A trailing data partition is only worth creating above this size.
pub const DATA_REMAINDER_THRESHOLD_MB: u64 = 2048;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedInstaller {
    pub installer: InstallerDescriptor,
    pub volume_name: String,
    pub required_mb: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FreshLayout {
    pub entries: Vec<PartitionPlanEntry>,
    pub installers: Vec<PlannedInstaller>,
    pub capacity_mb: u64,
    pub consumed_mb: u64,
    pub remainder_mb: u64,
}

impl FreshLayout {
    pub fn has_data_partition(&self) -> bool {
        self.entries
            .last()
            .map(|entry| entry.size == SizeSpec::Remainder)
            .unwrap_or(false)
    }
}

fn capacity_mb(total_device_gb: f64) -> u64 {
    if total_device_gb.is_finite() && total_device_gb > 0.0 {
        (total_device_gb * 1024.0).floor() as u64
    } else {
        0
    }
}

/// Whole-device layout: EFI helper, one partition per installer in the
/// order given, then a data partition for whatever is left over.
///
/// Installers are neither reordered nor deduplicated. A layout that does not
/// fit the device is rejected here rather than left to fail halfway through
/// partitioning.
pub fn plan_fresh_layout(
    installers: &[InstallerDescriptor],
    total_device_gb: f64,
    config: &SizingConfig,
) -> Result<FreshLayout, PlanError> {
    if installers.is_empty() {
        return Err(PlanError::NoInstallers);
    }

    let capacity_mb = capacity_mb(total_device_gb);
    let mut entries = vec![PartitionPlanEntry::new(
        FileSystem::JournaledHfsPlus,
        EFI_VOLUME_NAME,
        SizeSpec::Megabytes(EFI_RESERVE_MB),
    )];
    let mut planned = Vec::with_capacity(installers.len());
    let mut consumed_mb = EFI_RESERVE_MB;

    for installer in installers {
        let required_mb = installer_size_mb(config, installer);
        let volume_name = installer_volume_name(installer);
        let available_mb = capacity_mb.saturating_sub(consumed_mb);
        if required_mb > available_mb {
            return Err(PlanError::InsufficientSpace {
                installer: installer.name.clone(),
                required_mb,
                available_mb,
            });
        }
        consumed_mb += required_mb;
        debug!(installer = %installer.name, volume = %volume_name, required_mb, "planned installer partition");
        entries.push(PartitionPlanEntry::new(
            FileSystem::JournaledHfsPlus,
            volume_name.clone(),
            SizeSpec::Megabytes(required_mb),
        ));
        planned.push(PlannedInstaller {
            installer: installer.clone(),
            volume_name,
            required_mb,
        });
    }

    let remainder_mb = capacity_mb - consumed_mb;
    if remainder_mb > DATA_REMAINDER_THRESHOLD_MB {
        entries.push(PartitionPlanEntry::new(
            FileSystem::ExFat,
            DATA_VOLUME_NAME,
            SizeSpec::Remainder,
        ));
    } else {
        debug!(remainder_mb, "no data partition, remainder below threshold");
    }

    Ok(FreshLayout {
        entries,
        installers: planned,
        capacity_mb,
        consumed_mb,
        remainder_mb,
    })
}
