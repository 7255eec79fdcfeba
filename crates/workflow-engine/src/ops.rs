use anyhow::Result;
use multiboot_core::{ActionReceipt, DriveStructure, InstallerDescriptor, PartitionPlanEntry, PlannedAction};
use multiboot_safety::SafetyDecision;
use std::path::{Path, PathBuf};

/// Everything the workflows need from the device side.
///
/// Calls block until the underlying operation finishes. Implementations
/// must not cache partition identifiers across calls: after
/// [`DiskOps::apply_partition_plan`] or [`DiskOps::execute_action`] the
/// workflows reread the structure and locate partitions by volume name.
pub trait DiskOps {
    fn read_structure(&mut self, disk_id: &str) -> Result<DriveStructure>;

    /// Host-level target checks (boot disk, system mounts).
    fn check_target(&mut self, disk_id: &str) -> SafetyDecision;

    /// Saves the current partition table under `dir`.
    fn backup_partition_table(&mut self, disk_id: &str, dir: &Path) -> Result<PathBuf>;

    /// Erases the device and applies a fresh layout.
    fn apply_partition_plan(&mut self, disk_id: &str, entries: &[PartitionPlanEntry]) -> Result<()>;

    fn execute_action(&mut self, disk_id: &str, action: &PlannedAction) -> Result<ActionReceipt>;

    fn mount_partition(&mut self, partition_id: &str) -> Result<Option<PathBuf>>;

    /// Called before [`DiskOps::install_payload`], while the installer
    /// bundle is still intact.
    fn prepare_branding(&mut self, installer: &InstallerDescriptor);

    fn install_payload(
        &mut self,
        installer: &InstallerDescriptor,
        volume: &Path,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<()>;

    fn brand_volume(&mut self, volume: &Path, installer: &InstallerDescriptor, os_name: &str) -> Result<()>;
}
