use crate::ops::DiskOps;
use anyhow::{anyhow, Result};
use multiboot_core::{ActionReceipt, DriveStructure, InstallerDescriptor, PartitionPlanEntry, PlannedAction};
use multiboot_host_macos::{
    backup_partition_table, boot_disk_id, brand_volume, run_createinstallmedia, system_mounts_on,
    DependencyReport, Diskutil, IconCache,
};
use multiboot_safety::{validate_safe_target, SafetyDecision};
use std::path::{Path, PathBuf};
use tracing::warn;

/// [`DiskOps`] backed by `diskutil`, `createinstallmedia` and the branding
/// tools.
pub struct MacDisk {
    diskutil: Diskutil,
    icons: Option<IconCache>,
    branding: bool,
}

impl MacDisk {
    pub fn new(dependencies: &DependencyReport) -> Self {
        let icons = match IconCache::new() {
            Ok(cache) => Some(cache),
            Err(err) => {
                warn!(error = %err, "icon cache unavailable, volumes will not get icons");
                None
            }
        };
        Self {
            diskutil: Diskutil::new(),
            icons,
            branding: dependencies.bless,
        }
    }
}

impl DiskOps for MacDisk {
    fn read_structure(&mut self, disk_id: &str) -> Result<DriveStructure> {
        Ok(self.diskutil.read_structure(disk_id)?)
    }

    fn check_target(&mut self, disk_id: &str) -> SafetyDecision {
        let boot_disk = boot_disk_id();
        let system_mounts = match system_mounts_on(disk_id) {
            Ok(mounts) => mounts,
            Err(err) => {
                return SafetyDecision::Deny(format!("cannot inspect mounts on {}: {}", disk_id, err));
            }
        };
        validate_safe_target(disk_id, boot_disk.as_deref(), &system_mounts)
    }

    fn backup_partition_table(&mut self, disk_id: &str, dir: &Path) -> Result<PathBuf> {
        backup_partition_table(&self.diskutil, disk_id, dir)
    }

    fn apply_partition_plan(&mut self, disk_id: &str, entries: &[PartitionPlanEntry]) -> Result<()> {
        Ok(self.diskutil.partition_disk(disk_id, entries)?)
    }

    fn execute_action(&mut self, disk_id: &str, action: &PlannedAction) -> Result<ActionReceipt> {
        self.diskutil.execute(disk_id, action)?;
        let structure = self.diskutil.read_structure(disk_id)?;
        let partition = structure
            .find_by_volume_name(action.volume_name())
            .ok_or_else(|| anyhow!("{} not found on {} after {}", action.volume_name(), disk_id, action.kind()))?;
        Ok(ActionReceipt {
            partition_id: partition.id.clone(),
            volume_name: partition.volume_name.clone(),
        })
    }

    fn mount_partition(&mut self, partition_id: &str) -> Result<Option<PathBuf>> {
        Ok(self.diskutil.mount(partition_id)?)
    }

    fn prepare_branding(&mut self, installer: &InstallerDescriptor) {
        if let Some(icons) = self.icons.as_mut() {
            icons.extract(&installer.path, &installer.name);
        }
    }

    fn install_payload(
        &mut self,
        installer: &InstallerDescriptor,
        volume: &Path,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<()> {
        Ok(run_createinstallmedia(&installer.path, volume, on_progress)?)
    }

    fn brand_volume(&mut self, volume: &Path, installer: &InstallerDescriptor, os_name: &str) -> Result<()> {
        if !self.branding {
            return Err(anyhow!("bless not installed"));
        }
        let icons = self
            .icons
            .as_ref()
            .ok_or_else(|| anyhow!("icon cache unavailable"))?;
        let outcome = brand_volume(icons, volume, &installer.name, os_name, &installer.version);
        if outcome.icon || outcome.blessed {
            Ok(())
        } else {
            Err(anyhow!("neither icon nor boot label applied"))
        }
    }
}
