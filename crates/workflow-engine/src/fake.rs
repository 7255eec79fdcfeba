use crate::ops::DiskOps;
use anyhow::{anyhow, Result};
use multiboot_core::{
    ActionReceipt, DriveStructure, InstallerDescriptor, PartitionInfo, PartitionPlanEntry,
    PlannedAction, SizeSpec, BYTES_PER_MB,
};
use multiboot_layout::{clean_volume_name, is_data_volume, is_installer_volume};
use multiboot_safety::SafetyDecision;
use multiboot_sizing::resolve_os_name;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const MB: u64 = BYTES_PER_MB;

/// In-memory device that behaves like `diskutil` where it matters: splits
/// give the data region a new slice number and the install tool renames
/// the volume it writes to.
pub struct FakeDisk {
    pub disk_id: String,
    pub total_bytes: u64,
    /// `(id, volume name, size)` in slice order.
    pub slices: Vec<(String, String, u64)>,
    next_slice: u32,
    pub calls: Vec<String>,
    pub fail_installs: BTreeSet<String>,
    pub fail_reads_after: Option<usize>,
    reads: usize,
    pub target_decision: SafetyDecision,
    pub progress: Vec<u8>,
    pub branded: Vec<PathBuf>,
}

impl FakeDisk {
    pub fn blank(disk_id: &str, total_mb: u64) -> Self {
        Self {
            disk_id: disk_id.to_string(),
            total_bytes: total_mb * MB,
            slices: Vec::new(),
            next_slice: 1,
            calls: Vec::new(),
            fail_installs: BTreeSet::new(),
            fail_reads_after: None,
            reads: 0,
            target_decision: SafetyDecision::Allow,
            progress: Vec::new(),
            branded: Vec::new(),
        }
    }

    pub fn with_slices(disk_id: &str, total_mb: u64, slices: &[(&str, u64)]) -> Self {
        let mut disk = Self::blank(disk_id, total_mb);
        for (name, size_mb) in slices {
            disk.push_slice(name, size_mb * MB);
        }
        disk
    }

    fn push_slice(&mut self, name: &str, size_bytes: u64) -> String {
        let id = format!("{}s{}", self.disk_id, self.next_slice);
        self.next_slice += 1;
        self.slices.push((id.clone(), name.to_string(), size_bytes));
        id
    }

    fn used_bytes(&self) -> u64 {
        self.slices.iter().map(|(_, _, size)| size).sum()
    }

    pub fn volume_names(&self) -> Vec<&str> {
        self.slices.iter().map(|(_, name, _)| name.as_str()).collect()
    }

    pub fn slice_id(&self, name: &str) -> Option<&str> {
        self.slices
            .iter()
            .find(|(_, volume, _)| volume == name)
            .map(|(id, _, _)| id.as_str())
    }

    fn snapshot(&self) -> DriveStructure {
        let mut structure = DriveStructure {
            disk_id: self.disk_id.clone(),
            total_size_bytes: self.total_bytes,
            existing_partitions: Vec::new(),
            data_partition: None,
            other_partitions: Vec::new(),
            free_space_bytes: 0,
        };
        for (id, name, size) in &self.slices {
            let mut info = PartitionInfo::new(id.clone(), name.clone(), *size);
            if is_data_volume(name) {
                structure.data_partition = Some(info);
            } else if is_installer_volume(name) {
                info.clean_name = Some(clean_volume_name(name));
                structure.existing_partitions.push(info);
            } else {
                structure.other_partitions.push(info);
            }
        }
        structure.estimate_free_space();
        structure
    }
}

impl DiskOps for FakeDisk {
    fn read_structure(&mut self, disk_id: &str) -> Result<DriveStructure> {
        self.reads += 1;
        if let Some(limit) = self.fail_reads_after {
            if self.reads > limit {
                return Err(anyhow!("diskutil list failed: resource busy"));
            }
        }
        if disk_id != self.disk_id {
            return Err(anyhow!("device {} not found", disk_id));
        }
        Ok(self.snapshot())
    }

    fn check_target(&mut self, _disk_id: &str) -> SafetyDecision {
        self.target_decision.clone()
    }

    fn backup_partition_table(&mut self, disk_id: &str, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("partition_table_{}.txt", disk_id));
        std::fs::write(&path, self.volume_names().join("\n"))?;
        self.calls.push("backup".to_string());
        Ok(path)
    }

    fn apply_partition_plan(&mut self, _disk_id: &str, entries: &[PartitionPlanEntry]) -> Result<()> {
        self.calls.push(format!("partitionDisk {}", entries.len()));
        self.slices.clear();
        self.next_slice = 1;
        self.push_slice("EFI", 200 * MB);
        for entry in entries {
            let size = match entry.size {
                SizeSpec::Megabytes(mb) => mb * MB,
                SizeSpec::Remainder => self.total_bytes.saturating_sub(self.used_bytes()),
            };
            if size > self.total_bytes.saturating_sub(self.used_bytes()) {
                return Err(anyhow!("partitionDisk failed: not enough space for {}", entry.volume_name));
            }
            self.push_slice(&entry.volume_name, size);
        }
        Ok(())
    }

    fn execute_action(&mut self, _disk_id: &str, action: &PlannedAction) -> Result<ActionReceipt> {
        self.calls.push(format!("{} {}", action.kind(), action.volume_name()));
        match action {
            PlannedAction::SplitDataPartition {
                target_partition_id,
                volume_name,
                size_mb,
                ..
            } => {
                let index = self
                    .slices
                    .iter()
                    .position(|(id, name, _)| id == target_partition_id && is_data_volume(name))
                    .ok_or_else(|| anyhow!("splitPartition failed: {} is not the data partition", target_partition_id))?;
                let bytes = size_mb * MB;
                let data_size = self.slices[index].2;
                if bytes >= data_size {
                    return Err(anyhow!("splitPartition failed: {} too small", target_partition_id));
                }
                // The installer takes over the slot, the data region moves.
                let data_id = format!("{}s{}", self.disk_id, self.next_slice);
                self.next_slice += 1;
                let data = (data_id, self.slices[index].1.clone(), data_size - bytes);
                self.slices[index].1 = volume_name.clone();
                self.slices[index].2 = bytes;
                self.slices.insert(index + 1, data);
                Ok(ActionReceipt {
                    partition_id: target_partition_id.clone(),
                    volume_name: volume_name.clone(),
                })
            }
            PlannedAction::AddToFreeSpace {
                volume_name,
                size_mb,
                ..
            } => {
                let bytes = size_mb * MB;
                if bytes > self.total_bytes.saturating_sub(self.used_bytes()) {
                    return Err(anyhow!("addPartition failed: not enough free space"));
                }
                let id = self.push_slice(volume_name, bytes);
                Ok(ActionReceipt {
                    partition_id: id,
                    volume_name: volume_name.clone(),
                })
            }
            PlannedAction::ReplaceExisting {
                target_partition_id,
                volume_name,
                ..
            } => {
                let slice = self
                    .slices
                    .iter_mut()
                    .find(|(id, _, _)| id == target_partition_id)
                    .ok_or_else(|| anyhow!("eraseVolume failed: {} not found", target_partition_id))?;
                slice.1 = volume_name.clone();
                Ok(ActionReceipt {
                    partition_id: target_partition_id.clone(),
                    volume_name: volume_name.clone(),
                })
            }
        }
    }

    fn mount_partition(&mut self, partition_id: &str) -> Result<Option<PathBuf>> {
        Ok(self
            .slices
            .iter()
            .find(|(id, _, _)| id == partition_id)
            .map(|(_, name, _)| PathBuf::from("/Volumes").join(name)))
    }

    fn prepare_branding(&mut self, installer: &InstallerDescriptor) {
        self.calls.push(format!("icon {}", installer.name));
    }

    fn install_payload(
        &mut self,
        installer: &InstallerDescriptor,
        volume: &Path,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<()> {
        self.calls.push(format!("install {}", installer.name));
        if self.fail_installs.contains(&installer.name) {
            return Err(anyhow!("createinstallmedia failed: exit Some(1)"));
        }
        let volume_name = volume
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| anyhow!("bad volume path"))?;
        let os_name = resolve_os_name(&installer.version, Some(&installer.name));
        let slice = self
            .slices
            .iter_mut()
            .find(|(_, name, _)| *name == volume_name)
            .ok_or_else(|| anyhow!("volume {} not mounted", volume_name))?;
        slice.1 = format!("Install macOS {}", os_name);
        for percent in [0, 50, 100] {
            self.progress.push(percent);
            on_progress(percent);
        }
        Ok(())
    }

    fn brand_volume(&mut self, volume: &Path, _installer: &InstallerDescriptor, _os_name: &str) -> Result<()> {
        self.branded.push(volume.to_path_buf());
        Ok(())
    }
}
