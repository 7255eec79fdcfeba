use crate::command::{run_cmd, run_cmd_bytes};
use crate::drives::DiskInfo;
use crate::structure::read_drive_structure;
use crate::{DeviceOperationError, DriveReadError};
use multiboot_core::{
    DriveStructure, FileSystem, PartitionPlanEntry, PlannedAction, DATA_VOLUME_NAME,
};
use std::path::PathBuf;
use tracing::info;

/// Thin wrapper over `/usr/sbin/diskutil`. Every method blocks until the
/// tool exits; none of them retries.
#[derive(Debug, Clone)]
pub struct Diskutil {
    program: String,
}

impl Default for Diskutil {
    fn default() -> Self {
        Self {
            program: "/usr/sbin/diskutil".to_string(),
        }
    }
}

impl Diskutil {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_structure(&self, disk_id: &str) -> Result<DriveStructure, DriveReadError> {
        read_drive_structure(disk_id)
    }

    /// Erases the whole device and lays out `entries` as GPT partitions.
    pub fn partition_disk(&self, disk_id: &str, entries: &[PartitionPlanEntry]) -> Result<(), DeviceOperationError> {
        info!(disk = disk_id, partitions = entries.len(), "partitioning");
        self.run(&partition_disk_args(disk_id, entries))
    }

    /// Runs the diskutil verb behind one incremental action.
    pub fn execute(&self, disk_id: &str, action: &PlannedAction) -> Result<(), DeviceOperationError> {
        info!(disk = disk_id, action = action.kind(), volume = action.volume_name(), "executing");
        self.run(&action_args(disk_id, action))
    }

    /// Mounts a partition (a no-op if already mounted) and returns its
    /// mount point.
    pub fn mount(&self, partition_id: &str) -> Result<Option<PathBuf>, DeviceOperationError> {
        if let Err(err) = run_cmd(&self.program, &["mount", partition_id]) {
            tracing::debug!(partition = partition_id, error = %err, "mount reported failure");
        }
        let output = run_cmd_bytes(&self.program, &["info", "-plist", partition_id])?;
        Ok(DiskInfo::from_plist(&output)?.mount_point.map(PathBuf::from))
    }

    /// Human-readable `diskutil list` text, used for partition-table backups.
    pub fn list_text(&self, disk_id: &str) -> Result<String, DeviceOperationError> {
        run_cmd(&self.program, &["list", disk_id])
    }

    fn run(&self, args: &[String]) -> Result<(), DeviceOperationError> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_cmd(&self.program, &args).map(|_| ())
    }
}

pub fn partition_disk_args(disk_id: &str, entries: &[PartitionPlanEntry]) -> Vec<String> {
    let mut args = vec![
        "partitionDisk".to_string(),
        format!("/dev/{}", disk_id),
        "GPT".to_string(),
    ];
    for entry in entries {
        args.extend(entry.diskutil_triple());
    }
    args
}

/// Split keeps the data region as the trailing `R` piece, so the slot that
/// held `DATA_STORE` now holds the installer and the data region moves.
pub fn action_args(disk_id: &str, action: &PlannedAction) -> Vec<String> {
    let hfs = FileSystem::JournaledHfsPlus.as_str().to_string();
    match action {
        PlannedAction::SplitDataPartition {
            target_partition_id,
            volume_name,
            size_mb,
            ..
        } => vec![
            "splitPartition".to_string(),
            target_partition_id.clone(),
            "2".to_string(),
            hfs,
            volume_name.clone(),
            format!("{}M", size_mb),
            FileSystem::ExFat.as_str().to_string(),
            DATA_VOLUME_NAME.to_string(),
            "R".to_string(),
        ],
        PlannedAction::AddToFreeSpace {
            volume_name,
            size_mb,
            ..
        } => vec![
            "addPartition".to_string(),
            disk_id.to_string(),
            hfs,
            volume_name.clone(),
            format!("{}M", size_mb),
        ],
        PlannedAction::ReplaceExisting {
            target_partition_id,
            volume_name,
            ..
        } => vec![
            "eraseVolume".to_string(),
            hfs,
            volume_name.clone(),
            target_partition_id.clone(),
        ],
    }
}
