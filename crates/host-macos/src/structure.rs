use crate::command::run_cmd_bytes;
use crate::DriveReadError;
use multiboot_core::{DriveStructure, PartitionInfo};
use multiboot_layout::{clean_volume_name, is_data_volume, is_installer_volume};
use plist::Value;
use std::io::Cursor;

const DISKUTIL: &str = "/usr/sbin/diskutil";

/// Reads the partition table of `disk_id` through `diskutil list -plist`.
///
/// Either the whole structure comes back or an error does; callers must not
/// plan an update from a failed read.
pub fn read_drive_structure(disk_id: &str) -> Result<DriveStructure, DriveReadError> {
    let output = run_cmd_bytes(DISKUTIL, &["list", "-plist", disk_id]).map_err(|cause| {
        DriveReadError::Command {
            disk_id: disk_id.to_string(),
            cause,
        }
    })?;
    parse_drive_structure(disk_id, &output)
}

/// Classifies the partitions of `disk_id` from `diskutil list -plist`
/// output: `DATA_STORE` is the data region, names following either
/// installer convention become existing installers, the rest are kept as
/// other partitions so free space accounts for them.
pub fn parse_drive_structure(disk_id: &str, plist_bytes: &[u8]) -> Result<DriveStructure, DriveReadError> {
    let parse_error = |reason: String| DriveReadError::Parse {
        disk_id: disk_id.to_string(),
        reason,
    };

    let value = Value::from_reader(Cursor::new(plist_bytes)).map_err(|err| parse_error(err.to_string()))?;
    let disks = value
        .as_dictionary()
        .and_then(|dict| dict.get("AllDisksAndPartitions"))
        .and_then(Value::as_array)
        .ok_or_else(|| parse_error("missing AllDisksAndPartitions".to_string()))?;

    let disk = disks
        .iter()
        .filter_map(Value::as_dictionary)
        .find(|entry| entry.get("DeviceIdentifier").and_then(Value::as_string) == Some(disk_id))
        .ok_or_else(|| DriveReadError::DeviceNotFound(disk_id.to_string()))?;

    let mut structure = DriveStructure {
        disk_id: disk_id.to_string(),
        total_size_bytes: disk.get("Size").and_then(Value::as_unsigned_integer).unwrap_or(0),
        existing_partitions: Vec::new(),
        data_partition: None,
        other_partitions: Vec::new(),
        free_space_bytes: 0,
    };

    let partitions = disk
        .get("Partitions")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    for partition in partitions {
        let Some(entry) = partition.as_dictionary() else {
            continue;
        };
        let id = entry
            .get("DeviceIdentifier")
            .and_then(Value::as_string)
            .ok_or_else(|| parse_error("partition without DeviceIdentifier".to_string()))?;
        let volume_name = entry.get("VolumeName").and_then(Value::as_string).unwrap_or("");
        let size = entry.get("Size").and_then(Value::as_unsigned_integer).unwrap_or(0);
        let mut info = PartitionInfo::new(id, volume_name, size);

        if is_data_volume(volume_name) {
            if structure.data_partition.is_some() {
                tracing::warn!(partition = id, "second DATA_STORE partition, treating as other");
                structure.other_partitions.push(info);
            } else {
                structure.data_partition = Some(info);
            }
        } else if is_installer_volume(volume_name) {
            info.clean_name = Some(clean_volume_name(volume_name));
            structure.existing_partitions.push(info);
        } else {
            structure.other_partitions.push(info);
        }
    }

    structure.estimate_free_space();
    Ok(structure)
}
