use crate::command::run_cmd_bytes;
use crate::DeviceOperationError;
use multiboot_core::ExternalDrive;
use plist::{Dictionary, Value};
use std::io::Cursor;
use tracing::{debug, warn};

const DISKUTIL: &str = "/usr/sbin/diskutil";
const NEVER_TARGETS: [&str; 2] = ["disk0", "disk1"];
const EXTERNAL_PROTOCOLS: [&str; 5] = ["usb", "thunderbolt", "firewire", "sd", "mmc"];

/// The subset of `diskutil info -plist` this tool looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskInfo {
    pub device_identifier: String,
    pub media_name: String,
    pub total_size: u64,
    pub bus_protocol: String,
    pub removable: bool,
    pub internal: bool,
    pub is_virtual: bool,
    pub mount_point: Option<String>,
    pub parent_whole_disk: Option<String>,
}

impl DiskInfo {
    pub fn from_plist(bytes: &[u8]) -> Result<Self, DeviceOperationError> {
        let value = Value::from_reader(Cursor::new(bytes))
            .map_err(|err| DeviceOperationError::new("parse diskutil info", err.to_string()))?;
        let dict = value
            .as_dictionary()
            .ok_or_else(|| DeviceOperationError::new("parse diskutil info", "top level is not a dictionary"))?;
        Ok(Self::from_dictionary(dict))
    }

    fn from_dictionary(dict: &Dictionary) -> Self {
        let string = |key: &str| dict.get(key).and_then(Value::as_string).map(str::to_string);
        let boolean = |key: &str| dict.get(key).and_then(Value::as_boolean);
        Self {
            device_identifier: string("DeviceIdentifier").unwrap_or_default(),
            media_name: string("MediaName").unwrap_or_else(|| "Unknown".to_string()),
            total_size: dict
                .get("TotalSize")
                .or_else(|| dict.get("Size"))
                .and_then(Value::as_unsigned_integer)
                .unwrap_or(0),
            bus_protocol: string("BusProtocol").unwrap_or_else(|| "Unknown".to_string()),
            removable: boolean("Removable")
                .or_else(|| boolean("RemovableMedia"))
                .unwrap_or(false),
            internal: boolean("Internal").unwrap_or(true),
            is_virtual: boolean("Virtual").unwrap_or(false)
                || string("VirtualOrPhysical").map(|v| v == "Virtual").unwrap_or(false),
            mount_point: string("MountPoint").filter(|mount| !mount.is_empty()),
            parent_whole_disk: string("ParentWholeDisk"),
        }
    }

    /// Decides whether a disk that `diskutil list external` already returned
    /// is a sensible target. A known external bus protocol wins over the
    /// `Internal` flag, since some USB bridges report themselves as internal.
    pub fn is_usable_external(&self) -> bool {
        let protocol = self.bus_protocol.to_ascii_lowercase();
        if EXTERNAL_PROTOCOLS.iter().any(|known| protocol.contains(known)) {
            return true;
        }
        if self.removable {
            return true;
        }
        !self.is_virtual
    }

    pub fn to_external_drive(&self) -> ExternalDrive {
        ExternalDrive {
            id: self.device_identifier.clone(),
            media_name: self.media_name.clone(),
            size_bytes: self.total_size,
            protocol: self.bus_protocol.clone(),
            removable: self.removable,
            internal: self.internal,
        }
    }
}

pub fn disk_info(target: &str) -> Result<DiskInfo, DeviceOperationError> {
    let output = run_cmd_bytes(DISKUTIL, &["info", "-plist", target])?;
    DiskInfo::from_plist(&output)
}

/// Whole disk holding `/`, or `None` when it cannot be determined.
pub fn boot_disk_id() -> Option<String> {
    match disk_info("/") {
        Ok(info) => info.parent_whole_disk,
        Err(err) => {
            warn!(error = %err, "could not determine boot disk");
            None
        }
    }
}

/// `disk0`, `disk1` and the boot disk are never offered as targets. An
/// unknown boot disk leaves only the fixed exclusions in place.
pub fn is_unsafe_disk(disk_id: &str, boot_disk: Option<&str>) -> bool {
    NEVER_TARGETS.contains(&disk_id) || boot_disk == Some(disk_id)
}

/// Whole-disk identifiers from `diskutil list ... -plist` output.
pub fn parse_whole_disks(bytes: &[u8]) -> Result<Vec<String>, DeviceOperationError> {
    let value = Value::from_reader(Cursor::new(bytes))
        .map_err(|err| DeviceOperationError::new("parse diskutil list", err.to_string()))?;
    let disks = value
        .as_dictionary()
        .and_then(|dict| dict.get("AllDisksAndPartitions"))
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_dictionary)
                .filter_map(|entry| entry.get("DeviceIdentifier").and_then(Value::as_string))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Ok(disks)
}

/// External physical disks that are safe to offer as targets.
pub fn list_external_drives() -> Result<Vec<ExternalDrive>, DeviceOperationError> {
    let listing = run_cmd_bytes(DISKUTIL, &["list", "external", "physical", "-plist"])?;
    let boot_disk = boot_disk_id();
    let mut drives = Vec::new();
    for disk_id in parse_whole_disks(&listing)? {
        if is_unsafe_disk(&disk_id, boot_disk.as_deref()) {
            debug!(disk = %disk_id, "skipping protected disk");
            continue;
        }
        let info = match disk_info(&disk_id) {
            Ok(info) => info,
            Err(err) => {
                warn!(disk = %disk_id, error = %err, "skipping disk without info");
                continue;
            }
        };
        if !info.is_usable_external() {
            debug!(disk = %disk_id, protocol = %info.bus_protocol, "skipping virtual disk");
            continue;
        }
        drives.push(info.to_external_drive());
    }
    Ok(drives)
}
