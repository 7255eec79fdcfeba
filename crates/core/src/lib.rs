use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;

pub const DATA_VOLUME_NAME: &str = "DATA_STORE";
pub const EFI_VOLUME_NAME: &str = "EFI_SYSTEM";
pub const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallerStatus {
    Unknown,
    Full,
    Stub,
    Partial,
    Downloading,
}

impl InstallerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallerStatus::Unknown => "UNKNOWN",
            InstallerStatus::Full => "FULL",
            InstallerStatus::Stub => "STUB",
            InstallerStatus::Partial => "PARTIAL",
            InstallerStatus::Downloading => "DOWNLOADING",
        }
    }
}

/// One installer bundle as discovered on disk (or built by hand in tests).
///
/// Planning never mutates a descriptor; derived values such as the volume
/// name and required size travel next to it in the planner's own types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallerDescriptor {
    pub name: String,
    pub path: PathBuf,
    pub version: String,
    pub payload_size_kb: u64,
    pub bundle_id: Option<String>,
    pub buffer_override_gb: Option<f64>,
    pub status: InstallerStatus,
    pub stub_reason: Option<String>,
}

impl InstallerDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>, payload_size_kb: u64) -> Self {
        Self {
            name: name.into(),
            path: PathBuf::new(),
            version: version.into(),
            payload_size_kb,
            bundle_id: None,
            buffer_override_gb: None,
            status: InstallerStatus::Unknown,
            stub_reason: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_buffer_override(mut self, buffer_gb: f64) -> Self {
        self.buffer_override_gb = Some(buffer_gb);
        self
    }

    pub fn with_status(mut self, status: InstallerStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_full(&self) -> bool {
        self.status == InstallerStatus::Full
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub id: String,
    pub volume_name: String,
    pub size_bytes: u64,
    /// Volume name with the installer prefixes stripped; only set for
    /// partitions classified as installer partitions.
    pub clean_name: Option<String>,
}

impl PartitionInfo {
    pub fn new(id: impl Into<String>, volume_name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            id: id.into(),
            volume_name: volume_name.into(),
            size_bytes,
            clean_name: None,
        }
    }

    pub fn size_mb(&self) -> u64 {
        self.size_bytes / BYTES_PER_MB
    }
}

/// Snapshot of a device's partition table.
///
/// `free_space_bytes` is `total_size_bytes` minus the sum of every listed
/// partition. It ignores the partition map and alignment gaps, so it is an
/// estimate that must be refreshed by rereading the device after any change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveStructure {
    pub disk_id: String,
    pub total_size_bytes: u64,
    pub existing_partitions: Vec<PartitionInfo>,
    pub data_partition: Option<PartitionInfo>,
    pub other_partitions: Vec<PartitionInfo>,
    pub free_space_bytes: u64,
}

impl DriveStructure {
    pub fn used_bytes(&self) -> u64 {
        self.existing_partitions
            .iter()
            .chain(self.data_partition.iter())
            .chain(self.other_partitions.iter())
            .map(|partition| partition.size_bytes)
            .fold(0u64, |acc, size| acc.saturating_add(size))
    }

    pub fn estimate_free_space(&mut self) {
        self.free_space_bytes = self.total_size_bytes.saturating_sub(self.used_bytes());
    }

    pub fn find_by_volume_name(&self, volume_name: &str) -> Option<&PartitionInfo> {
        self.existing_partitions
            .iter()
            .chain(self.data_partition.iter())
            .chain(self.other_partitions.iter())
            .find(|partition| partition.volume_name == volume_name)
    }

    pub fn find_by_id(&self, id: &str) -> Option<&PartitionInfo> {
        self.existing_partitions
            .iter()
            .chain(self.data_partition.iter())
            .chain(self.other_partitions.iter())
            .find(|partition| partition.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalDrive {
    pub id: String,
    pub media_name: String,
    pub size_bytes: u64,
    pub protocol: String,
    pub removable: bool,
    pub internal: bool,
}

impl ExternalDrive {
    /// Binary gigabytes, the unit the layout planner works in.
    pub fn size_gb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileSystem {
    JournaledHfsPlus,
    ExFat,
}

impl FileSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileSystem::JournaledHfsPlus => "JHFS+",
            FileSystem::ExFat => "ExFAT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeSpec {
    Megabytes(u64),
    Remainder,
}

impl fmt::Display for SizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeSpec::Megabytes(mb) => write!(f, "{}M", mb),
            SizeSpec::Remainder => f.write_str("R"),
        }
    }
}

/// One row of a fresh device layout. Rows become partitions 1..N in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionPlanEntry {
    pub filesystem: FileSystem,
    pub volume_name: String,
    pub size: SizeSpec,
}

impl PartitionPlanEntry {
    pub fn new(filesystem: FileSystem, volume_name: impl Into<String>, size: SizeSpec) -> Self {
        Self {
            filesystem,
            volume_name: volume_name.into(),
            size,
        }
    }

    pub fn diskutil_triple(&self) -> [String; 3] {
        [
            self.filesystem.as_str().to_string(),
            self.volume_name.clone(),
            self.size.to_string(),
        ]
    }
}

/// An incremental change against an already provisioned device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    AddToFreeSpace {
        installer: InstallerDescriptor,
        volume_name: String,
        size_mb: u64,
    },
    SplitDataPartition {
        installer: InstallerDescriptor,
        target_partition_id: String,
        volume_name: String,
        size_mb: u64,
    },
    ReplaceExisting {
        installer: InstallerDescriptor,
        target_partition_id: String,
        previous_volume_name: String,
        volume_name: String,
    },
}

impl PlannedAction {
    pub fn volume_name(&self) -> &str {
        match self {
            PlannedAction::AddToFreeSpace { volume_name, .. }
            | PlannedAction::SplitDataPartition { volume_name, .. }
            | PlannedAction::ReplaceExisting { volume_name, .. } => volume_name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PlannedAction::AddToFreeSpace { .. } => "add_to_free_space",
            PlannedAction::SplitDataPartition { .. } => "split_data_partition",
            PlannedAction::ReplaceExisting { .. } => "replace_existing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub os: String,
    pub os_version: String,
    pub machine: String,
}

/// What the execution layer reports back after applying one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReceipt {
    pub partition_id: String,
    pub volume_name: String,
}

pub fn now_utc_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// `YYYYMMDDTHHMMSSZ`, safe for file names.
pub fn now_utc_compact() -> String {
    compact_stamp(time::OffsetDateTime::now_utc())
}

fn compact_stamp(at: time::OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}
