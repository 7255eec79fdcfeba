//! Everything that talks to `diskutil` and friends.
//!
//! Parsers take raw tool output so they can be tested with fixtures; the
//! functions that actually spawn processes only work on macOS.

pub mod backup;
pub mod branding;
pub mod command;
pub mod diskutil;
pub mod drives;
pub mod host;
pub mod installer;
pub mod mist;
pub mod mounts;
pub mod privilege;
pub mod structure;

use thiserror::Error;

pub use backup::{backup_file_name, backup_partition_table};
pub use branding::{bless_volume, boot_label, brand_volume, BrandingOutcome, IconCache};
pub use command::{run_cmd, tool_available};
pub use diskutil::{action_args, partition_disk_args, Diskutil};
pub use drives::{boot_disk_id, disk_info, is_unsafe_disk, list_external_drives, parse_whole_disks, DiskInfo};
pub use host::{host_info, HostInfo};
pub use installer::{run_createinstallmedia, ProgressParser};
pub use mist::{
    download_installer, installer_size_bytes, list_installers, mist_available, MistInstaller,
    DEFAULT_DOWNLOAD_DIR,
};
pub use mounts::{is_system_mount_point, read_mounts, system_mounts_on, whole_disk_id, MountEntry};
pub use privilege::{check_dependencies, is_root, require_root, DependencyReport};
pub use structure::{parse_drive_structure, read_drive_structure};

/// A disk tool exited unsuccessfully or could not be spawned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {diagnostic}")]
pub struct DeviceOperationError {
    pub operation: String,
    pub diagnostic: String,
}

impl DeviceOperationError {
    pub fn new(operation: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            diagnostic: diagnostic.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DriveReadError {
    #[error("could not list {disk_id}")]
    Command {
        disk_id: String,
        #[source]
        cause: DeviceOperationError,
    },
    #[error("could not parse partition listing for {disk_id}: {reason}")]
    Parse { disk_id: String, reason: String },
    #[error("device {0} not found in partition listing")]
    DeviceNotFound(String),
}
