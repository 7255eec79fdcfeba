//! Partition layout planning for multi-installer drives.
//!
//! [`plan_fresh_layout`] produces a whole-device GPT layout. The update side
//! ([`plan_update`], [`plan_next_action`]) works against a [`DriveStructure`]
//! snapshot and yields one [`PlannedAction`] per installer.
//!
//! [`DriveStructure`]: multiboot_core::DriveStructure
//! [`PlannedAction`]: multiboot_core::PlannedAction

pub mod fresh;
pub mod naming;
pub mod update;

use thiserror::Error;

pub use fresh::{
    plan_fresh_layout, FreshLayout, PlannedInstaller, DATA_REMAINDER_THRESHOLD_MB, EFI_RESERVE_MB,
};
pub use naming::{
    clean_volume_name, installer_volume_name, is_data_volume, is_installer_volume,
    sanitize_version, volume_version, INSTALL_PREFIX, VOLUME_NAME_MAX_LEN,
};
pub use update::{
    match_existing, plan_next_action, plan_update, ActionState, PlannedStep, UpdatePlan,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("no installers to plan")]
    NoInstallers,
    #[error("insufficient space for {installer}: requires {required_mb} MB, {available_mb} MB available")]
    InsufficientSpace {
        installer: String,
        required_mb: u64,
        available_mb: u64,
    },
    #[error("partition {partition_id} is too small for {installer}: requires {required_mb} MB, partition holds {available_mb} MB")]
    CapacityError {
        installer: String,
        partition_id: String,
        required_mb: u64,
        available_mb: u64,
    },
}
