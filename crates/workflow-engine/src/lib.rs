//! Create and update workflows for multi-installer drives.
//!
//! Workflows talk to the device only through [`DiskOps`]; [`MacDisk`] is
//! the real implementation. Every run leaves a report bundle with
//! `key=value` logs behind, dry runs included.

pub mod create;
#[cfg(test)]
mod fake;
pub mod install;
pub mod macos;
pub mod ops;
pub mod preferences;
pub mod update;

use anyhow::{anyhow, Result};
use multiboot_content::ExcludedInstaller;
use multiboot_safety::{can_write_to_disk, SafetyContext, SafetyDecision};
use tracing::warn;

pub use create::{run_create, CreateParams, CreateResult};
pub use install::InstallerOutcome;
pub use macos::MacDisk;
pub use ops::DiskOps;
pub use preferences::{default_preferences_path, Preferences, WorkflowMode};
pub use update::{run_update, UpdateParams, UpdateResult};

fn safety_gate(
    ops: &mut dyn DiskOps,
    disk_id: &str,
    force: bool,
    confirmation_token: &Option<String>,
) -> Result<()> {
    let ctx = SafetyContext {
        force_mode: force,
        confirmation_token: confirmation_token.clone(),
    };
    match can_write_to_disk(&ctx) {
        SafetyDecision::Allow => {}
        SafetyDecision::Deny(reason) => return Err(anyhow!(reason)),
    }
    match ops.check_target(disk_id) {
        SafetyDecision::Allow => Ok(()),
        SafetyDecision::Deny(reason) => Err(anyhow!("refusing to target {}: {}", disk_id, reason)),
    }
}

fn log_excluded(excluded: &[ExcludedInstaller], logs: &mut Vec<String>) {
    for entry in excluded {
        warn!(installer = %entry.installer.name, reason = %entry.reason, "installer excluded");
        logs.push(format!(
            "excluded installer={} reason=\"{}\"",
            entry.installer.name, entry.reason
        ));
    }
}
