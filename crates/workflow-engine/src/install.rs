use crate::ops::DiskOps;
use anyhow::{anyhow, Result};
use multiboot_core::InstallerDescriptor;
use multiboot_layout::ActionState;
use serde::Serialize;
use tracing::{info, warn};

/// Result for one installer in a batch. A batch is a list of these, never a
/// single pass/fail flag.
#[derive(Debug, Clone, Serialize)]
pub struct InstallerOutcome {
    pub installer: String,
    pub os_name: String,
    pub volume_name: String,
    pub action: Option<String>,
    pub partition_id: Option<String>,
    pub final_volume_name: Option<String>,
    pub states: Vec<ActionState>,
    pub branded: bool,
    pub error: Option<String>,
}

impl InstallerOutcome {
    pub fn new(installer: &InstallerDescriptor, os_name: &str, volume_name: &str) -> Self {
        Self {
            installer: installer.name.clone(),
            os_name: os_name.to_string(),
            volume_name: volume_name.to_string(),
            action: None,
            partition_id: None,
            final_volume_name: None,
            states: Vec::new(),
            branded: false,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.states.last() == Some(&ActionState::Executed)
    }

    pub fn fail(&mut self, error: impl std::fmt::Display) {
        self.error = Some(error.to_string());
        self.states.push(ActionState::Failed);
    }

    pub fn log_line(&self) -> String {
        let outcome = if self.succeeded() { "executed" } else { "failed" };
        let mut line = format!(
            "installer={} volume={} outcome={}",
            self.installer, self.volume_name, outcome
        );
        if let Some(action) = &self.action {
            line.push_str(&format!(" action={}", action));
        }
        if let Some(partition) = &self.partition_id {
            line.push_str(&format!(" partition={}", partition));
        }
        if let Some(error) = &self.error {
            line.push_str(&format!(" error=\"{}\"", error));
        }
        line
    }
}

/// Mounts `partition_id`, runs the installer onto it and brands the result.
/// Returns the volume name the partition carries afterwards, since the
/// install tool renames the volume.
pub(crate) fn install_into_partition(
    ops: &mut dyn DiskOps,
    disk_id: &str,
    partition_id: &str,
    installer: &InstallerDescriptor,
    os_name: &str,
    outcome: &mut InstallerOutcome,
) -> Result<String> {
    let volume = ops
        .mount_partition(partition_id)?
        .ok_or_else(|| anyhow!("{} has no mount point", partition_id))?;

    ops.prepare_branding(installer);
    let mut last_logged = 0u8;
    ops.install_payload(installer, &volume, &mut |percent| {
        if percent >= last_logged.saturating_add(10) || percent == 100 {
            info!(installer = %installer.name, percent, "install progress");
            last_logged = percent;
        }
    })?;

    let structure = ops.read_structure(disk_id)?;
    let final_name = structure
        .find_by_id(partition_id)
        .map(|partition| partition.volume_name.clone())
        .ok_or_else(|| anyhow!("{} disappeared after install", partition_id))?;

    // The install tool may remount under the new name.
    let branded_volume = match ops.mount_partition(partition_id) {
        Ok(Some(path)) => path,
        _ => volume,
    };
    match ops.brand_volume(&branded_volume, installer, os_name) {
        Ok(()) => outcome.branded = true,
        Err(err) => warn!(installer = %installer.name, error = %err, "branding skipped"),
    }
    Ok(final_name)
}
