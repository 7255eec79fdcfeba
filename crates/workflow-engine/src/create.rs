use crate::install::{install_into_partition, InstallerOutcome};
use crate::ops::DiskOps;
use crate::{log_excluded, safety_gate};
use anyhow::{Context, Result};
use multiboot_content::partition_by_usability;
use multiboot_core::{InstallerDescriptor, BYTES_PER_MB};
use multiboot_host_macos::HostInfo;
use multiboot_layout::{plan_fresh_layout, ActionState, FreshLayout};
use multiboot_report::{ReportBundle, ReportPaths};
use multiboot_sizing::{resolve_os_name, SizingConfig};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CreateParams {
    pub disk_id: String,
    pub installers: Vec<InstallerDescriptor>,
    /// Overrides the size read from the device, in binary GB.
    pub total_device_gb: Option<f64>,
    pub sizing: SizingConfig,
    pub report_base: PathBuf,
    pub host: Option<HostInfo>,
    pub force: bool,
    pub confirmation_token: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct CreateResult {
    pub report: ReportPaths,
    pub layout: FreshLayout,
    pub outcomes: Vec<InstallerOutcome>,
    pub dry_run: bool,
}

/// Erases `disk_id`, lays out one partition per installer and installs each
/// one. The plan is computed and checked against the device size before
/// anything is touched; individual install failures do not stop the batch.
pub fn run_create(params: &CreateParams, ops: &mut dyn DiskOps) -> Result<CreateResult> {
    let mut logs = Vec::new();
    logs.push("workflow=create".to_string());
    logs.push(format!("target_disk={}", params.disk_id));
    logs.push(format!("dry_run={}", params.dry_run));

    let (installers, excluded) = partition_by_usability(params.installers.clone());
    log_excluded(&excluded, &mut logs);

    let structure = ops
        .read_structure(&params.disk_id)
        .with_context(|| format!("read {}", params.disk_id))?;
    let total_device_gb = params
        .total_device_gb
        .unwrap_or_else(|| structure.total_size_bytes as f64 / (1024.0 * BYTES_PER_MB as f64));
    logs.push(format!("device_gb={:.2}", total_device_gb));

    let layout = plan_fresh_layout(&installers, total_device_gb, &params.sizing)?;
    for planned in &layout.installers {
        logs.push(format!(
            "planned installer={} volume={} size_mb={}",
            planned.installer.name, planned.volume_name, planned.required_mb
        ));
    }
    logs.push(format!(
        "consumed_mb={} remainder_mb={} data_partition={}",
        layout.consumed_mb,
        layout.remainder_mb,
        layout.has_data_partition()
    ));

    let bundle = ReportBundle::create(&params.report_base)?;
    let mut outcomes = Vec::new();
    let mut final_structure = Some(structure);

    if !params.dry_run {
        safety_gate(ops, &params.disk_id, params.force, &params.confirmation_token)?;

        match ops.backup_partition_table(&params.disk_id, &bundle.backups_dir()) {
            Ok(path) => logs.push(format!("backup={}", path.display())),
            Err(err) => {
                warn!(error = %err, "partition table backup failed");
                logs.push(format!("backup_error=\"{}\"", err));
            }
        }

        info!(disk = %params.disk_id, entries = layout.entries.len(), "applying layout");
        ops.apply_partition_plan(&params.disk_id, &layout.entries)
            .with_context(|| format!("partition {}", params.disk_id))?;
        logs.push("partitioned=true".to_string());

        let structure = ops.read_structure(&params.disk_id)?;
        for planned in &layout.installers {
            let installer = &planned.installer;
            let os_name = resolve_os_name(&installer.version, Some(&installer.name));
            let mut outcome = InstallerOutcome::new(installer, os_name, &planned.volume_name);
            outcome.action = Some("fresh_partition".to_string());

            let Some(partition) = structure.find_by_volume_name(&planned.volume_name) else {
                outcome.fail(format!("{} not found after partitioning", planned.volume_name));
                logs.push(outcome.log_line());
                outcomes.push(outcome);
                continue;
            };
            outcome.partition_id = Some(partition.id.clone());

            match install_into_partition(ops, &params.disk_id, &partition.id, installer, os_name, &mut outcome) {
                Ok(final_name) => {
                    outcome.final_volume_name = Some(final_name);
                    outcome.states.push(ActionState::Executed);
                }
                Err(err) => {
                    warn!(installer = %installer.name, error = %err, "install failed");
                    outcome.fail(format!("{:#}", err));
                }
            }
            logs.push(outcome.log_line());
            outcomes.push(outcome);
        }

        final_structure = match ops.read_structure(&params.disk_id) {
            Ok(structure) => Some(structure),
            Err(err) => {
                warn!(error = %err, "final reread failed");
                None
            }
        };
    }

    let meta = serde_json::json!({
        "workflow": "create",
        "status": if params.dry_run { "dry_run" } else { "completed" },
        "target_disk": params.disk_id,
        "layout": layout,
        "excluded": excluded.iter().map(|e| serde_json::json!({
            "installer": e.installer.name,
            "reason": e.reason,
        })).collect::<Vec<_>>(),
        "outcomes": outcomes,
        "dry_run": params.dry_run,
    });
    let report = bundle.finish(params.host.as_ref(), final_structure.as_ref(), Some(meta), &logs)?;

    Ok(CreateResult {
        report,
        layout,
        outcomes,
        dry_run: params.dry_run,
    })
}
