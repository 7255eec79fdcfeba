use crate::install::{install_into_partition, InstallerOutcome};
use crate::ops::DiskOps;
use crate::{log_excluded, safety_gate};
use anyhow::{Context, Result};
use multiboot_content::partition_by_usability;
use multiboot_core::{DriveStructure, InstallerDescriptor, PlannedAction};
use multiboot_host_macos::HostInfo;
use multiboot_layout::{
    installer_volume_name, plan_next_action, plan_update, ActionState, PlanError, UpdatePlan,
};
use multiboot_report::{ReportBundle, ReportPaths};
use multiboot_sizing::{resolve_os_name, SizingConfig};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct UpdateParams {
    pub disk_id: String,
    pub installers: Vec<InstallerDescriptor>,
    pub sizing: SizingConfig,
    pub report_base: PathBuf,
    pub host: Option<HostInfo>,
    pub force: bool,
    pub confirmation_token: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct UpdateResult {
    pub report: ReportPaths,
    /// Preview computed from the initial structure.
    pub plan: UpdatePlan,
    /// One entry per usable installer, in caller order. Empty for dry runs.
    pub outcomes: Vec<InstallerOutcome>,
    pub dry_run: bool,
}

/// Adds or refreshes installers on an already provisioned device.
///
/// Each installer goes through read -> plan -> execute -> reread -> install,
/// strictly one at a time, since splitting the data partition renumbers
/// slices. A failed installer is recorded and the batch moves on; nothing
/// already done is rolled back. A failed device read stops the batch, as
/// planning without a current structure would be guesswork.
pub fn run_update(params: &UpdateParams, ops: &mut dyn DiskOps) -> Result<UpdateResult> {
    let mut logs = Vec::new();
    logs.push("workflow=update".to_string());
    logs.push(format!("target_disk={}", params.disk_id));
    logs.push(format!("dry_run={}", params.dry_run));

    let (installers, excluded) = partition_by_usability(params.installers.clone());
    log_excluded(&excluded, &mut logs);

    let initial = ops
        .read_structure(&params.disk_id)
        .with_context(|| format!("read {}", params.disk_id))?;
    let plan = plan_update(&initial, &installers, &params.sizing);
    for step in &plan.steps {
        match &step.result {
            Ok(action) => logs.push(format!(
                "planned installer={} action={} volume={} size_mb={}",
                step.installer.name,
                action.kind(),
                step.volume_name,
                step.required_mb
            )),
            Err(err) => logs.push(format!(
                "planned installer={} rejected=\"{}\"",
                step.installer.name, err
            )),
        }
    }

    let bundle = ReportBundle::create(&params.report_base)?;
    let mut outcomes = Vec::new();
    let mut final_structure = Some(initial);

    if !params.dry_run {
        safety_gate(ops, &params.disk_id, params.force, &params.confirmation_token)?;

        match ops.backup_partition_table(&params.disk_id, &bundle.backups_dir()) {
            Ok(path) => logs.push(format!("backup={}", path.display())),
            Err(err) => {
                warn!(error = %err, "partition table backup failed");
                logs.push(format!("backup_error=\"{}\"", err));
            }
        }

        let mut claimed = BTreeSet::new();
        let mut aborted: Option<String> = None;
        for installer in &installers {
            let os_name = resolve_os_name(&installer.version, Some(&installer.name));
            let mut outcome = InstallerOutcome::new(installer, os_name, &installer_volume_name(installer));

            if let Some(reason) = &aborted {
                outcome.fail(format!("not attempted: {}", reason));
            } else {
                match ops.read_structure(&params.disk_id) {
                    Ok(structure) => {
                        update_one(ops, params, &structure, installer, os_name, &mut claimed, &mut outcome);
                    }
                    Err(err) => {
                        let reason = format!("device read failed: {:#}", err);
                        warn!(disk = %params.disk_id, error = %err, "stopping batch");
                        outcome.fail(&reason);
                        aborted = Some(reason);
                    }
                }
            }
            debug_assert!(outcome.states.last().is_some_and(ActionState::is_terminal));
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

    let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
    logs.push(format!("executed={} failed={}", succeeded, outcomes.len() - succeeded));

    let meta = serde_json::json!({
        "workflow": "update",
        "status": if params.dry_run { "dry_run" } else { "completed" },
        "target_disk": params.disk_id,
        "plan": plan.steps.iter().map(|step| serde_json::json!({
            "installer": step.installer.name,
            "os_name": step.os_name,
            "volume_name": step.volume_name,
            "required_mb": step.required_mb,
            "action": step.result.as_ref().ok(),
            "error": step.result.as_ref().err().map(|e| e.to_string()),
        })).collect::<Vec<_>>(),
        "excluded": excluded.iter().map(|e| serde_json::json!({
            "installer": e.installer.name,
            "reason": e.reason,
        })).collect::<Vec<_>>(),
        "outcomes": outcomes,
        "dry_run": params.dry_run,
    });
    let report = bundle.finish(params.host.as_ref(), final_structure.as_ref(), Some(meta), &logs)?;

    Ok(UpdateResult {
        report,
        plan,
        outcomes,
        dry_run: params.dry_run,
    })
}

fn update_one(
    ops: &mut dyn DiskOps,
    params: &UpdateParams,
    structure: &DriveStructure,
    installer: &InstallerDescriptor,
    os_name: &str,
    claimed: &mut BTreeSet<String>,
    outcome: &mut InstallerOutcome,
) {
    let action = match plan_next_action(structure, installer, &params.sizing, claimed) {
        Ok(action) => action,
        Err(err) => {
            outcome.states.push(match &err {
                PlanError::CapacityError { .. } => ActionState::Matched,
                _ => ActionState::NotMatched,
            });
            outcome.fail(err);
            return;
        }
    };
    outcome.states.push(match action {
        PlannedAction::ReplaceExisting { .. } => ActionState::Matched,
        _ => ActionState::NotMatched,
    });
    outcome.states.push(ActionState::for_action(&action));
    outcome.action = Some(action.kind().to_string());
    info!(installer = %installer.name, action = action.kind(), volume = action.volume_name(), "executing");

    let receipt = match ops.execute_action(&params.disk_id, &action) {
        Ok(receipt) => receipt,
        Err(err) => {
            outcome.fail(format!("{:#}", err));
            return;
        }
    };
    claimed.insert(receipt.volume_name.clone());

    // Slot numbers may have moved; find the partition again by name.
    let partition_id = match ops.read_structure(&params.disk_id) {
        Ok(current) => match current.find_by_volume_name(&receipt.volume_name) {
            Some(partition) => partition.id.clone(),
            None => {
                outcome.fail(format!("{} not found after {}", receipt.volume_name, action.kind()));
                return;
            }
        },
        Err(err) => {
            outcome.fail(format!("{:#}", err));
            return;
        }
    };
    outcome.partition_id = Some(partition_id.clone());

    match install_into_partition(ops, &params.disk_id, &partition_id, installer, os_name, outcome) {
        Ok(final_name) => {
            claimed.insert(final_name.clone());
            outcome.final_volume_name = Some(final_name);
            outcome.states.push(ActionState::Executed);
        }
        Err(err) => {
            warn!(installer = %installer.name, error = %err, "install failed");
            outcome.fail(format!("{:#}", err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeDisk;
    use multiboot_core::InstallerStatus;

    const GB_IN_KB: u64 = 1024 * 1024;

    fn full(name: &str, version: &str, payload_gb: u64) -> InstallerDescriptor {
        InstallerDescriptor::new(name, version, payload_gb * GB_IN_KB).with_status(InstallerStatus::Full)
    }

    fn batch() -> Vec<InstallerDescriptor> {
        vec![
            full("Install macOS Sonoma.app", "14.7", 13),
            full("Install macOS Ventura.app", "13.6.7", 12),
            full("Install macOS Monterey.app", "12.7.4", 12),
        ]
    }

    /// disk4s1 EFI, disk4s2 Sonoma, disk4s3 data.
    fn provisioned(sonoma_mb: u64) -> FakeDisk {
        FakeDisk::with_slices(
            "disk4",
            64 * 1024,
            &[("EFI", 200), ("Install macOS Sonoma", sonoma_mb), ("DATA_STORE", 40_000)],
        )
    }

    fn params(base: &std::path::Path, dry_run: bool) -> UpdateParams {
        UpdateParams {
            disk_id: "disk4".to_string(),
            installers: batch(),
            sizing: SizingConfig::default(),
            report_base: base.to_path_buf(),
            host: None,
            force: true,
            confirmation_token: Some("MBT-test".to_string()),
            dry_run,
        }
    }

    #[test]
    fn dry_run_only_previews() {
        let tmp = tempfile::tempdir().unwrap();
        let mut disk = provisioned(20_000);
        let result = run_update(&params(tmp.path(), true), &mut disk).unwrap();

        assert!(disk.calls.is_empty());
        assert!(result.outcomes.is_empty());
        let kinds: Vec<&str> = result.plan.actions().map(|a| a.kind()).collect();
        assert_eq!(
            kinds,
            vec!["replace_existing", "split_data_partition", "split_data_partition"]
        );
        assert!(result.report.run_json.exists());
    }

    #[test]
    fn replaces_and_splits_across_renumbered_slices() {
        let tmp = tempfile::tempdir().unwrap();
        let mut disk = provisioned(20_000);
        let result = run_update(&params(tmp.path(), false), &mut disk).unwrap();

        assert!(result.outcomes.iter().all(|o| o.succeeded()), "{:?}", result.outcomes);
        assert_eq!(
            result.outcomes[0].states,
            vec![ActionState::Matched, ActionState::Replacing, ActionState::Executed]
        );
        assert_eq!(
            result.outcomes[1].states,
            vec![ActionState::NotMatched, ActionState::Splitting, ActionState::Executed]
        );
        // Each split moves the data partition to a new slice.
        assert_eq!(disk.slice_id("Install macOS Sonoma"), Some("disk4s2"));
        assert_eq!(disk.slice_id("Install macOS Ventura"), Some("disk4s3"));
        assert_eq!(disk.slice_id("Install macOS Monterey"), Some("disk4s4"));
        assert_eq!(disk.slice_id("DATA_STORE"), Some("disk4s5"));
        assert_eq!(result.outcomes[2].partition_id.as_deref(), Some("disk4s4"));
    }

    #[test]
    fn capacity_error_fails_one_installer_only() {
        let tmp = tempfile::tempdir().unwrap();
        let mut disk = provisioned(12_000);
        let result = run_update(&params(tmp.path(), false), &mut disk).unwrap();

        let sonoma = &result.outcomes[0];
        assert_eq!(sonoma.states, vec![ActionState::Matched, ActionState::Failed]);
        assert!(sonoma.error.as_deref().unwrap().contains("too small"));
        assert!(result.outcomes[1].succeeded());
        assert!(result.outcomes[2].succeeded());
        assert_eq!(disk.slice_id("Install macOS Sonoma"), Some("disk4s2"));

        let logs = std::fs::read_to_string(&result.report.logs_path).unwrap();
        assert!(logs.contains("executed=2 failed=1"));
    }

    #[test]
    fn read_failure_stops_the_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let mut disk = provisioned(20_000);
        // Initial read plus three per installer.
        disk.fail_reads_after = Some(4);
        let result = run_update(&params(tmp.path(), false), &mut disk).unwrap();

        assert!(result.outcomes[0].succeeded());
        assert!(result.outcomes[1]
            .error
            .as_deref()
            .unwrap()
            .starts_with("device read failed"));
        assert!(result.outcomes[2]
            .error
            .as_deref()
            .unwrap()
            .starts_with("not attempted"));
        assert!(!disk.calls.iter().any(|call| call.starts_with("split")));
        assert!(result.report.drive_structure_json.is_none());
    }

    #[test]
    fn refuses_without_force() {
        let tmp = tempfile::tempdir().unwrap();
        let mut disk = provisioned(20_000);
        let mut p = params(tmp.path(), false);
        p.force = false;

        let err = run_update(&p, &mut disk).unwrap_err();
        assert!(err.to_string().contains("force-mode"));
        assert!(disk.calls.is_empty());
    }
}
