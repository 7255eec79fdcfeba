use crate::naming::{clean_volume_name, installer_volume_name};
use crate::PlanError;
use multiboot_core::{
    DriveStructure, InstallerDescriptor, PartitionInfo, PlannedAction, BYTES_PER_MB,
};
use multiboot_sizing::{installer_size_mb, os_family_in, resolve_os_name, SizingConfig};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

/// Lifecycle of one installer in an update batch:
/// `Matched | NotMatched` -> `Replacing | Splitting | AddingToFree` ->
/// `Executed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Matched,
    NotMatched,
    Replacing,
    Splitting,
    AddingToFree,
    Executed,
    Failed,
}

impl ActionState {
    pub fn for_action(action: &PlannedAction) -> Self {
        match action {
            PlannedAction::ReplaceExisting { .. } => ActionState::Replacing,
            PlannedAction::SplitDataPartition { .. } => ActionState::Splitting,
            PlannedAction::AddToFreeSpace { .. } => ActionState::AddingToFree,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionState::Executed | ActionState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub installer: InstallerDescriptor,
    pub os_name: &'static str,
    pub volume_name: String,
    pub required_mb: u64,
    pub result: Result<PlannedAction, PlanError>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdatePlan {
    pub steps: Vec<PlannedStep>,
}

impl UpdatePlan {
    pub fn actions(&self) -> impl Iterator<Item = &PlannedAction> {
        self.steps.iter().filter_map(|step| step.result.as_ref().ok())
    }

    pub fn errors(&self) -> impl Iterator<Item = &PlanError> {
        self.steps.iter().filter_map(|step| step.result.as_ref().err())
    }
}

/// Finds the installer partition that already holds `os_name`.
///
/// Heuristic, in order:
/// 1. exact: the cleaned volume name, or the catalog OS named in it, equals
///    `os_name` (case-insensitive);
/// 2. containment in either direction, longest cleaned name first, skipping
///    partitions that clearly belong to a different catalog OS.
///
/// Step 2 tolerates naming drift between tool versions and can still
/// produce false positives for volumes named outside the convention.
/// Partitions whose volume name is in `claimed` are never matched.
pub fn match_existing<'a>(
    os_name: &str,
    partitions: &'a [PartitionInfo],
    claimed: &BTreeSet<String>,
) -> Option<&'a PartitionInfo> {
    let target = os_name.to_ascii_lowercase();
    let candidates: Vec<(&PartitionInfo, String)> = partitions
        .iter()
        .filter(|partition| !claimed.contains(&partition.volume_name))
        .map(|partition| {
            let clean = partition
                .clean_name
                .clone()
                .unwrap_or_else(|| clean_volume_name(&partition.volume_name));
            (partition, clean)
        })
        .collect();

    let exact = candidates.iter().find(|(_, clean)| {
        clean.to_ascii_lowercase() == target
            || os_family_in(clean)
                .map(|family| family.to_ascii_lowercase() == target)
                .unwrap_or(false)
    });
    if let Some((partition, _)) = exact {
        return Some(*partition);
    }

    let mut by_length: Vec<&(&PartitionInfo, String)> = candidates.iter().collect();
    by_length.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
    by_length
        .into_iter()
        .filter(|(_, clean)| os_family_in(clean).is_none())
        .find(|(_, clean)| {
            let clean = clean.to_ascii_lowercase();
            !clean.is_empty() && (clean.contains(&target) || target.contains(&clean))
        })
        .map(|(partition, _)| *partition)
}

/// Plans a single installer against the current device snapshot.
///
/// Matching partitions are reused at their current size, so a replacement
/// whose required size exceeds the partition is rejected here, before
/// anything is erased. Otherwise the reserved data partition is split, or
/// free space is used when the device has no data partition. A split must
/// leave a non-empty data remainder.
pub fn plan_next_action(
    structure: &DriveStructure,
    installer: &InstallerDescriptor,
    config: &SizingConfig,
    claimed: &BTreeSet<String>,
) -> Result<PlannedAction, PlanError> {
    let os_name = resolve_os_name(&installer.version, Some(&installer.name));
    let volume_name = installer_volume_name(installer);
    let required_mb = installer_size_mb(config, installer);

    if let Some(partition) = match_existing(os_name, &structure.existing_partitions, claimed) {
        let available_mb = partition.size_mb();
        debug!(installer = %installer.name, partition = %partition.id, "matched existing partition");
        if required_mb > available_mb {
            return Err(PlanError::CapacityError {
                installer: installer.name.clone(),
                partition_id: partition.id.clone(),
                required_mb,
                available_mb,
            });
        }
        return Ok(PlannedAction::ReplaceExisting {
            installer: installer.clone(),
            target_partition_id: partition.id.clone(),
            previous_volume_name: partition.volume_name.clone(),
            volume_name,
        });
    }

    if let Some(data) = &structure.data_partition {
        let available_mb = data.size_mb();
        if required_mb >= available_mb {
            return Err(PlanError::InsufficientSpace {
                installer: installer.name.clone(),
                required_mb,
                available_mb,
            });
        }
        return Ok(PlannedAction::SplitDataPartition {
            installer: installer.clone(),
            target_partition_id: data.id.clone(),
            volume_name,
            size_mb: required_mb,
        });
    }

    let available_mb = structure.free_space_bytes / BYTES_PER_MB;
    if required_mb > available_mb {
        return Err(PlanError::InsufficientSpace {
            installer: installer.name.clone(),
            required_mb,
            available_mb,
        });
    }
    Ok(PlannedAction::AddToFreeSpace {
        installer: installer.clone(),
        volume_name,
        size_mb: required_mb,
    })
}

/// Plans a whole batch against a simulated copy of `structure`, first fit
/// in caller order. Each installer gets its own result; a rejected
/// installer does not stop the rest.
///
/// The simulation only previews the batch. Executing it must go through
/// [`plan_next_action`] again after every device reread, because partition
/// identifiers move when the data partition is split.
pub fn plan_update(
    structure: &DriveStructure,
    installers: &[InstallerDescriptor],
    config: &SizingConfig,
) -> UpdatePlan {
    let mut simulated = structure.clone();
    let mut claimed = BTreeSet::new();
    let mut steps = Vec::with_capacity(installers.len());

    for installer in installers {
        let result = plan_next_action(&simulated, installer, config, &claimed);
        if let Ok(action) = &result {
            apply_simulated(&mut simulated, action);
            claimed.insert(action.volume_name().to_string());
        }
        steps.push(PlannedStep {
            installer: installer.clone(),
            os_name: resolve_os_name(&installer.version, Some(&installer.name)),
            volume_name: installer_volume_name(installer),
            required_mb: installer_size_mb(config, installer),
            result,
        });
    }

    UpdatePlan { steps }
}

fn apply_simulated(structure: &mut DriveStructure, action: &PlannedAction) {
    match action {
        PlannedAction::ReplaceExisting {
            target_partition_id,
            volume_name,
            ..
        } => {
            if let Some(partition) = structure
                .existing_partitions
                .iter_mut()
                .find(|partition| &partition.id == target_partition_id)
            {
                partition.volume_name = volume_name.clone();
                partition.clean_name = Some(clean_volume_name(volume_name));
            }
        }
        PlannedAction::SplitDataPartition {
            volume_name,
            size_mb,
            ..
        } => {
            let bytes = size_mb.saturating_mul(BYTES_PER_MB);
            if let Some(data) = structure.data_partition.as_mut() {
                data.size_bytes = data.size_bytes.saturating_sub(bytes);
            }
            structure
                .existing_partitions
                .push(simulated_partition(volume_name, bytes));
        }
        PlannedAction::AddToFreeSpace {
            volume_name,
            size_mb,
            ..
        } => {
            let bytes = size_mb.saturating_mul(BYTES_PER_MB);
            structure
                .existing_partitions
                .push(simulated_partition(volume_name, bytes));
        }
    }
    structure.estimate_free_space();
}

fn simulated_partition(volume_name: &str, size_bytes: u64) -> PartitionInfo {
    let mut partition = PartitionInfo::new(format!("planned:{}", volume_name), volume_name, size_bytes);
    partition.clean_name = Some(clean_volume_name(volume_name));
    partition
}

#[cfg(test)]
mod tests {
    use super::*;
    use multiboot_core::DATA_VOLUME_NAME;

    const GB_IN_KB: u64 = 1024 * 1024;
    const MB: u64 = BYTES_PER_MB;

    fn installer_partition(id: &str, name: &str, size_mb: u64) -> PartitionInfo {
        let mut partition = PartitionInfo::new(id, name, size_mb * MB);
        partition.clean_name = Some(clean_volume_name(name));
        partition
    }

    fn drive(existing: Vec<PartitionInfo>, data_mb: Option<u64>) -> DriveStructure {
        let mut structure = DriveStructure {
            disk_id: "disk4".to_string(),
            total_size_bytes: 64 * 1024 * MB,
            existing_partitions: existing,
            data_partition: data_mb.map(|mb| PartitionInfo::new("disk4s9", DATA_VOLUME_NAME, mb * MB)),
            other_partitions: vec![PartitionInfo::new("disk4s1", "EFI", 200 * MB)],
            free_space_bytes: 0,
        };
        structure.estimate_free_space();
        structure
    }

    fn sonoma() -> InstallerDescriptor {
        InstallerDescriptor::new("Install macOS Sonoma.app", "14.6.1", 13 * GB_IN_KB)
    }

    #[test]
    fn matches_createinstallmedia_volume_name() {
        let structure = drive(vec![installer_partition("disk4s2", "Install macOS Sonoma", 20_000)], Some(30_000));
        let action = plan_next_action(&structure, &sonoma(), &SizingConfig::default(), &BTreeSet::new()).unwrap();
        match action {
            PlannedAction::ReplaceExisting { target_partition_id, previous_volume_name, volume_name, .. } => {
                assert_eq!(target_partition_id, "disk4s2");
                assert_eq!(previous_volume_name, "Install macOS Sonoma");
                assert_eq!(volume_name, "INSTALL_Sonoma_14_6_1");
            }
            other => panic!("expected replace, got {other:?}"),
        }
    }

    #[test]
    fn matches_own_naming_convention() {
        let partitions = vec![
            installer_partition("disk4s2", "INSTALL_Ventura_13_6_7", 18_000),
            installer_partition("disk4s3", "INSTALL_Sonoma_14_5", 18_000),
        ];
        let found = match_existing("Sonoma", &partitions, &BTreeSet::new()).unwrap();
        assert_eq!(found.id, "disk4s3");
    }

    #[test]
    fn sierra_does_not_take_high_sierra() {
        let partitions = vec![installer_partition("disk4s2", "INSTALL_High Sierra_10_13_6", 12_000)];
        assert!(match_existing("Sierra", &partitions, &BTreeSet::new()).is_none());
        assert!(match_existing("High Sierra", &partitions, &BTreeSet::new()).is_some());
    }

    #[test]
    fn containment_fallback_for_unknown_names() {
        let partitions = vec![installer_partition("disk4s2", "INSTALL_macOS_27_0", 12_000)];
        let found = match_existing("macOS", &partitions, &BTreeSet::new());
        assert_eq!(found.map(|p| p.id.as_str()), Some("disk4s2"));
    }

    #[test]
    fn claimed_partitions_are_skipped() {
        let partitions = vec![installer_partition("disk4s2", "Install macOS Sonoma", 20_000)];
        let claimed: BTreeSet<String> = ["Install macOS Sonoma".to_string()].into_iter().collect();
        assert!(match_existing("Sonoma", &partitions, &claimed).is_none());
    }

    #[test]
    fn replacement_too_small_is_a_capacity_error() {
        let structure = drive(vec![installer_partition("disk4s2", "Install macOS Sonoma", 12_000)], Some(30_000));
        let err = plan_next_action(&structure, &sonoma(), &SizingConfig::default(), &BTreeSet::new()).unwrap_err();
        assert_eq!(
            err,
            PlanError::CapacityError {
                installer: "Install macOS Sonoma.app".to_string(),
                partition_id: "disk4s2".to_string(),
                required_mb: 16431,
                available_mb: 12_000,
            }
        );
    }

    #[test]
    fn unmatched_installer_splits_data_partition() {
        let structure = drive(vec![], Some(30_000));
        let action = plan_next_action(&structure, &sonoma(), &SizingConfig::default(), &BTreeSet::new()).unwrap();
        assert_eq!(
            action,
            PlannedAction::SplitDataPartition {
                installer: sonoma(),
                target_partition_id: "disk4s9".to_string(),
                volume_name: "INSTALL_Sonoma_14_6_1".to_string(),
                size_mb: 16431,
            }
        );
    }

    #[test]
    fn data_partition_too_small() {
        let structure = drive(vec![], Some(16431));
        let err = plan_next_action(&structure, &sonoma(), &SizingConfig::default(), &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, PlanError::InsufficientSpace { available_mb: 16431, .. }));
    }

    #[test]
    fn without_data_partition_uses_free_space() {
        let structure = drive(vec![], None);
        let action = plan_next_action(&structure, &sonoma(), &SizingConfig::default(), &BTreeSet::new()).unwrap();
        assert!(matches!(action, PlannedAction::AddToFreeSpace { size_mb: 16431, .. }));

        let mut full = drive(vec![installer_partition("disk4s2", "INSTALL_Ventura_13_6", 60_000)], None);
        full.estimate_free_space();
        let err = plan_next_action(&full, &sonoma(), &SizingConfig::default(), &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, PlanError::InsufficientSpace { .. }));
    }

    #[test]
    fn batch_consumes_data_partition_in_order() {
        let structure = drive(vec![installer_partition("disk4s2", "Install macOS Ventura", 18_000)], Some(35_000));
        let installers = vec![
            sonoma(),
            InstallerDescriptor::new("Install macOS Ventura.app", "13.6.7", 12 * GB_IN_KB),
            InstallerDescriptor::new("Install macOS Sequoia.app", "15.1", 15 * GB_IN_KB),
            InstallerDescriptor::new("Install macOS Monterey.app", "12.7.4", 12 * GB_IN_KB),
        ];
        let plan = plan_update(&structure, &installers, &SizingConfig::default());
        assert_eq!(plan.steps.len(), 4);
        assert!(matches!(plan.steps[0].result, Ok(PlannedAction::SplitDataPartition { .. })));
        assert!(matches!(plan.steps[1].result, Ok(PlannedAction::ReplaceExisting { .. })));
        // 35000 - 16431 leaves 18569 MB, Sequoia needs 18888.
        assert!(matches!(plan.steps[2].result, Err(PlanError::InsufficientSpace { .. })));
        // Monterey needs 15151 and still fits.
        assert!(matches!(plan.steps[3].result, Ok(PlannedAction::SplitDataPartition { .. })));
        assert_eq!(plan.actions().count(), 3);
        assert_eq!(plan.errors().count(), 1);
    }

    #[test]
    fn same_os_twice_only_replaces_once() {
        let structure = drive(vec![installer_partition("disk4s2", "Install macOS Sonoma", 20_000)], Some(30_000));
        let newer = InstallerDescriptor::new("Install macOS Sonoma.app", "14.7", 13 * GB_IN_KB);
        let plan = plan_update(&structure, &[sonoma(), newer], &SizingConfig::default());
        assert!(matches!(plan.steps[0].result, Ok(PlannedAction::ReplaceExisting { .. })));
        assert!(matches!(plan.steps[1].result, Ok(PlannedAction::SplitDataPartition { .. })));
    }

    #[test]
    fn states() {
        let action = PlannedAction::AddToFreeSpace {
            installer: sonoma(),
            volume_name: "INSTALL_Sonoma_14_6_1".to_string(),
            size_mb: 1,
        };
        assert_eq!(ActionState::for_action(&action), ActionState::AddingToFree);
        assert!(ActionState::Failed.is_terminal());
        assert!(!ActionState::Splitting.is_terminal());
    }
}
