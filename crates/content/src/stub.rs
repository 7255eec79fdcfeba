use multiboot_core::{InstallerDescriptor, InstallerStatus, BYTES_PER_MB};
use std::path::Path;

/// Below this `SharedSupport.dmg` is a stub regardless of anything else.
pub const STUB_THRESHOLD_MB: u64 = 50;
/// Without `BaseSystem.dmg`, `SharedSupport.dmg` must be at least this big.
pub const MIN_SHARED_SUPPORT_MB: u64 = 100;

const SHARED_SUPPORT: &str = "Contents/SharedSupport/SharedSupport.dmg";
const BASE_SYSTEM: &str = "Contents/SharedSupport/BaseSystem.dmg";

/// Why `app` is missing its payload, or `None` for a full installer.
pub fn stub_reason(app: &Path) -> Option<String> {
    let shared_support = app.join(SHARED_SUPPORT);
    let size = match std::fs::metadata(&shared_support) {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => return Some("SharedSupport.dmg missing".to_string()),
    };
    let size_mb = size as f64 / BYTES_PER_MB as f64;
    if size_mb < STUB_THRESHOLD_MB as f64 {
        return Some(format!("SharedSupport.dmg too small ({:.1} MB)", size_mb));
    }
    if !app.join(BASE_SYSTEM).is_file() && size_mb < MIN_SHARED_SUPPORT_MB as f64 {
        return Some(format!(
            "BaseSystem.dmg missing and SharedSupport.dmg only {:.1} MB",
            size_mb
        ));
    }
    None
}

pub fn is_stub(app: &Path) -> bool {
    stub_reason(app).is_some()
}

/// Sets `status`/`stub_reason` on a discovered bundle. Partial and
/// in-progress downloads keep their status.
pub fn validate_installer(mut installer: InstallerDescriptor) -> InstallerDescriptor {
    if matches!(
        installer.status,
        InstallerStatus::Partial | InstallerStatus::Downloading
    ) {
        return installer;
    }
    match stub_reason(&installer.path) {
        Some(reason) => {
            installer.status = InstallerStatus::Stub;
            installer.stub_reason = Some(reason);
        }
        None => {
            installer.status = InstallerStatus::Full;
            installer.stub_reason = None;
        }
    }
    installer
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExcludedInstaller {
    pub installer: InstallerDescriptor,
    pub reason: String,
}

/// Splits a scan into installers that can be planned and the ones that
/// cannot, each with a reason.
pub fn partition_by_usability(
    installers: Vec<InstallerDescriptor>,
) -> (Vec<InstallerDescriptor>, Vec<ExcludedInstaller>) {
    let mut usable = Vec::new();
    let mut excluded = Vec::new();
    for installer in installers {
        if installer.is_full() && installer.payload_size_kb > 0 {
            usable.push(installer);
            continue;
        }
        let reason = installer.stub_reason.clone().unwrap_or_else(|| match installer.status {
            InstallerStatus::Partial => "partial download".to_string(),
            InstallerStatus::Downloading => "download in progress".to_string(),
            InstallerStatus::Full => "payload size could not be measured".to_string(),
            _ => format!("status {}", installer.status.as_str()),
        });
        excluded.push(ExcludedInstaller { installer, reason });
    }
    (usable, excluded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};

    fn app_with(root: &Path, shared_support_mb: Option<u64>, base_system: bool) -> std::path::PathBuf {
        let app = root.join("Install macOS Sonoma.app");
        let support = app.join("Contents/SharedSupport");
        fs::create_dir_all(&support).unwrap();
        if let Some(mb) = shared_support_mb {
            // Sparse file, only the length matters.
            File::create(support.join("SharedSupport.dmg"))
                .unwrap()
                .set_len(mb * BYTES_PER_MB)
                .unwrap();
        }
        if base_system {
            fs::write(support.join("BaseSystem.dmg"), b"x").unwrap();
        }
        app
    }

    #[test]
    fn missing_payload_is_stub() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(dir.path(), None, false);
        assert!(is_stub(&app));
        assert_eq!(stub_reason(&app).as_deref(), Some("SharedSupport.dmg missing"));
    }

    #[test]
    fn tiny_payload_is_stub() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(dir.path(), Some(20), true);
        assert_eq!(stub_reason(&app).as_deref(), Some("SharedSupport.dmg too small (20.0 MB)"));
    }

    #[test]
    fn mid_sized_payload_needs_base_system() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(dir.path(), Some(80), false);
        assert!(stub_reason(&app).unwrap().starts_with("BaseSystem.dmg missing"));

        let dir = tempfile::tempdir().unwrap();
        let app = app_with(dir.path(), Some(80), true);
        assert!(!is_stub(&app));
    }

    #[test]
    fn large_payload_is_full() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(dir.path(), Some(150), false);
        let installer = validate_installer(
            InstallerDescriptor::new("Install macOS Sonoma.app", "14.6.1", 0).with_path(&app),
        );
        assert_eq!(installer.status, InstallerStatus::Full);
        assert!(installer.stub_reason.is_none());
    }

    #[test]
    fn excluded_installers_carry_reasons() {
        let dir = tempfile::tempdir().unwrap();
        let stub_app = app_with(dir.path(), None, false);
        let stub = validate_installer(InstallerDescriptor::new("Install macOS Sonoma.app", "14.6.1", 0).with_path(&stub_app));
        let partial = InstallerDescriptor::new("Install macOS Sequoia.app", "Partial", 0)
            .with_status(InstallerStatus::Partial);
        let full = InstallerDescriptor::new("Install macOS Ventura.app", "13.6.7", 1).with_status(InstallerStatus::Full);

        let (usable, excluded) = partition_by_usability(vec![stub, partial, full]);
        assert_eq!(usable.len(), 1);
        assert_eq!(usable[0].name, "Install macOS Ventura.app");
        let reasons: Vec<&str> = excluded.iter().map(|e| e.reason.as_str()).collect();
        assert_eq!(reasons, vec!["SharedSupport.dmg missing", "partial download"]);
    }

    #[test]
    fn full_bundle_without_measured_size_is_excluded() {
        let unmeasured = InstallerDescriptor::new("Install macOS Sonoma.app", "14.6.1", 0)
            .with_status(InstallerStatus::Full);
        let (usable, excluded) = partition_by_usability(vec![unmeasured]);
        assert!(usable.is_empty());
        assert_eq!(excluded[0].reason, "payload size could not be measured");
    }
}
