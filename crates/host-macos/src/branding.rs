use crate::command::{run_cmd, tool_available};
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{info, warn};

const ICON_CANDIDATES: [&str; 2] = [
    "Contents/Resources/ProductPageIcon.icns",
    "Contents/Resources/InstallAssistant.icns",
];

/// Installer icons copied out of their bundles.
///
/// `createinstallmedia` may consume the bundle it runs from, so icons are
/// extracted before the install step and applied afterwards. The cache
/// directory is removed when the cache is dropped.
#[derive(Debug)]
pub struct IconCache {
    dir: TempDir,
    icons: BTreeMap<String, PathBuf>,
}

impl IconCache {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("multiboot-icons-")
            .tempdir()
            .context("create icon cache")?;
        Ok(Self {
            dir,
            icons: BTreeMap::new(),
        })
    }

    pub fn extract(&mut self, installer_app: &Path, key: &str) -> Option<&Path> {
        let source = ICON_CANDIDATES
            .iter()
            .map(|candidate| installer_app.join(candidate))
            .find(|candidate| candidate.is_file());
        let Some(source) = source else {
            warn!(installer = key, "no icon found in installer");
            return None;
        };
        let cached = self.dir.path().join(format!("{}.icns", key.replace([' ', '/'], "_")));
        if let Err(err) = fs::copy(&source, &cached) {
            warn!(installer = key, error = %err, "could not cache icon");
            return None;
        }
        self.icons.insert(key.to_string(), cached);
        self.icons.get(key).map(PathBuf::as_path)
    }

    pub fn get(&self, key: &str) -> Option<&Path> {
        self.icons.get(key).map(PathBuf::as_path)
    }

    /// Copies the cached icon to `<volume>/.VolumeIcon.icns` and sets the
    /// custom-icon attribute when `SetFile` is installed.
    pub fn apply(&self, volume: &Path, key: &str) -> Result<()> {
        let cached = self
            .get(key)
            .ok_or_else(|| anyhow!("no cached icon for {}", key))?;
        let target = volume.join(".VolumeIcon.icns");
        fs::copy(cached, &target).with_context(|| format!("copy icon to {}", target.display()))?;

        if tool_available("SetFile") {
            let volume = volume.to_string_lossy();
            run_cmd("SetFile", &["-a", "C", volume.as_ref()])?;
        } else {
            warn!("SetFile not installed, volume icon may not show");
        }
        Ok(())
    }
}

/// Startup-manager label, e.g. `macOS Sonoma 14.6.1`.
pub fn boot_label(os_name: &str, version: &str) -> String {
    let clean = os_name.replace("Install ", "").replace("macOS ", "");
    format!("macOS {} {}", clean.trim(), version.trim())
}

pub fn bless_volume(volume: &Path, os_name: &str, version: &str) -> Result<()> {
    let system_folder = [
        volume.join("System/Library/CoreServices"),
        volume.join("Library/CoreServices"),
    ]
    .into_iter()
    .find(|candidate| candidate.is_dir())
    .ok_or_else(|| anyhow!("no CoreServices folder on {}", volume.display()))?;

    let label = boot_label(os_name, version);
    let folder = system_folder.to_string_lossy();
    run_cmd("bless", &["--folder", folder.as_ref(), "--label", &label])?;
    Ok(())
}

/// Icon and boot label for one installer volume. Branding is cosmetic:
/// failures are logged and reported back, never raised.
pub fn brand_volume(cache: &IconCache, volume: &Path, key: &str, os_name: &str, version: &str) -> BrandingOutcome {
    let icon = match cache.apply(volume, key) {
        Ok(()) => true,
        Err(err) => {
            warn!(volume = %volume.display(), error = %err, "icon not applied");
            false
        }
    };
    let blessed = match bless_volume(volume, os_name, version) {
        Ok(()) => true,
        Err(err) => {
            warn!(volume = %volume.display(), error = %err, "bless failed");
            false
        }
    };
    info!(volume = %volume.display(), icon, blessed, "branding done");
    BrandingOutcome { icon, blessed }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrandingOutcome {
    pub icon: bool,
    pub blessed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_installer(root: &Path, icon: &str) -> PathBuf {
        let app = root.join("Install macOS Sonoma.app");
        let resources = app.join("Contents/Resources");
        fs::create_dir_all(&resources).unwrap();
        fs::write(resources.join(icon), b"icns").unwrap();
        app
    }

    #[test]
    fn labels() {
        assert_eq!(boot_label("Sonoma", "14.6.1"), "macOS Sonoma 14.6.1");
        assert_eq!(boot_label("Install macOS Big Sur", "11.7.10"), "macOS Big Sur 11.7.10");
    }

    #[test]
    fn extracts_and_applies_icon() {
        let dir = tempfile::tempdir().unwrap();
        let app = fake_installer(dir.path(), "InstallAssistant.icns");
        let volume = dir.path().join("volume");
        fs::create_dir_all(&volume).unwrap();

        let mut cache = IconCache::new().unwrap();
        assert!(cache.extract(&app, "Install macOS Sonoma").is_some());
        // The bundle may disappear during the install step.
        fs::remove_dir_all(&app).unwrap();

        cache.apply(&volume, "Install macOS Sonoma").unwrap();
        assert_eq!(fs::read(volume.join(".VolumeIcon.icns")).unwrap(), b"icns");
    }

    #[test]
    fn missing_icon_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("Install macOS Sonoma.app");
        fs::create_dir_all(&app).unwrap();
        let mut cache = IconCache::new().unwrap();
        assert!(cache.extract(&app, "Sonoma").is_none());
        assert!(cache.apply(dir.path(), "Sonoma").is_err());
    }

    #[test]
    fn bless_needs_core_services() {
        let dir = tempfile::tempdir().unwrap();
        assert!(bless_volume(dir.path(), "Sonoma", "14.6").is_err());
    }
}
