use crate::stub::validate_installer;
use anyhow::{anyhow, Context, Result};
use multiboot_core::{InstallerDescriptor, InstallerStatus};
use plist::Value;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Scratch directory Mist uses while assembling an installer.
pub const MIST_TEMP_DIR: &str = "/private/tmp/com.ninxsoft.mist";

pub fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from("/Applications"),
        PathBuf::from("/Applications/Utilities"),
    ];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join("Downloads"));
        paths.push(home.join("Desktop"));
    }
    paths
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerMetadata {
    pub version: String,
    pub bundle_id: String,
}

/// Reads `Contents/Info.plist`. A bundle whose identifier does not mention
/// `InstallAssistant` and whose name does not contain `Install` is rejected.
pub fn read_installer_metadata(app: &Path) -> Result<InstallerMetadata> {
    let info_path = app.join("Contents/Info.plist");
    let value = Value::from_file(&info_path).with_context(|| format!("read {}", info_path.display()))?;
    let dict = value
        .as_dictionary()
        .ok_or_else(|| anyhow!("{} is not a dictionary", info_path.display()))?;
    let version = dict
        .get("CFBundleShortVersionString")
        .and_then(Value::as_string)
        .unwrap_or("Unknown")
        .to_string();
    let bundle_id = dict
        .get("CFBundleIdentifier")
        .and_then(Value::as_string)
        .unwrap_or("")
        .to_string();

    let file_name = app
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    if !bundle_id.contains("InstallAssistant") && !file_name.contains("Install") {
        return Err(anyhow!("{} is not a macOS installer", app.display()));
    }
    Ok(InstallerMetadata { version, bundle_id })
}

/// Total size of regular files under `root`, in KB (rounded up). Symlinks
/// are not followed. Entries that cannot be read are skipped with a warning;
/// only an unreadable `root` is an error.
pub fn payload_size_kb(root: &Path) -> Result<u64> {
    let mut total_bytes = 0u64;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(anyhow!("read {}: {}", root.display(), err));
            }
            Err(err) => {
                warn!(root = %root.display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(meta) => total_bytes = total_bytes.saturating_add(meta.len()),
            Err(err) => warn!(path = %entry.path().display(), error = %err, "skipping unreadable file"),
        }
    }
    Ok(total_bytes.div_ceil(1024))
}

fn is_installer_bundle_name(name: &str) -> bool {
    name.ends_with(".app") && name.contains("Install")
}

/// Scans `search_paths` (non-recursively) for installer bundles, validates
/// each one and appends partial downloads. Unreadable directories and
/// bundles are skipped with a warning. Symlinked duplicates are reported
/// once.
pub fn scan_for_installers(search_paths: &[PathBuf]) -> Vec<InstallerDescriptor> {
    let mut seen = BTreeSet::new();
    let mut found = Vec::new();

    for dir in search_paths {
        for path in list_dir(dir) {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            if !is_installer_bundle_name(&name) {
                continue;
            }
            let Ok(real) = path.canonicalize() else {
                continue;
            };
            if !real.is_dir() || !seen.insert(real.clone()) {
                continue;
            }
            match describe_bundle(&real, &name) {
                Ok(installer) => found.push(validate_installer(installer)),
                Err(err) => warn!(path = %real.display(), error = %err, "skipping bundle"),
            }
        }
    }

    found.extend(scan_for_partial_downloads(search_paths));
    found
}

fn describe_bundle(app: &Path, name: &str) -> Result<InstallerDescriptor> {
    let metadata = read_installer_metadata(app)?;
    let size_kb = payload_size_kb(app).unwrap_or_else(|err| {
        warn!(path = %app.display(), error = %err, "could not size bundle");
        0
    });
    let mut installer = InstallerDescriptor::new(name, metadata.version, size_kb).with_path(app);
    installer.bundle_id = Some(metadata.bundle_id);
    debug!(installer = name, version = %installer.version, size_kb, "found installer");
    Ok(installer)
}

/// `.app.download` bundles left by the App Store, and folders inside Mist's
/// scratch directory. Both report size 0 and are never planned.
pub fn scan_for_partial_downloads(search_paths: &[PathBuf]) -> Vec<InstallerDescriptor> {
    let mut roots: Vec<PathBuf> = search_paths.to_vec();
    let mist = PathBuf::from(MIST_TEMP_DIR);
    if mist.is_dir() && !roots.contains(&mist) {
        roots.push(mist);
    }

    let mut partials = Vec::new();
    for dir in &roots {
        let is_mist = dir.to_string_lossy().contains("com.ninxsoft.mist");
        for path in list_dir(dir) {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if let Some(app_name) = name.strip_suffix(".download").filter(|n| n.ends_with(".app")) {
                partials.push(partial(app_name.to_string(), &path, "Partial", "partial.download", InstallerStatus::Partial));
            } else if is_mist && path.is_dir() {
                partials.push(partial(
                    format!("Mist Download: {}", name),
                    &path,
                    "In Progress",
                    "mist.download",
                    InstallerStatus::Downloading,
                ));
            }
        }
    }
    partials
}

fn partial(name: String, path: &Path, version: &str, bundle_id: &str, status: InstallerStatus) -> InstallerDescriptor {
    let mut installer = InstallerDescriptor::new(name, version, 0)
        .with_path(path)
        .with_status(status);
    installer.bundle_id = Some(bundle_id.to_string());
    installer
}

fn list_dir(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => {
            let mut paths: Vec<PathBuf> = entries.flatten().map(|entry| entry.path()).collect();
            paths.sort();
            paths
        }
        Err(err) => {
            if dir.exists() {
                warn!(dir = %dir.display(), error = %err, "cannot list directory");
            }
            Vec::new()
        }
    }
}
