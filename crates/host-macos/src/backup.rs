use crate::diskutil::Diskutil;
use anyhow::{Context, Result};
use multiboot_core::now_utc_compact;
use std::fs;
use std::path::{Path, PathBuf};

pub fn backup_file_name(disk_id: &str, stamp: &str) -> String {
    format!("partition_table_{}_{}.txt", disk_id, stamp)
}

/// Saves `diskutil list <disk>` under `dir` before anything destructive
/// runs, so a damaged table can at least be reconstructed by hand.
pub fn backup_partition_table(diskutil: &Diskutil, disk_id: &str, dir: &Path) -> Result<PathBuf> {
    let listing = diskutil
        .list_text(disk_id)
        .with_context(|| format!("list {} for backup", disk_id))?;
    write_backup(dir, disk_id, &listing)
}

fn write_backup(dir: &Path, disk_id: &str, listing: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(backup_file_name(disk_id, &now_utc_compact()));
    fs::write(&path, listing).with_context(|| format!("write {}", path.display()))?;
    tracing::info!(path = %path.display(), "partition table backed up");
    Ok(path)
}
