use anyhow::Result;
#[cfg(not(target_os = "macos"))]
use anyhow::anyhow;

const SYSTEM_MOUNT_POINTS: [&str; 4] = ["/", "/System", "/Library", "/private"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: String,
    pub fs_type: String,
}

pub fn is_system_mount_point(mount_point: &str) -> bool {
    SYSTEM_MOUNT_POINTS.contains(&mount_point)
        || mount_point.starts_with("/System/Volumes/")
}

/// `disk4s2` -> `disk4`. Anything that is not a BSD disk name is returned
/// unchanged.
pub fn whole_disk_id(device_name: &str) -> &str {
    let Some(rest) = device_name.strip_prefix("disk") else {
        return device_name;
    };
    match rest.find('s') {
        Some(idx) => &device_name[..4 + idx],
        None => device_name,
    }
}

/// Mount points on `disk_id` that belong to the running system.
pub fn system_mounts_on(disk_id: &str) -> Result<Vec<String>> {
    Ok(system_mounts_in(&read_mounts()?, disk_id))
}

fn system_mounts_in(mounts: &[MountEntry], disk_id: &str) -> Vec<String> {
    mounts
        .iter()
        .filter(|mount| {
            mount
                .device
                .strip_prefix("/dev/")
                .map(|device| whole_disk_id(device) == disk_id)
                .unwrap_or(false)
        })
        .filter(|mount| is_system_mount_point(&mount.mount_point))
        .map(|mount| mount.mount_point.clone())
        .collect()
}

#[cfg(target_os = "macos")]
pub fn read_mounts() -> Result<Vec<MountEntry>> {
    use anyhow::anyhow;
    use libc::{getfsstat, statfs, MNT_NOWAIT};
    use std::ffi::CStr;
    use std::mem::size_of;
    use std::ptr;

    let count = unsafe { getfsstat(ptr::null_mut(), 0, MNT_NOWAIT) };
    if count < 0 {
        return Err(anyhow!("getfsstat failed"));
    }
    let mut buf = vec![unsafe { std::mem::zeroed::<statfs>() }; count as usize];
    let res = unsafe {
        getfsstat(
            buf.as_mut_ptr(),
            (buf.len() * size_of::<statfs>()) as i32,
            MNT_NOWAIT,
        )
    };
    if res < 0 {
        return Err(anyhow!("getfsstat returned error"));
    }

    let entries = buf
        .iter()
        .take(res as usize)
        .map(|entry| MountEntry {
            device: unsafe { CStr::from_ptr(entry.f_mntfromname.as_ptr()) }
                .to_string_lossy()
                .to_string(),
            mount_point: unsafe { CStr::from_ptr(entry.f_mntonname.as_ptr()) }
                .to_string_lossy()
                .to_string(),
            fs_type: unsafe { CStr::from_ptr(entry.f_fstypename.as_ptr()) }
                .to_string_lossy()
                .to_string(),
        })
        .collect();
    Ok(entries)
}

#[cfg(not(target_os = "macos"))]
pub fn read_mounts() -> Result<Vec<MountEntry>> {
    Err(anyhow!("mount table inspection requires macOS"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount(device: &str, mount_point: &str) -> MountEntry {
        MountEntry {
            device: device.to_string(),
            mount_point: mount_point.to_string(),
            fs_type: "apfs".to_string(),
        }
    }

    #[test]
    fn whole_disk_from_slice() {
        assert_eq!(whole_disk_id("disk4s2"), "disk4");
        assert_eq!(whole_disk_id("disk12s10"), "disk12");
        assert_eq!(whole_disk_id("disk4"), "disk4");
        assert_eq!(whole_disk_id("map auto_home"), "map auto_home");
    }

    #[test]
    fn finds_system_mounts_on_disk() {
        let mounts = vec![
            mount("/dev/disk3s1s1", "/"),
            mount("/dev/disk3s5", "/System/Volumes/Data"),
            mount("/dev/disk4s2", "/Volumes/INSTALL_Sonoma_14_6_1"),
            mount("map auto_home", "/System/Volumes/Data/home"),
        ];
        assert_eq!(system_mounts_in(&mounts, "disk3"), vec!["/", "/System/Volumes/Data"]);
        assert!(system_mounts_in(&mounts, "disk4").is_empty());
    }
}
