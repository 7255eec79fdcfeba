use multiboot_core::{InstallerDescriptor, DATA_VOLUME_NAME};
use multiboot_sizing::resolve_os_name;

/// Longest volume name the layout emits. Update mode recognises installer
/// partitions by this convention, so the format must not drift.
pub const VOLUME_NAME_MAX_LEN: usize = 27;
pub const INSTALL_PREFIX: &str = "INSTALL_";

pub fn sanitize_version(version: &str) -> String {
    match version.split_whitespace().next() {
        Some(token) => token.replace('.', "_"),
        None => "Unknown".to_string(),
    }
}

/// `INSTALL_<OsName>_<Version>` truncated to [`VOLUME_NAME_MAX_LEN`].
pub fn installer_volume_name(installer: &InstallerDescriptor) -> String {
    let os_name = resolve_os_name(&installer.version, Some(&installer.name));
    let full = format!(
        "{}{}_{}",
        INSTALL_PREFIX,
        os_name,
        sanitize_version(&installer.version)
    );
    full.chars().take(VOLUME_NAME_MAX_LEN).collect()
}

pub fn is_data_volume(volume_name: &str) -> bool {
    volume_name == DATA_VOLUME_NAME
}

pub fn is_installer_volume(volume_name: &str) -> bool {
    volume_name.contains("Install macOS")
        || volume_name.contains(INSTALL_PREFIX)
        || volume_name.contains("macOS")
}

/// Strips the prefixes written by this tool and by `createinstallmedia`:
/// `INSTALL_Sonoma_14_6_1` becomes `Sonoma_14_6_1`, `Install macOS Sonoma`
/// becomes `Sonoma`.
pub fn clean_volume_name(volume_name: &str) -> String {
    volume_name
        .replace("Install macOS ", "")
        .replace(INSTALL_PREFIX, "")
        .replace("macOS ", "")
}

/// Version recorded in a cleaned installer volume name, if the trailing
/// components survived truncation.
pub fn volume_version(clean_name: &str) -> Option<String> {
    let mut numeric: Vec<&str> = clean_name
        .rsplit('_')
        .take_while(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
        .collect();
    if numeric.is_empty() {
        return None;
    }
    numeric.reverse();
    Some(numeric.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_name_convention() {
        let installer = InstallerDescriptor::new("Install macOS Sonoma.app", "14.6.1", 0);
        assert_eq!(installer_volume_name(&installer), "INSTALL_Sonoma_14_6_1");

        let beta = InstallerDescriptor::new("Install macOS Sequoia beta.app", "15.0 Beta 2", 0);
        assert_eq!(installer_volume_name(&beta), "INSTALL_Sequoia_15_0");
    }

    #[test]
    fn volume_name_is_truncated() {
        let installer = InstallerDescriptor::new("Install macOS High Sierra.app", "10.13.6.1234567890", 0);
        let name = installer_volume_name(&installer);
        assert_eq!(name.chars().count(), VOLUME_NAME_MAX_LEN);
        assert!(name.starts_with("INSTALL_High Sierra_10_13_6"));
    }

    #[test]
    fn empty_version_is_marked_unknown() {
        let installer = InstallerDescriptor::new("Mystery.app", "", 0);
        assert_eq!(installer_volume_name(&installer), "INSTALL_Big Sur_Unknown");
    }

    #[test]
    fn classification() {
        assert!(is_data_volume("DATA_STORE"));
        assert!(!is_data_volume("DATA_STORE 1"));
        assert!(is_installer_volume("Install macOS Sonoma"));
        assert!(is_installer_volume("INSTALL_Ventura_13_6"));
        assert!(!is_installer_volume("EFI"));
    }

    #[test]
    fn cleaning_and_version_recovery() {
        assert_eq!(clean_volume_name("Install macOS Sonoma"), "Sonoma");
        assert_eq!(clean_volume_name("INSTALL_Sonoma_14_6_1"), "Sonoma_14_6_1");
        assert_eq!(volume_version("Sonoma_14_6_1").as_deref(), Some("14.6.1"));
        assert_eq!(volume_version("High Sierra_10_13_6").as_deref(), Some("10.13.6"));
        assert_eq!(volume_version("Sonoma"), None);
    }
}
