use crate::command::tool_available;
use crate::mist::MIST_TOOL;
use anyhow::{anyhow, Result};

pub fn is_root() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Partitioning and `createinstallmedia` both need an effective uid of 0.
pub fn require_root() -> Result<()> {
    if is_root() {
        Ok(())
    } else {
        Err(anyhow!("root privileges required, re-run with sudo"))
    }
}

/// Which external tools are present. Only `diskutil` is mandatory; the
/// branding tools are skipped with a warning when missing, and without
/// `mist` installers cannot be downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyReport {
    pub diskutil: bool,
    pub bless: bool,
    pub set_file: bool,
    pub mist: bool,
}

impl DependencyReport {
    pub fn ensure_required(&self) -> Result<()> {
        if self.diskutil {
            Ok(())
        } else {
            Err(anyhow!("diskutil not found, this tool only runs on macOS"))
        }
    }

    pub fn missing_optional(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.bless {
            missing.push("bless");
        }
        if !self.set_file {
            missing.push("SetFile");
        }
        if !self.mist {
            missing.push("mist");
        }
        missing
    }
}

pub fn check_dependencies() -> DependencyReport {
    DependencyReport {
        diskutil: tool_available("/usr/sbin/diskutil") || tool_available("diskutil"),
        bless: tool_available("/usr/sbin/bless") || tool_available("bless"),
        set_file: tool_available("SetFile"),
        mist: tool_available(MIST_TOOL),
    }
}
