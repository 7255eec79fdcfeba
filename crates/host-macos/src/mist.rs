use crate::command::{run_cmd, tool_available};
use crate::DeviceOperationError;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

pub const MIST_TOOL: &str = "mist";
pub const DEFAULT_DOWNLOAD_DIR: &str = "/Applications";

pub fn mist_available() -> bool {
    tool_available(MIST_TOOL)
}

/// One row of `mist list installer --output-type json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MistInstaller {
    pub identifier: String,
    pub name: String,
    pub version: String,
    pub build: String,
    /// Bytes.
    pub size: u64,
}

/// Options go before the search term and output type, or mist rejects them.
pub fn download_args(search: &str, version: Option<&str>, output_dir: &Path) -> Vec<String> {
    let mut args = vec![
        "download".to_string(),
        "installer".to_string(),
        "--force".to_string(),
        "--output-directory".to_string(),
        output_dir.display().to_string(),
    ];
    if let Some(version) = version {
        args.push("--version".to_string());
        args.push(version.to_string());
    }
    args.push(search.to_string());
    args.push("application".to_string());
    args
}

pub fn list_args(search: &str) -> Vec<String> {
    ["list", "installer", search, "--output-type", "json", "--quiet"]
        .iter()
        .map(|arg| arg.to_string())
        .collect()
}

/// Downloads a full installer application into `output_dir`. Blocks until
/// mist exits, which usually takes tens of minutes.
pub fn download_installer(search: &str, version: Option<&str>, output_dir: &Path) -> Result<(), DeviceOperationError> {
    if !mist_available() {
        return Err(DeviceOperationError::new(
            MIST_TOOL,
            "not installed, run `brew install mist` first",
        ));
    }
    let args = download_args(search, version, output_dir);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    info!(search, version, dir = %output_dir.display(), "downloading installer with mist");
    run_cmd(MIST_TOOL, &args)?;
    Ok(())
}

pub fn parse_installer_list(json: &str) -> Result<Vec<MistInstaller>, DeviceOperationError> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(json).map_err(|err| DeviceOperationError::new("mist list installer", err.to_string()))
}

pub fn list_installers(search: &str) -> Result<Vec<MistInstaller>, DeviceOperationError> {
    let args = list_args(search);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    parse_installer_list(&run_cmd(MIST_TOOL, &args)?)
}

/// Size in bytes of the first installer matching `search`, if mist knows
/// one.
pub fn installer_size_bytes(search: &str) -> Result<Option<u64>, DeviceOperationError> {
    Ok(list_installers(search)?
        .first()
        .map(|installer| installer.size)
        .filter(|size| *size > 0))
}
