use crate::DeviceOperationError;
use std::path::Path;
use std::process::{Command, Output};

/// Runs a tool to completion and returns its stdout.
///
/// A non-zero exit becomes a [`DeviceOperationError`] carrying stderr, or
/// stdout when stderr is empty (`diskutil` reports some failures there).
pub fn run_cmd(cmd: &str, args: &[&str]) -> Result<String, DeviceOperationError> {
    let operation = describe(cmd, args);
    tracing::debug!(%operation, "running");
    let output = Command::new(cmd)
        .args(args)
        .output()
        .map_err(|err| DeviceOperationError::new(&operation, err.to_string()))?;
    check_output(operation, output)
}

fn check_output(operation: String, output: Output) -> Result<String, DeviceOperationError> {
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if output.status.success() {
        return Ok(stdout);
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let diagnostic = if stderr.is_empty() {
        format!("exit {:?}: {}", output.status.code(), stdout.trim())
    } else {
        stderr
    };
    Err(DeviceOperationError::new(operation, diagnostic))
}

/// Same as [`run_cmd`] but keeps stdout as raw bytes, for plist output.
pub fn run_cmd_bytes(cmd: &str, args: &[&str]) -> Result<Vec<u8>, DeviceOperationError> {
    let operation = describe(cmd, args);
    let output = Command::new(cmd)
        .args(args)
        .output()
        .map_err(|err| DeviceOperationError::new(&operation, err.to_string()))?;
    if output.status.success() {
        Ok(output.stdout)
    } else {
        Err(DeviceOperationError::new(
            operation,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

/// True when `name` resolves to an executable on `PATH` (or is an existing
/// absolute path).
pub fn tool_available(name: &str) -> bool {
    let candidate = Path::new(name);
    if candidate.is_absolute() {
        return candidate.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(name).is_file()))
        .unwrap_or(false)
}

fn describe(cmd: &str, args: &[&str]) -> String {
    let tool = Path::new(cmd)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(cmd);
    match args.first() {
        Some(verb) => format!("{} {}", tool, verb),
        None => tool.to_string(),
    }
}
