use anyhow::{Context, Result};
use multiboot_core::{now_utc_rfc3339, DriveStructure, HostInfo};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const REPORT_SCHEMA_VERSION: &str = "1";

/// Per-run directory, created before any device operation so backups can
/// be written into it.
#[derive(Debug, Clone, Serialize)]
pub struct ReportBundle {
    pub run_id: String,
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportPaths {
    pub run_id: String,
    pub root: PathBuf,
    pub run_json: PathBuf,
    pub logs_path: PathBuf,
    pub drive_structure_json: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct RunMetadata<'a> {
    run_id: &'a str,
    created_at_utc: String,
    report_schema_version: &'static str,
    host: Option<&'a HostInfo>,
    meta: Option<Value>,
}

impl ReportBundle {
    pub fn create(base: impl AsRef<Path>) -> Result<Self> {
        let run_id = Uuid::new_v4().to_string();
        let root = base.as_ref().join("reports").join(&run_id);
        std::fs::create_dir_all(&root).with_context(|| format!("create {}", root.display()))?;
        Ok(Self { run_id, root })
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Writes `run.json`, `logs.txt` and, when given, the final
    /// `drive_structure.json`.
    pub fn finish(
        &self,
        host: Option<&HostInfo>,
        structure: Option<&DriveStructure>,
        meta: Option<Value>,
        logs: &[String],
    ) -> Result<ReportPaths> {
        let run_json = self.root.join("run.json");
        let logs_path = self.root.join("logs.txt");

        let run_meta = RunMetadata {
            run_id: &self.run_id,
            created_at_utc: now_utc_rfc3339(),
            report_schema_version: REPORT_SCHEMA_VERSION,
            host,
            meta,
        };
        std::fs::write(&run_json, serde_json::to_string_pretty(&run_meta)?)
            .with_context(|| format!("write {}", run_json.display()))?;

        let mut log_data = logs.join("\n");
        if !log_data.is_empty() {
            log_data.push('\n');
        }
        std::fs::write(&logs_path, log_data).with_context(|| format!("write {}", logs_path.display()))?;

        let drive_structure_json = match structure {
            Some(structure) => {
                let path = self.root.join("drive_structure.json");
                std::fs::write(&path, serde_json::to_string_pretty(structure)?)
                    .with_context(|| format!("write {}", path.display()))?;
                Some(path)
            }
            None => None,
        };

        Ok(ReportPaths {
            run_id: self.run_id.clone(),
            root: self.root.clone(),
            run_json,
            logs_path,
            drive_structure_json,
        })
    }
}

/// One-shot bundle for runs that have nothing to back up.
pub fn create_report_bundle(
    base: impl AsRef<Path>,
    structure: Option<&DriveStructure>,
    meta: Option<Value>,
    logs: &[String],
) -> Result<ReportPaths> {
    ReportBundle::create(base)?.finish(None, structure, meta, logs)
}
