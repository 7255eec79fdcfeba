use anyhow::{anyhow, Context, Result};
use multiboot_sizing::{normalize, SizingConfig, FALLBACK_BUFFER_GB};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowMode {
    Create,
    Update,
}

/// Settings persisted between runs in `prefs.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub default_buffer_gb: f64,
    /// Keyed by version key, see [`multiboot_sizing::normalize`].
    pub buffer_overrides: BTreeMap<String, f64>,
    pub last_mode: Option<WorkflowMode>,
    pub report_base: Option<PathBuf>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            default_buffer_gb: FALLBACK_BUFFER_GB,
            buffer_overrides: BTreeMap::new(),
            last_mode: None,
            report_base: None,
        }
    }
}

pub fn default_preferences_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("multiboot").join("prefs.json"))
}

impl Preferences {
    /// Missing file means defaults. An unreadable or malformed file is
    /// logged and also yields defaults.
    pub fn load(path: &Path) -> Self {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot read preferences, using defaults");
                return Self::default();
            }
        };
        match serde_json::from_str(&data) {
            Ok(prefs) => prefs,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "invalid preferences, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn set_default_buffer(&mut self, buffer_gb: f64) -> Result<()> {
        self.default_buffer_gb = validate_buffer(buffer_gb)?;
        Ok(())
    }

    /// Stores an override under the version key of `version`, so `14.6.1`
    /// and `14` share one entry. Returns the key used.
    pub fn set_override(&mut self, version: &str, buffer_gb: f64) -> Result<String> {
        let key = normalize(version).as_str().to_string();
        self.buffer_overrides.insert(key.clone(), validate_buffer(buffer_gb)?);
        Ok(key)
    }

    pub fn clear_override(&mut self, version: &str) -> Option<f64> {
        self.buffer_overrides.remove(normalize(version).as_str())
    }

    pub fn sizing_config(&self) -> SizingConfig {
        SizingConfig {
            per_installer_buffer_overrides: self.buffer_overrides.clone(),
            global_default_buffer_gb: self.default_buffer_gb,
        }
    }
}

fn validate_buffer(buffer_gb: f64) -> Result<f64> {
    if buffer_gb.is_finite() && buffer_gb >= 0.0 {
        Ok(buffer_gb)
    } else {
        Err(anyhow!("buffer must be a non-negative number of GB, got {}", buffer_gb))
    }
}
