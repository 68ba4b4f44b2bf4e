use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SETTINGS_FILE: &str = "rq.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessSettings {
    pub sandbox_root: PathBuf,
    pub python: String,
    pub runner_script: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub baseline_packages: Vec<String>,
    pub package_index_url: String,
    pub version_limit: usize,
    pub index_timeout_secs: u64,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            sandbox_root: PathBuf::from("virtual_environments"),
            python: "python3".to_string(),
            runner_script: PathBuf::from("red_queen/runner.py"),
            working_dir: None,
            baseline_packages: vec!["numpy".to_string(), "memory_profiler".to_string()],
            package_index_url: "https://pypi.org/pypi".to_string(),
            version_limit: 4,
            index_timeout_secs: 10,
        }
    }
}

/// Explicit path wins; otherwise `rq.yaml` in the current directory; otherwise defaults.
pub fn load_settings(path: Option<&Path>) -> Result<HarnessSettings> {
    match path {
        Some(p) => read_settings_file(p),
        None => {
            let fallback = Path::new(DEFAULT_SETTINGS_FILE);
            if fallback.exists() {
                read_settings_file(fallback)
            } else {
                Ok(HarnessSettings::default())
            }
        }
    }
}

fn read_settings_file(path: &Path) -> Result<HarnessSettings> {
    let text = fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read settings {}: {}", path.display(), e))?;
    parse_settings(&text).map_err(|e| anyhow!("invalid settings {}: {}", path.display(), e))
}

pub fn parse_settings(text: &str) -> Result<HarnessSettings> {
    if text.trim().is_empty() {
        return Ok(HarnessSettings::default());
    }
    let settings: HarnessSettings = serde_yaml::from_str(text)?;
    if settings.python.trim().is_empty() {
        return Err(anyhow!("python must not be empty"));
    }
    if settings.version_limit == 0 {
        return Err(anyhow!("version_limit must be at least 1"));
    }
    Ok(settings)
}
