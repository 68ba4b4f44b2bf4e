use crate::error::BenchError;
use crate::identity::{resolve, SandboxIdentity, Tool};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const DEFAULT_BACKEND: &str = "FakeWashingtonV2";
pub const DEFAULT_NUM_RUNS: u32 = 1;

pub const KEY_COMPILER1: &str = "COMPILER1";
pub const KEY_VERSION1: &str = "VERSION1";
pub const KEY_OPT1: &str = "OPT1";
pub const KEY_BACKEND: &str = "BACKEND";
pub const KEY_NUM_RUNS: &str = "NUM_RUNS";
pub const KEY_COMPILER2: &str = "COMPILER2";
pub const KEY_VERSION2: &str = "VERSION2";
pub const KEY_OPT2: &str = "OPT2";

/// One benchmark target. `optimization_level` and `backend_target` are passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolConfiguration {
    pub tool_name: String,
    pub version: String,
    pub optimization_level: String,
    pub backend_target: String,
    pub run_count: u32,
}

impl ToolConfiguration {
    pub fn tool(&self) -> Tool {
        Tool::from_name(&self.tool_name)
    }

    pub fn is_empty(&self) -> bool {
        self.tool_name.trim().is_empty()
    }

    pub fn identity(&self) -> SandboxIdentity {
        resolve(&self.tool_name, &self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BenchmarkConfig {
    pub primary: ToolConfiguration,
    pub secondary: Option<ToolConfiguration>,
}

/// Raw key/value pairs as produced by the configuration step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigValues {
    values: BTreeMap<String, String>,
}

impl ConfigValues {
    pub fn parse(text: &str) -> Result<Self, BenchError> {
        let mut values = BTreeMap::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                BenchError::ConfigurationUnavailable(format!(
                    "line {}: expected KEY=VALUE, found '{}'",
                    idx + 1,
                    line
                ))
            })?;
            values.insert(key.trim().to_string(), unquote(value.trim()).to_string());
        }
        Ok(Self { values })
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Empty values count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn merge(&mut self, overrides: ConfigValues) {
        self.values.extend(overrides.values);
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

pub fn read_config_file(path: &Path) -> Result<ConfigValues, BenchError> {
    let text = fs::read_to_string(path).map_err(|e| {
        BenchError::ConfigurationUnavailable(format!(
            "failed to read {}: {}",
            path.display(),
            e
        ))
    })?;
    ConfigValues::parse(&text)
}

impl BenchmarkConfig {
    pub fn from_values(values: &ConfigValues) -> Result<Self, BenchError> {
        let backend = values.get(KEY_BACKEND).unwrap_or(DEFAULT_BACKEND).to_string();
        let run_count = match values.get(KEY_NUM_RUNS) {
            Some(raw) => parse_run_count(raw)?,
            None => DEFAULT_NUM_RUNS,
        };

        let tool1 = require(values, KEY_COMPILER1)?;
        let version1 = require(values, KEY_VERSION1)?;
        validate_component(KEY_COMPILER1, tool1)?;
        validate_component(KEY_VERSION1, version1)?;
        let opt1 = require(values, KEY_OPT1)?.to_string();
        let primary = ToolConfiguration {
            tool_name: tool1.to_string(),
            version: version1.to_string(),
            optimization_level: opt1.clone(),
            backend_target: backend.clone(),
            run_count,
        };

        let secondary = match values.get(KEY_COMPILER2) {
            None => None,
            Some(tool2) => {
                let version2 = values.get(KEY_VERSION2).ok_or_else(|| {
                    BenchError::ConfigurationUnavailable(format!(
                        "{} is set to '{}' but {} is empty",
                        KEY_COMPILER2, tool2, KEY_VERSION2
                    ))
                })?;
                validate_component(KEY_COMPILER2, tool2)?;
                validate_component(KEY_VERSION2, version2)?;
                Some(ToolConfiguration {
                    tool_name: tool2.to_string(),
                    version: version2.to_string(),
                    optimization_level: values.get(KEY_OPT2).map(str::to_string).unwrap_or(opt1),
                    backend_target: backend,
                    run_count,
                })
            }
        };

        Ok(Self { primary, secondary })
    }
}

fn require<'a>(values: &'a ConfigValues, key: &str) -> Result<&'a str, BenchError> {
    values
        .get(key)
        .ok_or_else(|| BenchError::ConfigurationUnavailable(format!("missing {}", key)))
}

fn parse_run_count(raw: &str) -> Result<u32, BenchError> {
    match raw.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(BenchError::ConfigurationUnavailable(format!(
            "{} must be a positive integer (found: {})",
            KEY_NUM_RUNS, raw
        ))),
    }
}

// Tool names and versions become directory names under the sandbox root.
fn validate_component(key: &str, value: &str) -> Result<(), BenchError> {
    if value == "." || value == ".." || value.contains('/') || value.contains('\\') {
        return Err(BenchError::ConfigurationUnavailable(format!(
            "{} must not be a path (found: {})",
            key, value
        )));
    }
    Ok(())
}
