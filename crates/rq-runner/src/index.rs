use crate::settings::HarnessSettings;
use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const PIP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Best-effort lookup of published versions for a package.
pub trait VersionIndex {
    /// Newest stable versions first, at most `limit` entries.
    fn available_versions(&self, package: &str, limit: usize) -> Result<Vec<String>>;
}

#[derive(Debug, Deserialize)]
struct ProjectDocument {
    releases: BTreeMap<String, Value>,
}

/// Index JSON API first, then `pip index versions`, then a built-in table.
#[derive(Debug, Clone)]
pub struct PypiIndex {
    base_url: String,
    timeout: Duration,
    pip_python: Option<String>,
}

impl PypiIndex {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            pip_python: None,
        }
    }

    pub fn with_pip_fallback(mut self, python: &str) -> Self {
        self.pip_python = Some(python.to_string());
        self
    }

    pub fn from_settings(settings: &HarnessSettings) -> Self {
        Self::new(
            &settings.package_index_url,
            Duration::from_secs(settings.index_timeout_secs),
        )
        .with_pip_fallback(&settings.python)
    }

    fn query_json(&self, package: &str) -> Result<Vec<String>> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()?;
        let url = format!("{}/{}/json", self.base_url, package);
        let doc: ProjectDocument = client.get(&url).send()?.error_for_status()?.json()?;
        Ok(doc.releases.into_keys().collect())
    }

    /// Runs `pip index versions`, killing it once `self.timeout` has passed.
    fn query_pip(&self, python: &str, package: &str) -> Result<Vec<String>> {
        let mut child = Command::new(python)
            .args(["-m", "pip", "index", "versions", package])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("pip stdout was not captured"))?;
        let reader = thread::spawn(move || {
            let mut buf = String::new();
            let _ = stdout.read_to_string(&mut buf);
            buf
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(anyhow!(
                    "pip index versions {} timed out after {:?}",
                    package,
                    self.timeout
                ));
            }
            thread::sleep(PIP_POLL_INTERVAL);
        };
        let stdout = reader
            .join()
            .map_err(|_| anyhow!("pip output reader panicked"))?;
        if !status.success() {
            return Err(anyhow!("pip index versions {} failed", package));
        }
        Ok(parse_pip_index_output(&stdout))
    }
}

impl VersionIndex for PypiIndex {
    fn available_versions(&self, package: &str, limit: usize) -> Result<Vec<String>> {
        match self.query_json(package) {
            Ok(all) => {
                let stable = stable_newest_first(all, limit);
                if !stable.is_empty() {
                    return Ok(stable);
                }
            }
            Err(e) => debug!(package, error = %e, "index query failed"),
        }
        if let Some(python) = &self.pip_python {
            match self.query_pip(python, package) {
                Ok(all) => {
                    let stable = stable_newest_first(all, limit);
                    if !stable.is_empty() {
                        return Ok(stable);
                    }
                }
                Err(e) => debug!(package, error = %e, "pip index query failed"),
            }
        }
        let known: Vec<String> = known_versions(package)
            .iter()
            .take(limit)
            .map(|v| v.to_string())
            .collect();
        if known.is_empty() {
            return Err(anyhow!("no version information available for {}", package));
        }
        Ok(known)
    }
}

fn known_versions(package: &str) -> &'static [&'static str] {
    match package {
        "qiskit" => &["1.0", "0.45.0", "0.44.0", "0.43.0"],
        "pytket" => &["2.7.0", "2.6.0", "2.5.0", "2.4.1"],
        _ => &[],
    }
}

fn parse_pip_index_output(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .find_map(|line| line.split_once("Available versions:"))
        .map(|(_, rest)| {
            rest.split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

pub fn is_prerelease(version: &str) -> bool {
    let lower = version.to_ascii_lowercase();
    if ["rc", "alpha", "beta", "dev"].iter().any(|m| lower.contains(m)) {
        return true;
    }
    // PEP 440 short forms such as 1.0a1 or 2.0b3.
    let bytes = lower.as_bytes();
    bytes.windows(3).any(|w| {
        w[0].is_ascii_digit() && (w[1] == b'a' || w[1] == b'b') && w[2].is_ascii_digit()
    })
}

fn numeric_parts(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().unwrap_or(0)
        })
        .collect()
}

fn compare_versions(a: &str, b: &str) -> Ordering {
    numeric_parts(a)
        .cmp(&numeric_parts(b))
        .then_with(|| a.cmp(b))
}

pub fn stable_newest_first(versions: Vec<String>, limit: usize) -> Vec<String> {
    let mut stable: Vec<String> = versions.into_iter().filter(|v| !is_prerelease(v)).collect();
    stable.sort_by(|a, b| compare_versions(b, a));
    stable.dedup();
    stable.truncate(limit);
    stable
}
