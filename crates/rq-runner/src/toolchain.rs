use crate::dispatch::RunStatus;
use crate::sandbox::ActiveEnvironment;
use crate::settings::HarnessSettings;
use anyhow::{anyhow, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Requirement {
    pub package: String,
    pub pin: Option<String>,
}

impl Requirement {
    pub fn latest(package: &str) -> Self {
        Self {
            package: package.to_string(),
            pin: None,
        }
    }

    pub fn pinned(package: &str, version: &str) -> Self {
        Self {
            package: package.to_string(),
            pin: Some(version.to_string()),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pin {
            Some(v) => write!(f, "{}=={}", self.package, v),
            None => f.write_str(&self.package),
        }
    }
}

/// External programs the orchestration core drives. Every call blocks until the program exits.
/// Child stdout is forwarded to our stderr; stdout is reserved for command output.
pub trait Toolchain {
    fn create_environment(&self, path: &Path) -> Result<()>;

    fn install(&self, env: &ActiveEnvironment<'_>, requirement: &Requirement) -> Result<()>;

    fn run_benchmark(&self, env: &ActiveEnvironment<'_>, args: &[String]) -> Result<RunStatus>;
}

/// `python -m venv` sandboxes, pip installs and a python benchmark runner script.
#[derive(Debug, Clone)]
pub struct PythonToolchain {
    python: String,
    runner_script: PathBuf,
    working_dir: Option<PathBuf>,
}

impl PythonToolchain {
    pub fn new(python: &str, runner_script: &Path, working_dir: Option<&Path>) -> Self {
        Self {
            python: python.to_string(),
            runner_script: runner_script.to_path_buf(),
            working_dir: working_dir.map(Path::to_path_buf),
        }
    }

    pub fn from_settings(settings: &HarnessSettings) -> Self {
        Self::new(
            &settings.python,
            &settings.runner_script,
            settings.working_dir.as_deref(),
        )
    }
}

impl Toolchain for PythonToolchain {
    fn create_environment(&self, path: &Path) -> Result<()> {
        let status = Command::new(&self.python)
            .arg("-m")
            .arg("venv")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(std::io::stderr()))
            .status()
            .map_err(|e| anyhow!("failed to spawn {} -m venv: {}", self.python, e))?;
        if !status.success() {
            return Err(anyhow!(
                "{} -m venv {} exited with {}",
                self.python,
                path.display(),
                RunStatus::from_exit_status(status)
            ));
        }
        Ok(())
    }

    fn install(&self, env: &ActiveEnvironment<'_>, requirement: &Requirement) -> Result<()> {
        let mut cmd = Command::new(env.python());
        cmd.args(["-m", "pip", "install", "--disable-pip-version-check"])
            .arg(requirement.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(std::io::stderr()));
        env.apply(&mut cmd);
        let status = cmd
            .status()
            .map_err(|e| anyhow!("failed to spawn pip for {}: {}", requirement, e))?;
        if !status.success() {
            return Err(anyhow!(
                "pip install {} exited with {}",
                requirement,
                RunStatus::from_exit_status(status)
            ));
        }
        Ok(())
    }

    fn run_benchmark(&self, env: &ActiveEnvironment<'_>, args: &[String]) -> Result<RunStatus> {
        let mut cmd = Command::new(env.python());
        cmd.arg(&self.runner_script)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(std::io::stderr()));
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        env.apply(&mut cmd);
        let status = cmd.status().map_err(|e| {
            anyhow!(
                "failed to spawn benchmark runner {}: {}",
                self.runner_script.display(),
                e
            )
        })?;
        Ok(RunStatus::from_exit_status(status))
    }
}
