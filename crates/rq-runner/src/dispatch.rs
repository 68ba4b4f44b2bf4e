use crate::config::ToolConfiguration;
use crate::identity::SandboxIdentity;
use crate::sandbox::ActiveEnvironment;
use crate::toolchain::Toolchain;
use serde::Serialize;
use std::fmt;
use std::process::ExitStatus;
use tracing::{error, info};

/// Exit status used when the runner could not be started at all.
pub const SPAWN_FAILED_CODE: i32 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RunStatus {
    Exited(i32),
    Signaled(i32),
    SpawnFailed,
}

impl RunStatus {
    pub fn from_exit_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return RunStatus::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = status.signal() {
                return RunStatus::Signaled(sig);
            }
        }
        RunStatus::Exited(1)
    }

    pub fn success(&self) -> bool {
        matches!(self, RunStatus::Exited(0))
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Exited(code) => *code,
            RunStatus::Signaled(sig) => 128 + sig,
            RunStatus::SpawnFailed => SPAWN_FAILED_CODE,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Exited(code) => write!(f, "exit code {}", code),
            RunStatus::Signaled(sig) => write!(f, "signal {}", sig),
            RunStatus::SpawnFailed => f.write_str("spawn failure"),
        }
    }
}

/// Everything one dispatch needs. Lives only for the duration of that dispatch.
#[derive(Debug, Clone)]
pub struct RunContext<'a> {
    pub identity: SandboxIdentity,
    pub config: &'a ToolConfiguration,
    pub is_comparison_run: bool,
}

impl<'a> RunContext<'a> {
    pub fn new(config: &'a ToolConfiguration, is_comparison_run: bool) -> Self {
        Self {
            identity: config.identity(),
            config,
            is_comparison_run,
        }
    }

    /// Positional arguments in the runner's fixed order:
    /// tool, version, optimization level, backend, run count, comparison flag.
    pub fn runner_args(&self) -> Vec<String> {
        vec![
            self.config.tool_name.clone(),
            self.config.version.clone(),
            self.config.optimization_level.clone(),
            self.config.backend_target.clone(),
            self.config.run_count.to_string(),
            self.is_comparison_run.to_string(),
        ]
    }
}

pub struct BenchmarkDispatcher<'a, T: Toolchain + ?Sized> {
    toolchain: &'a T,
}

impl<'a, T: Toolchain + ?Sized> BenchmarkDispatcher<'a, T> {
    pub fn new(toolchain: &'a T) -> Self {
        Self { toolchain }
    }

    /// Runs the benchmark inside `env` and returns the runner's status unchanged.
    pub fn dispatch(&self, env: &ActiveEnvironment<'_>, ctx: &RunContext<'_>) -> RunStatus {
        let args = ctx.runner_args();
        info!(
            sandbox = %env.identity(),
            tool = %ctx.config.tool_name,
            version = %ctx.config.version,
            comparison = ctx.is_comparison_run,
            "starting benchmark runner"
        );
        match self.toolchain.run_benchmark(env, &args) {
            Ok(status) => status,
            Err(e) => {
                error!(sandbox = %env.identity(), error = %e, "benchmark runner did not start");
                RunStatus::SpawnFailed
            }
        }
    }
}
