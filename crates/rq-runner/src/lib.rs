//! Side-by-side benchmarking of library versions in isolated sandboxes.
//!
//! Each (tool, version) pair gets its own reusable python environment under the
//! sandbox root. A run provisions up to two such environments in sequence and
//! invokes the benchmark runner inside each one.

pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod index;
pub mod installer;
pub mod sandbox;
pub mod settings;
pub mod toolchain;

mod fsutil;

pub use config::{read_config_file, BenchmarkConfig, ConfigValues, ToolConfiguration};
pub use coordinator::{plan, PlannedSlot, RunCoordinator, RunSummary, SlotOutcome};
pub use dispatch::{BenchmarkDispatcher, RunContext, RunStatus};
pub use error::{BenchError, Severity};
pub use identity::{resolve, SandboxIdentity, Tool};
pub use index::{PypiIndex, VersionIndex};
pub use installer::{DependencyInstaller, InstallReport};
pub use sandbox::{
    ActivationSlot, ActiveEnvironment, Provenance, SandboxEntry, SandboxProvisioner, SandboxRoot,
};
pub use settings::{load_settings, HarnessSettings};
pub use toolchain::{PythonToolchain, Requirement, Toolchain};

fn open_root(settings: &HarnessSettings) -> Result<SandboxRoot, BenchError> {
    SandboxRoot::open(&settings.sandbox_root).map_err(|e| BenchError::SandboxUnavailable {
        name: settings.sandbox_root.display().to_string(),
        reason: e.to_string(),
    })
}

/// Runs `config` with the python toolchain and the configured package index.
pub fn run_benchmarks(
    settings: &HarnessSettings,
    config: &BenchmarkConfig,
) -> Result<RunSummary, BenchError> {
    let root = open_root(settings)?;
    let toolchain = PythonToolchain::from_settings(settings);
    let index = PypiIndex::from_settings(settings);
    let coordinator = RunCoordinator::new(&root, &toolchain, &index, settings);
    coordinator.run(&config.primary, config.secondary.as_ref())
}

pub fn describe_benchmarks(
    settings: &HarnessSettings,
    config: &BenchmarkConfig,
) -> Result<Vec<PlannedSlot>, BenchError> {
    let root = open_root(settings)?;
    Ok(plan(&root, &config.primary, config.secondary.as_ref()))
}

pub fn list_sandboxes(settings: &HarnessSettings) -> anyhow::Result<Vec<SandboxEntry>> {
    let root = SandboxRoot::open(&settings.sandbox_root)?;
    root.list()
}

pub fn available_versions(
    settings: &HarnessSettings,
    package: &str,
    limit: Option<usize>,
) -> anyhow::Result<Vec<String>> {
    PypiIndex::from_settings(settings)
        .available_versions(package, limit.unwrap_or(settings.version_limit))
}
