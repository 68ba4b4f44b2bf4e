use crate::config::ToolConfiguration;
use crate::dispatch::{BenchmarkDispatcher, RunContext, RunStatus};
use crate::error::BenchError;
use crate::identity::SandboxIdentity;
use crate::index::VersionIndex;
use crate::installer::{DependencyInstaller, InstallReport};
use crate::sandbox::{ActivationSlot, Provenance, SandboxProvisioner, SandboxRoot};
use crate::settings::HarnessSettings;
use crate::toolchain::Toolchain;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, Serialize)]
pub struct SlotOutcome {
    pub sandbox: SandboxIdentity,
    pub tool: String,
    pub version: String,
    pub provenance: Provenance,
    pub is_comparison_run: bool,
    pub install: Option<InstallReport>,
    pub status: RunStatus,
}

#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub slots: Vec<SlotOutcome>,
}

impl RunSummary {
    /// First non-zero runner status in dispatch order, else 0.
    pub fn exit_code(&self) -> i32 {
        self.slots
            .iter()
            .map(|s| s.status)
            .find(|s| !s.success())
            .map(|s| s.exit_code())
            .unwrap_or(0)
    }

    pub fn failures(&self) -> Vec<BenchError> {
        self.slots
            .iter()
            .filter(|s| !s.status.success())
            .map(|s| BenchError::BenchmarkRunFailure {
                tool: s.tool.clone(),
                version: s.version.clone(),
                status: s.status,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedSlot {
    pub sandbox: SandboxIdentity,
    pub path: PathBuf,
    pub exists: bool,
    pub is_comparison_run: bool,
    pub runner_args: Vec<String>,
}

// Slots with an empty tool name are dropped; the second slot is the comparison run.
fn dispatch_order<'c>(
    primary: &'c ToolConfiguration,
    secondary: Option<&'c ToolConfiguration>,
) -> Vec<(&'c ToolConfiguration, bool)> {
    [(Some(primary), false), (secondary, true)]
        .into_iter()
        .filter_map(|(cfg, comparison)| cfg.filter(|c| !c.is_empty()).map(|c| (c, comparison)))
        .collect()
}

/// What `run` would do, without touching the filesystem.
pub fn plan(
    root: &SandboxRoot,
    primary: &ToolConfiguration,
    secondary: Option<&ToolConfiguration>,
) -> Vec<PlannedSlot> {
    dispatch_order(primary, secondary)
        .into_iter()
        .map(|(cfg, comparison)| {
            let ctx = RunContext::new(cfg, comparison);
            PlannedSlot {
                path: root.sandbox_path(&ctx.identity),
                exists: root.exists(&ctx.identity),
                is_comparison_run: comparison,
                runner_args: ctx.runner_args(),
                sandbox: ctx.identity,
            }
        })
        .collect()
}

pub struct RunCoordinator<'a, T: Toolchain + ?Sized, V: VersionIndex + ?Sized> {
    root: &'a SandboxRoot,
    toolchain: &'a T,
    index: &'a V,
    baseline: &'a [String],
    version_limit: usize,
    slot: ActivationSlot,
}

impl<'a, T: Toolchain + ?Sized, V: VersionIndex + ?Sized> RunCoordinator<'a, T, V> {
    pub fn new(
        root: &'a SandboxRoot,
        toolchain: &'a T,
        index: &'a V,
        settings: &'a HarnessSettings,
    ) -> Self {
        Self {
            root,
            toolchain,
            index,
            baseline: &settings.baseline_packages,
            version_limit: settings.version_limit,
            slot: ActivationSlot::new(),
        }
    }

    /// Provisions and benchmarks each configuration in turn.
    ///
    /// Fatal errors stop immediately, so a failed pinned install for the first
    /// configuration means the second is never attempted. A failing benchmark
    /// run does not stop the next one; its status ends up in the summary.
    pub fn run(
        &self,
        primary: &ToolConfiguration,
        secondary: Option<&ToolConfiguration>,
    ) -> Result<RunSummary, BenchError> {
        let mut summary = RunSummary::default();
        for (cfg, comparison) in dispatch_order(primary, secondary) {
            let outcome = self.run_slot(cfg, comparison).map_err(|e| {
                error!(code = e.code(), "{}", e);
                e
            })?;
            summary.slots.push(outcome);
        }
        for failure in summary.failures() {
            error!("{}", failure);
        }
        Ok(summary)
    }

    pub fn active_sandbox(&self) -> Option<SandboxIdentity> {
        self.slot.active()
    }

    fn run_slot(
        &self,
        cfg: &ToolConfiguration,
        is_comparison_run: bool,
    ) -> Result<SlotOutcome, BenchError> {
        let ctx = RunContext::new(cfg, is_comparison_run);
        let provisioner = SandboxProvisioner::new(self.root, self.toolchain);
        let installer =
            DependencyInstaller::new(self.toolchain, self.index, self.baseline, self.version_limit);

        let mut install = None;
        let env = provisioner.ensure(&ctx.identity, &self.slot, |env| {
            install = Some(installer.install(env, &cfg.tool(), &cfg.version)?);
            Ok(())
        })?;
        let status = BenchmarkDispatcher::new(self.toolchain).dispatch(&env, &ctx);
        let provenance = env.provenance();
        drop(env);

        info!(sandbox = %ctx.identity, status = %status, "benchmark runner finished");
        Ok(SlotOutcome {
            sandbox: ctx.identity,
            tool: cfg.tool_name.clone(),
            version: cfg.version.clone(),
            provenance,
            is_comparison_run,
            install,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(tool: &str, version: &str) -> ToolConfiguration {
        ToolConfiguration {
            tool_name: tool.to_string(),
            version: version.to_string(),
            optimization_level: "1".to_string(),
            backend_target: "backendX".to_string(),
            run_count: 5,
        }
    }

    #[test]
    fn dispatch_order_flags_second_slot_and_skips_empty() {
        let a = cfg("toolA", "1.0");
        let b = cfg("toolB", "2.0");
        let empty = cfg("", "");

        let order = dispatch_order(&a, Some(&b));
        assert_eq!(order.len(), 2);
        assert!(!order[0].1);
        assert!(order[1].1);

        assert_eq!(dispatch_order(&a, Some(&empty)).len(), 1);
        assert_eq!(dispatch_order(&a, None).len(), 1);
    }

    #[test]
    fn plan_lists_sandboxes_and_runner_args() {
        let root = SandboxRoot::open(&std::env::temp_dir().join(format!(
            "rq_plan_test_{}",
            std::process::id()
        )))
        .expect("root");
        let a = cfg("toolA", "1.0");
        let b = cfg("toolB", "2.0");
        let planned = plan(&root, &a, Some(&b));
        assert_eq!(planned.len(), 2);
        assert_eq!(planned[0].sandbox.as_str(), "venv_toolA_1.0");
        assert_eq!(planned[1].sandbox.as_str(), "venv_toolB_2.0");
        assert!(!planned[0].exists);
        assert_eq!(planned[0].path, root.path().join("venv_toolA_1.0"));
        assert_eq!(
            planned[1].runner_args,
            vec!["toolB", "2.0", "1", "backendX", "5", "true"]
        );
        assert!(!root.path().exists(), "plan must not touch the filesystem");
    }

    #[test]
    fn summary_exit_code_is_first_failure() {
        let outcome = |status| SlotOutcome {
            sandbox: crate::identity::resolve("t", "1"),
            tool: "t".to_string(),
            version: "1".to_string(),
            provenance: Provenance::Reused,
            is_comparison_run: false,
            install: None,
            status,
        };
        let summary = RunSummary {
            slots: vec![outcome(RunStatus::Exited(0)), outcome(RunStatus::Exited(0))],
        };
        assert_eq!(summary.exit_code(), 0);
        assert!(summary.failures().is_empty());

        let summary = RunSummary {
            slots: vec![outcome(RunStatus::Exited(0)), outcome(RunStatus::Exited(3))],
        };
        assert_eq!(summary.exit_code(), 3);
        assert_eq!(summary.failures().len(), 1);

        let summary = RunSummary {
            slots: vec![outcome(RunStatus::Signaled(9)), outcome(RunStatus::Exited(3))],
        };
        assert_eq!(summary.exit_code(), 137);
    }
}
