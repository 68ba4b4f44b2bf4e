use crate::error::BenchError;
use crate::identity::Tool;
use crate::index::VersionIndex;
use crate::sandbox::ActiveEnvironment;
use crate::toolchain::{Requirement, Toolchain};
use serde::Serialize;
use tracing::{error, info, warn};

pub const VERSIONS_PLACEHOLDER: &str = "unavailable (package index could not be queried)";

/// What a successful install did. Warnings are already logged.
#[derive(Debug, Default, Serialize)]
pub struct InstallReport {
    pub baseline_failed: Vec<String>,
    pub pinned: Option<String>,
    pub companion: Option<String>,
    #[serde(skip)]
    pub warnings: Vec<BenchError>,
}

pub struct DependencyInstaller<'a, T: Toolchain + ?Sized, V: VersionIndex + ?Sized> {
    toolchain: &'a T,
    index: &'a V,
    baseline: &'a [String],
    version_limit: usize,
}

impl<'a, T: Toolchain + ?Sized, V: VersionIndex + ?Sized> DependencyInstaller<'a, T, V> {
    pub fn new(toolchain: &'a T, index: &'a V, baseline: &'a [String], version_limit: usize) -> Self {
        Self {
            toolchain,
            index,
            baseline,
            version_limit,
        }
    }

    /// Baseline packages (best effort), then the pinned subject (fatal on
    /// failure), then the unpinned companion (warning on failure).
    pub fn install(
        &self,
        env: &ActiveEnvironment<'_>,
        tool: &Tool,
        version: &str,
    ) -> Result<InstallReport, BenchError> {
        let mut report = InstallReport::default();

        for package in self.baseline {
            let requirement = Requirement::latest(package);
            if let Err(e) = self.toolchain.install(env, &requirement) {
                warn!(sandbox = %env.identity(), requirement = %requirement, error = %e, "baseline install failed");
                report.baseline_failed.push(package.clone());
            }
        }

        let Some(companion) = tool.companion() else {
            info!(sandbox = %env.identity(), tool = %tool, "unknown tool, installed baseline only");
            return Ok(report);
        };

        let pinned = Requirement::pinned(tool.package_name(), version);
        info!(sandbox = %env.identity(), requirement = %pinned, "installing pinned package");
        if let Err(e) = self.toolchain.install(env, &pinned) {
            error!(sandbox = %env.identity(), requirement = %pinned, error = %e, "pinned install failed");
            return Err(BenchError::PinnedInstallFailure {
                tool: tool.package_name().to_string(),
                version: version.to_string(),
                available: self.describe_available(tool.package_name()),
            });
        }
        report.pinned = Some(pinned.to_string());

        let companion_req = Requirement::latest(companion.package_name());
        match self.toolchain.install(env, &companion_req) {
            Ok(()) => report.companion = Some(companion_req.to_string()),
            Err(e) => {
                let warning = BenchError::CompanionInstallWarning {
                    companion: companion.package_name().to_string(),
                };
                warn!(sandbox = %env.identity(), error = %e, "{}", warning);
                report.warnings.push(warning);
            }
        }
        Ok(report)
    }

    fn describe_available(&self, package: &str) -> String {
        match self.index.available_versions(package, self.version_limit) {
            Ok(versions) if !versions.is_empty() => versions.join(", "),
            Ok(_) => VERSIONS_PLACEHOLDER.to_string(),
            Err(e) => {
                warn!(package, error = %e, "could not list available versions");
                VERSIONS_PLACEHOLDER.to_string()
            }
        }
    }
}
