use crate::dispatch::RunStatus;
use thiserror::Error;

/// How the coordinator reacts to an error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Short-circuits the whole run, including any remaining configuration.
    Fatal,
    /// Logged and swallowed; the run continues.
    Warning,
    /// Recorded per configuration and folded into the final exit status.
    Reported,
}

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("configuration_unavailable: {0}")]
    ConfigurationUnavailable(String),

    #[error("pinned_install_failed: could not install {tool}=={version} (available versions: {available})")]
    PinnedInstallFailure {
        tool: String,
        version: String,
        available: String,
    },

    #[error("companion_install_failed: could not install {companion}, continuing without it")]
    CompanionInstallWarning { companion: String },

    #[error("benchmark_run_failed: {tool} {version} exited with {status}")]
    BenchmarkRunFailure {
        tool: String,
        version: String,
        status: RunStatus,
    },

    #[error("sandbox_unavailable: {name}: {reason}")]
    SandboxUnavailable { name: String, reason: String },
}

impl BenchError {
    pub fn severity(&self) -> Severity {
        match self {
            BenchError::ConfigurationUnavailable(_) => Severity::Fatal,
            BenchError::PinnedInstallFailure { .. } => Severity::Fatal,
            BenchError::SandboxUnavailable { .. } => Severity::Fatal,
            BenchError::CompanionInstallWarning { .. } => Severity::Warning,
            BenchError::BenchmarkRunFailure { .. } => Severity::Reported,
        }
    }

    /// Process exit code used when this error ends the run.
    pub fn exit_code(&self) -> i32 {
        match self {
            BenchError::ConfigurationUnavailable(_) => 2,
            BenchError::PinnedInstallFailure { .. } => 3,
            BenchError::SandboxUnavailable { .. } => 4,
            BenchError::CompanionInstallWarning { .. } => 0,
            BenchError::BenchmarkRunFailure { status, .. } => status.exit_code(),
        }
    }

    /// Stable machine-readable code, the prefix of the display message.
    pub fn code(&self) -> &'static str {
        match self {
            BenchError::ConfigurationUnavailable(_) => "configuration_unavailable",
            BenchError::PinnedInstallFailure { .. } => "pinned_install_failed",
            BenchError::CompanionInstallWarning { .. } => "companion_install_failed",
            BenchError::BenchmarkRunFailure { .. } => "benchmark_run_failed",
            BenchError::SandboxUnavailable { .. } => "sandbox_unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_table_matches_error_kinds() {
        let config = BenchError::ConfigurationUnavailable("missing".to_string());
        let pinned = BenchError::PinnedInstallFailure {
            tool: "qiskit".to_string(),
            version: "9.9.9".to_string(),
            available: "1.0".to_string(),
        };
        let companion = BenchError::CompanionInstallWarning {
            companion: "pytket".to_string(),
        };
        let bench = BenchError::BenchmarkRunFailure {
            tool: "qiskit".to_string(),
            version: "1.0".to_string(),
            status: RunStatus::Exited(7),
        };
        assert_eq!(config.severity(), Severity::Fatal);
        assert_eq!(pinned.severity(), Severity::Fatal);
        assert_eq!(companion.severity(), Severity::Warning);
        assert_eq!(bench.severity(), Severity::Reported);
        assert_eq!(bench.exit_code(), 7);
        assert_ne!(pinned.exit_code(), 0);
        assert_ne!(config.exit_code(), 0);
    }

    #[test]
    fn display_starts_with_code() {
        let err = BenchError::PinnedInstallFailure {
            tool: "pytket".to_string(),
            version: "0.0.1".to_string(),
            available: "2.7.0, 2.6.0".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with(err.code()), "unexpected message: {}", msg);
        assert!(msg.contains("pytket==0.0.1"), "unexpected message: {}", msg);
        assert!(msg.contains("2.7.0, 2.6.0"), "unexpected message: {}", msg);
    }
}
