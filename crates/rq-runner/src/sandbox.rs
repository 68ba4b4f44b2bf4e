//! Sandbox provisioning and activation.
//!
//! A sandbox is a directory `<root>/venv_<tool>_<version>` holding an isolated
//! python environment. Sandboxes are created lazily, reused on every later run
//! with the same identity and never deleted here.
//!
//! Activation is an explicit [`ActiveEnvironment`] value instead of process-wide
//! state. At most one environment is active per [`ActivationSlot`]; dropping the
//! handle deactivates it.

use crate::error::BenchError;
use crate::fsutil::{atomic_write_json_pretty, dir_size_bytes, ensure_dir};
use crate::identity::{SandboxIdentity, SANDBOX_PREFIX};
use crate::toolchain::Toolchain;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

pub const MARKER_FILE: &str = ".rq_sandbox.json";
const MARKER_SCHEMA: &str = "rq_sandbox_v1";

#[cfg(windows)]
const BIN_DIR: &str = "Scripts";
#[cfg(not(windows))]
const BIN_DIR: &str = "bin";

#[cfg(windows)]
const PYTHON_EXE: &str = "python.exe";
#[cfg(not(windows))]
const PYTHON_EXE: &str = "python";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Created,
    Reused,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxMarker {
    pub schema_version: String,
    pub name: String,
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub provisioned: bool,
    #[serde(default)]
    pub provisioned_at: Option<DateTime<Utc>>,
}

impl SandboxMarker {
    fn new(identity: &SandboxIdentity) -> Self {
        Self {
            schema_version: MARKER_SCHEMA.to_string(),
            name: identity.to_string(),
            tool: identity.tool_name().to_string(),
            version: identity.version().to_string(),
            created_at: Utc::now(),
            provisioned: false,
            provisioned_at: None,
        }
    }
}

fn read_marker(sandbox_dir: &Path) -> Option<SandboxMarker> {
    let bytes = fs::read(sandbox_dir.join(MARKER_FILE)).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn write_marker(sandbox_dir: &Path, marker: &SandboxMarker) -> Result<()> {
    atomic_write_json_pretty(&sandbox_dir.join(MARKER_FILE), marker)
}

/// The directory holding every sandbox.
#[derive(Debug, Clone)]
pub struct SandboxRoot {
    root: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct SandboxEntry {
    pub name: String,
    pub path: PathBuf,
    pub marker: Option<SandboxMarker>,
    pub size_bytes: u64,
}

impl SandboxRoot {
    /// Relative roots are anchored at the current directory so that spawned
    /// processes with another working directory still find the interpreter.
    pub fn open(root: &Path) -> Result<Self> {
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()?.join(root)
        };
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn sandbox_path(&self, identity: &SandboxIdentity) -> PathBuf {
        self.root.join(identity.as_str())
    }

    pub fn exists(&self, identity: &SandboxIdentity) -> bool {
        self.sandbox_path(identity).is_dir()
    }

    pub fn list(&self) -> Result<Vec<SandboxEntry>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let path = entry.path();
            if !name.starts_with(SANDBOX_PREFIX) || !path.is_dir() {
                continue;
            }
            entries.push(SandboxEntry {
                marker: read_marker(&path),
                size_bytes: dir_size_bytes(&path),
                name,
                path,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

/// The single active-environment pointer. Exclusive by construction: a second
/// activation while one is live is refused.
#[derive(Debug, Default)]
pub struct ActivationSlot {
    active: RefCell<Option<SandboxIdentity>>,
}

impl ActivationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<SandboxIdentity> {
        self.active.borrow().clone()
    }
}

/// An activated sandbox. Commands configured through [`ActiveEnvironment::apply`]
/// resolve packages from this sandbox only.
#[derive(Debug)]
pub struct ActiveEnvironment<'a> {
    slot: &'a ActivationSlot,
    identity: SandboxIdentity,
    root: PathBuf,
    provenance: Provenance,
}

impl<'a> ActiveEnvironment<'a> {
    fn activate(
        slot: &'a ActivationSlot,
        identity: &SandboxIdentity,
        root: PathBuf,
        provenance: Provenance,
    ) -> Result<Self, BenchError> {
        let mut active = slot.active.borrow_mut();
        if let Some(current) = active.as_ref() {
            return Err(BenchError::SandboxUnavailable {
                name: identity.to_string(),
                reason: format!("{} is still active", current),
            });
        }
        *active = Some(identity.clone());
        debug!(sandbox = %identity, "activated sandbox");
        Ok(Self {
            slot,
            identity: identity.clone(),
            root,
            provenance,
        })
    }

    pub fn identity(&self) -> &SandboxIdentity {
        &self.identity
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join(BIN_DIR)
    }

    pub fn python(&self) -> PathBuf {
        self.bin_dir().join(PYTHON_EXE)
    }

    /// Same environment changes a shell `activate` script makes.
    pub fn apply(&self, cmd: &mut Command) {
        cmd.env("VIRTUAL_ENV", &self.root);
        cmd.env("PATH", self.path_var());
        cmd.env_remove("PYTHONHOME");
    }

    fn path_var(&self) -> OsString {
        let inherited = std::env::var_os("PATH").unwrap_or_default();
        let entries =
            std::iter::once(self.bin_dir()).chain(std::env::split_paths(&inherited));
        std::env::join_paths(entries).unwrap_or_else(|_| self.bin_dir().into_os_string())
    }
}

impl Drop for ActiveEnvironment<'_> {
    fn drop(&mut self) {
        self.slot.active.replace(None);
        debug!(sandbox = %self.identity, "deactivated sandbox");
    }
}

pub struct SandboxProvisioner<'a, T: Toolchain + ?Sized> {
    root: &'a SandboxRoot,
    toolchain: &'a T,
}

impl<'a, T: Toolchain + ?Sized> SandboxProvisioner<'a, T> {
    pub fn new(root: &'a SandboxRoot, toolchain: &'a T) -> Self {
        Self { root, toolchain }
    }

    /// Returns the sandbox for `identity`, activated in `slot`.
    ///
    /// An existing directory is reused as is. Otherwise the sandbox is created,
    /// activated and handed to `on_create` before this returns. `on_create` never
    /// runs for a reused sandbox. If it fails the environment is deactivated and
    /// the error returned; the directory stays behind.
    pub fn ensure<'s, F>(
        &self,
        identity: &SandboxIdentity,
        slot: &'s ActivationSlot,
        on_create: F,
    ) -> Result<ActiveEnvironment<'s>, BenchError>
    where
        F: FnOnce(&ActiveEnvironment<'s>) -> Result<(), BenchError>,
    {
        let path = self.root.sandbox_path(identity);
        if path.is_dir() {
            match read_marker(&path) {
                Some(marker) if marker.provisioned => {}
                Some(_) => warn!(
                    sandbox = %identity,
                    "sandbox never finished provisioning; delete it to reinstall"
                ),
                None => warn!(
                    sandbox = %identity,
                    "sandbox has no provenance marker; reusing it unchecked"
                ),
            }
            info!(sandbox = %identity, "reusing existing sandbox");
            return ActiveEnvironment::activate(slot, identity, path, Provenance::Reused);
        }

        let unavailable = |reason: String| BenchError::SandboxUnavailable {
            name: identity.to_string(),
            reason,
        };
        ensure_dir(self.root.path()).map_err(|e| {
            unavailable(format!("cannot create {}: {}", self.root.path().display(), e))
        })?;
        info!(sandbox = %identity, path = %path.display(), "creating sandbox");
        self.toolchain
            .create_environment(&path)
            .map_err(|e| unavailable(e.to_string()))?;
        let mut marker = SandboxMarker::new(identity);
        write_marker(&path, &marker).map_err(|e| unavailable(e.to_string()))?;

        let env = ActiveEnvironment::activate(slot, identity, path.clone(), Provenance::Created)?;
        on_create(&env)?;

        marker.provisioned = true;
        marker.provisioned_at = Some(Utc::now());
        if let Err(e) = write_marker(&path, &marker) {
            warn!(sandbox = %identity, error = %e, "failed to record provisioning");
        }
        Ok(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::RunStatus;
    use crate::identity::resolve;
    use crate::toolchain::Requirement;
    use std::cell::Cell;

    struct DirToolchain {
        created: Cell<usize>,
    }

    impl Toolchain for DirToolchain {
        fn create_environment(&self, path: &Path) -> Result<()> {
            self.created.set(self.created.get() + 1);
            ensure_dir(&path.join(BIN_DIR))
        }

        fn install(&self, _env: &ActiveEnvironment<'_>, _requirement: &Requirement) -> Result<()> {
            Ok(())
        }

        fn run_benchmark(&self, _env: &ActiveEnvironment<'_>, _args: &[String]) -> Result<RunStatus> {
            Ok(RunStatus::Exited(0))
        }
    }

    fn temp_root(tag: &str) -> SandboxRoot {
        let dir = std::env::temp_dir().join(format!(
            "rq_sandbox_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        SandboxRoot::open(&dir).expect("root")
    }

    #[test]
    fn ensure_twice_creates_and_installs_once() {
        let root = temp_root("reuse");
        let toolchain = DirToolchain { created: Cell::new(0) };
        let provisioner = SandboxProvisioner::new(&root, &toolchain);
        let slot = ActivationSlot::new();
        let identity = resolve("qiskit", "1.0");
        let installs = Cell::new(0);

        let first = provisioner
            .ensure(&identity, &slot, |_| {
                installs.set(installs.get() + 1);
                Ok(())
            })
            .expect("first ensure");
        assert_eq!(first.provenance(), Provenance::Created);
        drop(first);

        let second = provisioner
            .ensure(&identity, &slot, |_| {
                installs.set(installs.get() + 1);
                Ok(())
            })
            .expect("second ensure");
        assert_eq!(second.provenance(), Provenance::Reused);
        drop(second);

        assert_eq!(installs.get(), 1);
        assert_eq!(toolchain.created.get(), 1);
        let marker = read_marker(&root.sandbox_path(&identity)).expect("marker");
        assert!(marker.provisioned);
        assert_eq!(marker.name, "venv_qiskit_1.0");
        assert_eq!(marker.tool, "qiskit");
        assert_eq!(marker.version, "1.0");
        let _ = fs::remove_dir_all(root.path());
    }

    #[test]
    fn failed_install_deactivates_and_leaves_unprovisioned_marker() {
        let root = temp_root("fail");
        let toolchain = DirToolchain { created: Cell::new(0) };
        let provisioner = SandboxProvisioner::new(&root, &toolchain);
        let slot = ActivationSlot::new();
        let identity = resolve("pytket", "9.9.9");

        let err = provisioner
            .ensure(&identity, &slot, |env| {
                assert_eq!(slot.active().as_ref(), Some(env.identity()));
                Err(BenchError::PinnedInstallFailure {
                    tool: "pytket".to_string(),
                    version: "9.9.9".to_string(),
                    available: "2.7.0".to_string(),
                })
            })
            .expect_err("install failure propagates");
        assert_eq!(err.code(), "pinned_install_failed");
        assert!(slot.active().is_none(), "slot must be released on failure");
        let marker = read_marker(&root.sandbox_path(&identity)).expect("marker");
        assert!(!marker.provisioned);
        let _ = fs::remove_dir_all(root.path());
    }

    #[test]
    fn activation_is_exclusive() {
        let root = temp_root("exclusive");
        let toolchain = DirToolchain { created: Cell::new(0) };
        let provisioner = SandboxProvisioner::new(&root, &toolchain);
        let slot = ActivationSlot::new();
        let a = resolve("qiskit", "1.0");
        let b = resolve("pytket", "2.7.0");

        let env_a = provisioner.ensure(&a, &slot, |_| Ok(())).expect("first");
        let err = provisioner
            .ensure(&b, &slot, |_| Ok(()))
            .expect_err("second activation must be refused");
        assert_eq!(err.code(), "sandbox_unavailable");
        drop(env_a);
        let env_b = provisioner.ensure(&b, &slot, |_| Ok(())).expect("after release");
        assert_eq!(slot.active(), Some(b.clone()));
        drop(env_b);
        assert!(slot.active().is_none());
        let _ = fs::remove_dir_all(root.path());
    }

    #[test]
    fn apply_points_command_at_sandbox() {
        let root = temp_root("apply");
        let toolchain = DirToolchain { created: Cell::new(0) };
        let provisioner = SandboxProvisioner::new(&root, &toolchain);
        let slot = ActivationSlot::new();
        let env = provisioner
            .ensure(&resolve("qiskit", "1.0"), &slot, |_| Ok(()))
            .expect("ensure");

        let mut cmd = Command::new("true");
        env.apply(&mut cmd);
        let vars: Vec<(OsString, Option<OsString>)> = cmd
            .get_envs()
            .map(|(k, v)| (k.to_os_string(), v.map(|v| v.to_os_string())))
            .collect();
        let get = |key: &str| {
            vars.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .expect("variable configured")
        };
        assert_eq!(get("VIRTUAL_ENV"), Some(env.root().as_os_str().to_os_string()));
        let path = get("PATH").expect("PATH set");
        let first = std::env::split_paths(&path).next().expect("non-empty PATH");
        assert_eq!(first, env.bin_dir());
        assert_eq!(get("PYTHONHOME"), None);
        drop(env);
        let _ = fs::remove_dir_all(root.path());
    }

    #[test]
    fn list_reports_only_sandboxes() {
        let root = temp_root("list");
        let toolchain = DirToolchain { created: Cell::new(0) };
        let provisioner = SandboxProvisioner::new(&root, &toolchain);
        let slot = ActivationSlot::new();
        for (tool, version) in [("qiskit", "1.0"), ("pytket", "2.7.0")] {
            drop(
                provisioner
                    .ensure(&resolve(tool, version), &slot, |_| Ok(()))
                    .expect("ensure"),
            );
        }
        ensure_dir(&root.path().join("scratch")).expect("scratch dir");

        let entries = root.list().expect("list");
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["venv_pytket_2.7.0", "venv_qiskit_1.0"]);
        assert!(entries.iter().all(|e| e.marker.is_some() && e.size_bytes > 0));
        let _ = fs::remove_dir_all(root.path());
    }

    #[test]
    fn list_of_missing_root_is_empty() {
        let root = temp_root("absent");
        assert!(root.list().expect("list").is_empty());
    }
}
