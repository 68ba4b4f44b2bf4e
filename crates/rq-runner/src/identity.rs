use serde::{Serialize, Serializer};
use std::fmt;

pub const SANDBOX_PREFIX: &str = "venv_";

/// A benchmark subject. The two known libraries are each other's companion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tool {
    Qiskit,
    Pytket,
    Other(String),
}

impl Tool {
    pub fn from_name(name: &str) -> Self {
        match name {
            "qiskit" => Tool::Qiskit,
            "pytket" => Tool::Pytket,
            other => Tool::Other(other.to_string()),
        }
    }

    /// Package name handed to the installer and the version index.
    pub fn package_name(&self) -> &str {
        match self {
            Tool::Qiskit => "qiskit",
            Tool::Pytket => "pytket",
            Tool::Other(name) => name,
        }
    }

    /// The other known library, installed unpinned next to a pinned subject.
    pub fn companion(&self) -> Option<Tool> {
        match self {
            Tool::Qiskit => Some(Tool::Pytket),
            Tool::Pytket => Some(Tool::Qiskit),
            Tool::Other(_) => None,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Tool::Other(_))
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.package_name())
    }
}

/// Directory name of the sandbox dedicated to one (tool, version) pair,
/// together with the pair it was resolved from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SandboxIdentity {
    name: String,
    tool_name: String,
    version: String,
}

impl SandboxIdentity {
    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for SandboxIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// Serialized as the bare directory name.
impl Serialize for SandboxIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

/// Pure and total. Existence of the sandbox is checked elsewhere.
pub fn resolve(tool_name: &str, version: &str) -> SandboxIdentity {
    SandboxIdentity {
        name: format!("{}{}_{}", SANDBOX_PREFIX, tool_name, version),
        tool_name: tool_name.to_string(),
        version: version.to_string(),
    }
}
