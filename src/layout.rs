// On-disk layout of the agent configuration directory

use std::path::{Path, PathBuf};

/// Main agent configuration file name
pub const MAIN_CONFIG: &str = "datadog.yaml";
/// Secrets-backend settings file name
pub const SECRETS_CONFIG: &str = "datadog-secret-backend.yaml";
/// Secrets-backend executable name (as shipped in the bundle)
pub const SECRETS_EXECUTABLE: &str = "datadog-secret-backend";

/// Paths of every artifact the reconciler manages, rooted at the agent directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentLayout {
    root: PathBuf,
}

impl AgentLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/datadog.yaml`
    pub fn main_config(&self) -> PathBuf {
        self.root.join(MAIN_CONFIG)
    }

    /// `<root>/conf.d`
    pub fn conf_dir(&self) -> PathBuf {
        self.root.join("conf.d")
    }

    /// `<root>/conf.d/<name>.d/conf.yaml`
    ///
    /// `name` must already be validated as a single path component.
    pub fn integration_config(&self, name: &str) -> PathBuf {
        self.conf_dir()
            .join(format!("{}.d", name))
            .join("conf.yaml")
    }

    /// `<root>/datadog-secret-backend.yaml`
    pub fn secrets_config(&self) -> PathBuf {
        self.root.join(SECRETS_CONFIG)
    }

    /// `<root>/datadog-secret-backend`
    pub fn secrets_executable(&self) -> PathBuf {
        self.root.join(SECRETS_EXECUTABLE)
    }
}
