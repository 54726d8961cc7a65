// Host capabilities: probes, ownership, restarts and bundle installs

pub mod fs;
pub mod posix;
pub mod probe;
pub mod windows;


use crate::error::StepResult;
use crate::settings::Settings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub use posix::PosixHost;
pub use windows::WindowsHost;

/// Operating system family the tool is running on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Linux and other Unix-like hosts (pgrep, systemd, chown)
    Posix,
    /// Windows hosts (service control manager, agent.exe)
    Windows,
}

impl Platform {
    /// Platform of the running binary
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Posix
        }
    }

    pub fn is_posix(&self) -> bool {
        matches!(self, Platform::Posix)
    }

    /// Archive format secrets-backend bundles are shipped in
    pub fn bundle_format(&self) -> BundleFormat {
        match self {
            Platform::Posix => BundleFormat::TarGz,
            Platform::Windows => BundleFormat::Zip,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Platform::Posix => "posix",
            Platform::Windows => "windows",
        }
    }
}

/// Archive formats accepted for secrets-backend bundles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleFormat {
    TarGz,
    Zip,
}

/// What happened when ownership was applied to a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    /// File now belongs to the service account
    Changed { uid: u32, gid: u32 },
    /// Ownership left as creator
    Unchanged(String),
}

/// Everything the reconciler needs from the host it runs on.
///
/// One implementation is selected at startup by [`detect`] and shared by every
/// component for the whole run. Probes never fail: a probe that cannot run
/// answers `false`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostEnvironment: Send + Sync {
    /// Platform this environment speaks for
    fn platform(&self) -> Platform;

    /// True if a process whose command line contains `name` is running
    async fn process_running(&self, name: &str) -> bool;

    /// True if the service manager knows a service called `name`
    async fn service_exists(&self, name: &str) -> bool;

    /// True if a TCP handshake with `host:port` completes within `timeout`
    async fn can_connect(&self, host: &str, port: u16, timeout: Duration) -> bool;

    /// Hand `path` to the service account
    fn apply_ownership(&self, path: &Path, account: &str) -> StepResult<Ownership>;

    /// Set permission bits on `path`
    fn apply_mode(&self, path: &Path, mode: u32) -> StepResult<()>;

    /// Restart the agent service
    async fn restart_service(&self, service: &str) -> StepResult<()>;

    /// Extract a secrets-backend bundle into `target`
    fn install_bundle(&self, bundle: &Path, target: &Path) -> StepResult<()>;
}

/// Select the host environment for the running platform
pub fn detect(settings: &Settings) -> Arc<dyn HostEnvironment> {
    match Platform::current() {
        Platform::Posix => Arc::new(PosixHost::new()),
        Platform::Windows => Arc::new(WindowsHost::new(settings.agent_executable.clone())),
    }
}
