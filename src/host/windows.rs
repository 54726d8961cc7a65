// Windows host: service control manager probes and agent.exe restarts

use crate::error::{ConfigureError, StepResult};
use crate::host::{fs, probe, HostEnvironment, Ownership, Platform};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Host environment for Windows
#[derive(Debug, Clone)]
pub struct WindowsHost {
    agent_executable: PathBuf,
}

impl WindowsHost {
    /// Create a Windows host, locating agent.exe under %ProgramFiles% unless overridden
    pub fn new(agent_executable: Option<PathBuf>) -> Self {
        Self {
            agent_executable: agent_executable.unwrap_or_else(Self::default_agent_executable),
        }
    }

    /// `%ProgramFiles%\Datadog\Datadog Agent\embedded3\agent.exe`
    pub fn default_agent_executable() -> PathBuf {
        let program_files =
            std::env::var_os("ProgramFiles").unwrap_or_else(|| r"C:\Program Files".into());
        PathBuf::from(program_files)
            .join("Datadog")
            .join("Datadog Agent")
            .join("embedded3")
            .join("agent.exe")
    }

    pub fn agent_executable(&self) -> &Path {
        &self.agent_executable
    }
}

#[async_trait]
impl HostEnvironment for WindowsHost {
    fn platform(&self) -> Platform {
        Platform::Windows
    }

    async fn process_running(&self, name: &str) -> bool {
        probe::process_running(name).await
    }

    async fn service_exists(&self, name: &str) -> bool {
        probe::service_exists(name).await
    }

    async fn can_connect(&self, host: &str, port: u16, timeout: Duration) -> bool {
        probe::can_connect(host, port, timeout).await
    }

    fn apply_ownership(&self, _path: &Path, _account: &str) -> StepResult<Ownership> {
        Ok(Ownership::Unchanged(
            "ownership is not managed on Windows".to_string(),
        ))
    }

    fn apply_mode(&self, _path: &Path, _mode: u32) -> StepResult<()> {
        Ok(())
    }

    /// agent.exe restarts its own service; the service name is implied
    async fn restart_service(&self, service: &str) -> StepResult<()> {
        let output = tokio::process::Command::new(&self.agent_executable)
            .arg("restart-service")
            .output()
            .await
            .map_err(|e| ConfigureError::Restart {
                service: service.to_string(),
                message: format!("Failed to run {}: {}", self.agent_executable.display(), e),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ConfigureError::Restart {
                service: service.to_string(),
                message: format!(
                    "agent.exe restart-service exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            })
        }
    }

    fn install_bundle(&self, bundle: &Path, target: &Path) -> StepResult<()> {
        fs::extract_zip(bundle, target)
    }
}
