// Tool settings: where the agent lives and how to talk to it

use crate::error::Result;
use crate::host::Platform;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for a reconciliation run.
///
/// Every field has a platform default, so a settings file only needs the
/// values it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Agent configuration root (`/etc/datadog-agent` on POSIX)
    pub agent_dir: PathBuf,
    /// Account the agent runs as; config files are handed to it on POSIX
    pub service_account: String,
    /// Service restarted at the end of a run
    pub service_name: String,
    /// Timeout for connection-backed applicability checks
    pub connect_timeout_secs: u64,
    /// Timeout for fetching a remote desired-state document
    pub fetch_timeout_secs: u64,
    /// Append-only run log
    pub log_file: PathBuf,
    /// agent.exe override on Windows
    pub agent_executable: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::for_platform(Platform::current())
    }
}

impl Settings {
    /// Defaults for a given platform
    pub fn for_platform(platform: Platform) -> Self {
        let (agent_dir, log_file) = match platform {
            Platform::Posix => (
                PathBuf::from("/etc/datadog-agent"),
                PathBuf::from("/tmp/datadog_configure.log"),
            ),
            Platform::Windows => (
                PathBuf::from(r"C:\ProgramData\Datadog"),
                PathBuf::from("datadog_configure.log"),
            ),
        };

        Self {
            agent_dir,
            service_account: "dd-agent".to_string(),
            service_name: "datadog-agent".to_string(),
            connect_timeout_secs: 2,
            fetch_timeout_secs: 10,
            log_file,
            agent_executable: None,
        }
    }

    /// Get default settings path: ~/.config/dd-configure/settings.yaml
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("dd-configure").join("settings.yaml"))
    }

    /// Load settings from path, falling back to defaults if not found
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let settings_path = path.unwrap_or_else(|| Self::default_path().unwrap_or_default());

        let settings = if settings_path.is_file() {
            let contents = std::fs::read_to_string(&settings_path)
                .with_context(|| format!("Failed to read {}", settings_path.display()))?;
            serde_yaml::from_str::<Settings>(&contents)
                .with_context(|| format!("Invalid settings in {}", settings_path.display()))?
        } else {
            Self::default()
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to path
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Reject settings that would make every run fail
    pub fn validate(&self) -> Result<()> {
        if self.agent_dir.as_os_str().is_empty() {
            anyhow::bail!("agent_dir must not be empty");
        }
        if self.service_name.trim().is_empty() {
            anyhow::bail!("service_name must not be empty");
        }
        if self.connect_timeout_secs == 0 {
            anyhow::bail!("connect_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Service account to chown to, if any
    pub fn owner(&self) -> Option<&str> {
        let account = self.service_account.trim();
        (!account.is_empty()).then_some(account)
    }
}
