// POSIX host: pgrep probes, chown/chmod and systemd restarts

use crate::error::{ConfigureError, StepResult};
use crate::host::{fs, probe, HostEnvironment, Ownership, Platform};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Upper bound on waiting for systemd to finish a restart job
const RESTART_JOB_TIMEOUT: Duration = Duration::from_secs(180);

/// Host environment for Linux and other Unix-like systems
#[derive(Debug, Clone, Default)]
pub struct PosixHost;

impl PosixHost {
    pub fn new() -> Self {
        Self
    }

    /// systemd unit name for a service
    pub fn unit_name(service: &str) -> String {
        if service.ends_with(".service") {
            service.to_string()
        } else {
            format!("{}.service", service)
        }
    }

    /// Ask systemd over the system bus to restart a unit and wait for the job.
    ///
    /// `RestartUnit` only queues a job; its result arrives in a `JobRemoved`
    /// signal, so the subscription is made before the call.
    #[cfg(unix)]
    async fn restart_via_dbus(&self, unit: &str) -> std::result::Result<(), RestartFailure> {
        use futures::StreamExt;
        use zbus::zvariant::OwnedObjectPath;

        let connection = zbus::Connection::system()
            .await
            .map_err(|e| RestartFailure::BusUnavailable(e.to_string()))?;

        let proxy = zbus::Proxy::new(
            &connection,
            "org.freedesktop.systemd1",
            "/org/freedesktop/systemd1",
            "org.freedesktop.systemd1.Manager",
        )
        .await
        .map_err(|e| RestartFailure::BusUnavailable(e.to_string()))?;

        // systemd only emits job signals to subscribed clients
        let () = proxy
            .call("Subscribe", &())
            .await
            .map_err(|e| RestartFailure::BusUnavailable(format!("Subscribe failed: {}", e)))?;
        let mut removed_jobs = proxy
            .receive_signal("JobRemoved")
            .await
            .map_err(|e| RestartFailure::BusUnavailable(e.to_string()))?;

        let job: OwnedObjectPath = proxy
            .call("RestartUnit", &(unit, "replace"))
            .await
            .map_err(|e| {
                let error_msg = e.to_string();
                if error_msg.contains("Access denied") || error_msg.contains("Authentication") {
                    RestartFailure::Rejected(
                        "Access denied. Run dd-configure as root.".to_string(),
                    )
                } else {
                    RestartFailure::Rejected(format!("RestartUnit failed: {}", e))
                }
            })?;
        tracing::debug!(unit = %unit, job = %job.as_str(), "Restart job queued");

        let wait_for_job = async {
            while let Some(message) = removed_jobs.next().await {
                let body = message.body();
                let Ok((_id, path, _unit, result)) =
                    body.deserialize::<(u32, OwnedObjectPath, String, String)>()
                else {
                    continue;
                };
                if path == job {
                    return Some(result);
                }
            }
            None
        };

        match tokio::time::timeout(RESTART_JOB_TIMEOUT, wait_for_job).await {
            Ok(Some(result)) => Self::job_outcome(&result).map_err(RestartFailure::Rejected),
            Ok(None) => Err(RestartFailure::Rejected(
                "System bus closed before the restart job finished".to_string(),
            )),
            Err(_) => Err(RestartFailure::Rejected(format!(
                "Restart job did not finish within {:?}",
                RESTART_JOB_TIMEOUT
            ))),
        }
    }

    /// Map the result string of a finished systemd job
    pub(crate) fn job_outcome(result: &str) -> std::result::Result<(), String> {
        match result {
            "done" => Ok(()),
            other => Err(format!("Restart job finished with result '{}'", other)),
        }
    }

    #[cfg(not(unix))]
    async fn restart_via_dbus(&self, _unit: &str) -> std::result::Result<(), RestartFailure> {
        Err(RestartFailure::BusUnavailable(
            "D-Bus is not available on this platform".to_string(),
        ))
    }

    /// `systemctl restart <unit>`
    async fn restart_via_systemctl(&self, unit: &str) -> StepResult<()> {
        let output = tokio::process::Command::new("systemctl")
            .arg("restart")
            .arg(unit)
            .output()
            .await
            .map_err(|e| ConfigureError::Restart {
                service: unit.to_string(),
                message: format!("Failed to spawn systemctl: {}", e),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ConfigureError::Restart {
                service: unit.to_string(),
                message: format!(
                    "systemctl exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            })
        }
    }
}

/// Why a D-Bus restart did not happen
#[derive(Debug)]
enum RestartFailure {
    /// No system bus; systemctl may still work
    BusUnavailable(String),
    /// systemd answered and refused
    Rejected(String),
}

#[async_trait]
impl HostEnvironment for PosixHost {
    fn platform(&self) -> Platform {
        Platform::Posix
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

    fn apply_ownership(&self, path: &Path, account: &str) -> StepResult<Ownership> {
        fs::chown_to_account(path, account)
    }

    fn apply_mode(&self, path: &Path, mode: u32) -> StepResult<()> {
        fs::set_mode(path, mode)
    }

    async fn restart_service(&self, service: &str) -> StepResult<()> {
        let unit = Self::unit_name(service);

        match self.restart_via_dbus(&unit).await {
            Ok(()) => Ok(()),
            Err(RestartFailure::BusUnavailable(reason)) => {
                tracing::warn!(unit = %unit, "System bus unavailable ({}), falling back to systemctl", reason);
                self.restart_via_systemctl(&unit).await
            }
            Err(RestartFailure::Rejected(message)) => Err(ConfigureError::Restart {
                service: unit,
                message,
            }),
        }
    }

    fn install_bundle(&self, bundle: &Path, target: &Path) -> StepResult<()> {
        fs::extract_tar_gz(bundle, target)
    }
}
