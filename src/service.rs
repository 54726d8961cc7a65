// Agent service restarts

use crate::error::{ConfigureError, StepResult};
use crate::host::HostEnvironment;

/// Restarts the agent service through the host's service manager
pub struct ServiceController<'a> {
    host: &'a dyn HostEnvironment,
    service_name: String,
}

impl<'a> ServiceController<'a> {
    pub fn new(host: &'a dyn HostEnvironment, service_name: impl Into<String>) -> Self {
        Self {
            host,
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Issue one restart. Failures are returned, never retried.
    pub async fn restart(&self) -> StepResult<()> {
        self.validate_service_name()?;

        tracing::info!(service = %self.service_name, platform = self.host.platform().label(), "Restarting agent");
        self.host.restart_service(&self.service_name).await?;
        tracing::info!(service = %self.service_name, "Agent restarted");
        Ok(())
    }

    /// Validate service name format and prevent injection
    pub(crate) fn validate_service_name(&self) -> StepResult<()> {
        let name = self.service_name.as_str();
        let invalid = |message: &str| ConfigureError::Restart {
            service: name.to_string(),
            message: message.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("Service name cannot be empty"));
        }

        // No path traversal, no null bytes, no option injection, reasonable length
        if name.contains("..") || name.contains('\0') || name.contains('/') || name.len() > 256 {
            return Err(invalid("Invalid service name format"));
        }
        if name.starts_with('-') || name.chars().any(char::is_whitespace) {
            return Err(invalid("Invalid service name format"));
        }

        Ok(())
    }
}
