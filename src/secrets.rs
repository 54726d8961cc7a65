// Secrets backend: bundle install, settings file and executable lockdown

use crate::error::{ConfigureError, StepResult};
use crate::host::{HostEnvironment, Ownership};
use crate::layout::AgentLayout;
use crate::writer::{ConfigWriter, FileRole, WriteReport};
use serde_yaml::{Mapping, Value};
use std::path::Path;

/// Installs and configures the secrets backend next to the agent config
pub struct SecretsInstaller<'a> {
    host: &'a dyn HostEnvironment,
    layout: &'a AgentLayout,
    writer: &'a ConfigWriter<'a>,
}

impl<'a> SecretsInstaller<'a> {
    pub fn new(
        host: &'a dyn HostEnvironment,
        layout: &'a AgentLayout,
        writer: &'a ConfigWriter<'a>,
    ) -> Self {
        Self {
            host,
            layout,
            writer,
        }
    }

    /// Extract the bundle into the agent directory
    pub fn install(&self, bundle: &Path) -> StepResult<()> {
        if !bundle.is_file() {
            return Err(ConfigureError::Install {
                bundle: bundle.to_path_buf(),
                message: "bundle not found".to_string(),
            });
        }

        tracing::info!(
            bundle = %bundle.display(),
            target = %self.layout.root().display(),
            format = ?self.host.platform().bundle_format(),
            "Extracting secrets backend"
        );
        self.host.install_bundle(bundle, self.layout.root())
    }

    /// Write the secrets-backend settings owner-only
    pub fn configure(&self, settings: &Mapping) -> StepResult<WriteReport> {
        self.writer.write(
            &self.layout.secrets_config(),
            &Value::Mapping(settings.clone()),
            FileRole::SecretsConfig,
        )
    }

    /// Hand the extracted executable to the service account, mode 0500.
    ///
    /// POSIX only; returns `Ok(None)` elsewhere. Must follow [`install`](Self::install).
    pub fn lockdown_executable(&self) -> StepResult<Option<Ownership>> {
        if !self.host.platform().is_posix() {
            return Ok(None);
        }

        let executable = self.layout.secrets_executable();
        if !executable.is_file() {
            return Err(ConfigureError::permission(&executable, "executable not found"));
        }

        let (ownership, mut errors) = self.writer.secure(&executable, FileRole::Executable);
        match errors.len() {
            0 => Ok(Some(ownership)),
            1 => Err(errors.remove(0)),
            _ => {
                let causes: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Err(ConfigureError::permission(&executable, causes.join("; ")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{MockHostEnvironment, Platform};
    use crate::layout::SECRETS_EXECUTABLE;

    fn posix_host() -> MockHostEnvironment {
        let mut host = MockHostEnvironment::new();
        host.expect_platform().return_const(Platform::Posix);
        host
    }

    #[test]
    fn test_lockdown_reports_chown_and_chmod_failures() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SECRETS_EXECUTABLE), "#!/bin/sh\n").unwrap();

        let mut host = posix_host();
        host.expect_apply_ownership()
            .returning(|path, _| Err(ConfigureError::permission(path, "chown dd-agent: EPERM")));
        host.expect_apply_mode()
            .returning(|path, _| Err(ConfigureError::permission(path, "chmod 500: EROFS")));

        let layout = AgentLayout::new(dir.path());
        let writer = ConfigWriter::new(&host, Some("dd-agent"));
        let installer = SecretsInstaller::new(&host, &layout, &writer);

        let err = installer.lockdown_executable().unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, ConfigureError::Permission { .. }));
        assert!(message.contains("EPERM"), "{}", message);
        assert!(message.contains("EROFS"), "{}", message);
    }

    #[test]
    fn test_lockdown_single_failure_kept_as_is() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SECRETS_EXECUTABLE), "#!/bin/sh\n").unwrap();

        let mut host = posix_host();
        host.expect_apply_ownership()
            .returning(|_, _| Ok(Ownership::Changed { uid: 998, gid: 998 }));
        host.expect_apply_mode()
            .returning(|path, _| Err(ConfigureError::permission(path, "chmod 500: EROFS")));

        let layout = AgentLayout::new(dir.path());
        let writer = ConfigWriter::new(&host, Some("dd-agent"));
        let installer = SecretsInstaller::new(&host, &layout, &writer);

        let err = installer.lockdown_executable().unwrap_err();
        assert!(matches!(err, ConfigureError::Permission { message, .. } if message == "chmod 500: EROFS"));
    }

    #[test]
    fn test_lockdown_missing_executable_and_windows() {
        let dir = tempfile::tempdir().unwrap();
        let layout = AgentLayout::new(dir.path());

        let host = posix_host();
        let writer = ConfigWriter::new(&host, Some("dd-agent"));
        let installer = SecretsInstaller::new(&host, &layout, &writer);
        assert!(installer.lockdown_executable().is_err());

        let mut windows = MockHostEnvironment::new();
        windows.expect_platform().return_const(Platform::Windows);
        let writer = ConfigWriter::new(&windows, None);
        let installer = SecretsInstaller::new(&windows, &layout, &writer);
        assert!(matches!(installer.lockdown_executable(), Ok(None)));
    }
}
