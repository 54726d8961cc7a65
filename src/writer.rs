// Config artifact writer: backup, replace, chown, chmod

use crate::error::{ConfigureError, StepResult};
use crate::host::{HostEnvironment, Ownership};
use chrono::Local;
use serde_yaml::Value;
use std::io::Write;
use std::path::{Path, PathBuf};

/// What a file holds, which decides its permission bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    /// datadog.yaml
    AgentConfig,
    /// conf.d/<name>.d/conf.yaml
    IntegrationConfig,
    /// Secrets-backend settings; credentials-bearing
    SecretsConfig,
    /// Secrets-backend binary
    Executable,
}

impl FileRole {
    /// Unix permission bits for the role
    pub fn mode(&self) -> u32 {
        match self {
            FileRole::AgentConfig | FileRole::IntegrationConfig => 0o640,
            FileRole::SecretsConfig => 0o400,
            FileRole::Executable => 0o500,
        }
    }
}

/// One file about to be written
#[derive(Debug, Clone)]
pub struct ConfigArtifact {
    pub path: PathBuf,
    pub contents: String,
    pub role: FileRole,
}

impl ConfigArtifact {
    /// Serialize a fragment as YAML for `path`
    pub fn render(path: impl Into<PathBuf>, fragment: &Value, role: FileRole) -> StepResult<Self> {
        let path = path.into();
        let contents = serde_yaml::to_string(fragment)
            .map_err(|e| ConfigureError::write(&path, format!("serialize: {}", e)))?;
        Ok(Self {
            path,
            contents,
            role,
        })
    }
}

/// Outcome of a write that reached the disk
#[derive(Debug)]
pub struct WriteReport {
    pub path: PathBuf,
    /// Copy of the previous contents, if the file existed
    pub backup: Option<PathBuf>,
    pub ownership: Ownership,
    /// chown/chmod failures; the contents were written regardless
    pub permission_errors: Vec<ConfigureError>,
}

impl WriteReport {
    /// True if contents, ownership and mode are all in place
    pub fn is_clean(&self) -> bool {
        self.permission_errors.is_empty()
    }
}

/// Writes config artifacts with backups and the service account's ownership
pub struct ConfigWriter<'a> {
    host: &'a dyn HostEnvironment,
    owner: Option<String>,
}

impl<'a> ConfigWriter<'a> {
    pub fn new(host: &'a dyn HostEnvironment, owner: Option<&str>) -> Self {
        Self {
            host,
            owner: owner.map(str::to_string),
        }
    }

    /// Serialize `fragment` to `target` and apply the role's permissions.
    ///
    /// Returns `Err` only when the contents could not be written. Ownership
    /// and mode failures are carried in the report.
    pub fn write(&self, target: &Path, fragment: &Value, role: FileRole) -> StepResult<WriteReport> {
        let artifact = ConfigArtifact::render(target, fragment, role)?;
        self.write_artifact(&artifact)
    }

    pub fn write_artifact(&self, artifact: &ConfigArtifact) -> StepResult<WriteReport> {
        let path = artifact.path.as_path();
        let parent = parent_dir(path);

        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigureError::write(path, format!("create {}: {}", parent.display(), e)))?;

        let backup = if path.exists() {
            let backup = backup_file(path)?;
            tracing::info!(path = %path.display(), backup = %backup.display(), "Backed up existing file");
            Some(backup)
        } else {
            None
        };

        replace_contents(path, artifact.contents.as_bytes())?;
        tracing::info!(path = %path.display(), "Wrote config");

        let (ownership, permission_errors) = self.secure(path, artifact.role);

        Ok(WriteReport {
            path: path.to_path_buf(),
            backup,
            ownership,
            permission_errors,
        })
    }

    /// Apply ownership and mode to an existing file
    pub fn secure(&self, path: &Path, role: FileRole) -> (Ownership, Vec<ConfigureError>) {
        let mut errors = Vec::new();

        let ownership = match self.owner.as_deref() {
            Some(account) => match self.host.apply_ownership(path, account) {
                Ok(Ownership::Unchanged(reason)) => {
                    tracing::warn!(path = %path.display(), "Ownership left as creator: {}", reason);
                    Ownership::Unchanged(reason)
                }
                Ok(changed) => changed,
                Err(e) => {
                    tracing::error!(path = %path.display(), "{}", e);
                    errors.push(e);
                    Ownership::Unchanged("chown failed".to_string())
                }
            },
            None => Ownership::Unchanged("no service account configured".to_string()),
        };

        if let Err(e) = self.host.apply_mode(path, role.mode()) {
            tracing::error!(path = %path.display(), "{}", e);
            errors.push(e);
        }

        (ownership, errors)
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Copy `path` to a backup name that does not exist yet
pub fn backup_file(path: &Path) -> StepResult<PathBuf> {
    let timestamp = Local::now().format("%Y%m%d%H%M%S").to_string();
    let backup = next_backup_path(path, &timestamp);

    std::fs::copy(path, &backup)
        .map_err(|e| ConfigureError::write(path, format!("backup to {}: {}", backup.display(), e)))?;

    Ok(backup)
}

/// `<path>.<timestamp>.bak`, or `<path>.<timestamp>.<n>.bak` when taken
pub fn next_backup_path(path: &Path, timestamp: &str) -> PathBuf {
    let base = path.as_os_str().to_string_lossy().into_owned();

    let first = PathBuf::from(format!("{}.{}.bak", base, timestamp));
    if !first.exists() {
        return first;
    }

    (1u32..)
        .map(|n| PathBuf::from(format!("{}.{}.{}.bak", base, timestamp, n)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

/// Replace `path` as a whole file via a temporary file in the same directory
fn replace_contents(path: &Path, contents: &[u8]) -> StepResult<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(parent_dir(path))
        .map_err(|e| ConfigureError::write(path, format!("create temporary file: {}", e)))?;

    tmp.write_all(contents)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| ConfigureError::write(path, e))?;

    tmp.persist(path)
        .map_err(|e| ConfigureError::write(path, e.error))?;

    Ok(())
}
