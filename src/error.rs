// Error types for dd-configure

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using anyhow::Error
pub type Result<T> = anyhow::Result<T>;

/// Result of a single reconciliation step
pub type StepResult<T> = std::result::Result<T, ConfigureError>;

/// Failures the reconciler can report.
///
/// Only [`ConfigureError::Fetch`], [`ConfigureError::Unimplemented`] and
/// [`ConfigureError::Config`] stop a run; everything else is caught at the
/// boundary of the step that produced it.
#[derive(Error, Debug)]
pub enum ConfigureError {
    #[error("Failed to fetch desired state from '{source_id}': {message}")]
    Fetch { source_id: String, message: String },

    #[error("Failed to write '{}': {message}", .path.display())]
    Write { path: PathBuf, message: String },

    #[error("Failed to set permissions on '{}': {message}", .path.display())]
    Permission { path: PathBuf, message: String },

    #[error("Failed to install secrets backend from '{}': {message}", .bundle.display())]
    Install { bundle: PathBuf, message: String },

    #[error("Failed to restart service '{service}': {message}")]
    Restart { service: String, message: String },

    #[error("Invalid integration name '{name}': {message}")]
    InvalidIntegration { name: String, message: String },

    #[error("Action '{0}' is not implemented")]
    Unimplemented(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ConfigureError {
    /// Build a write error for `path` from any displayable cause
    pub fn write(path: impl Into<PathBuf>, cause: impl std::fmt::Display) -> Self {
        Self::Write {
            path: path.into(),
            message: cause.to_string(),
        }
    }

    /// Build a permission error for `path` from any displayable cause
    pub fn permission(path: impl Into<PathBuf>, cause: impl std::fmt::Display) -> Self {
        Self::Permission {
            path: path.into(),
            message: cause.to_string(),
        }
    }

    /// True for errors that must abort the whole run before the host is touched
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. } | Self::Unimplemented(_) | Self::Config(_)
        )
    }
}
