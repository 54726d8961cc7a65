// dd-configure - Datadog agent host configuration
// Library root

pub mod document;
pub mod error;
pub mod host;
pub mod layout;
pub mod policy;
pub mod reconcile;
pub mod secrets;
pub mod service;
pub mod settings;
pub mod version;
pub mod writer;

pub use document::{DesiredConfig, DocumentSource};
pub use error::{ConfigureError, StepResult};
pub use reconcile::{ReconcileReport, Reconciler};
pub use settings::Settings;

// Test modules (only compiled during tests)
#[cfg(test)]
mod reconcile_tests;
