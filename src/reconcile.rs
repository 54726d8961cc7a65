// Reconciliation run: desired state in, files and a restart out

use crate::document::{DesiredConfig, IntegrationName};
use crate::error::ConfigureError;
use crate::host::HostEnvironment;
use crate::layout::AgentLayout;
use crate::policy::ApplicabilityPolicy;
use crate::secrets::SecretsInstaller;
use crate::service::ServiceController;
use crate::settings::Settings;
use crate::writer::{ConfigWriter, FileRole, WriteReport};
use serde_yaml::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Progress of a run. Every stage is reached even when earlier steps failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Start,
    MainConfigWritten,
    IntegrationsProcessed,
    SecretsInstalled,
    SecretsConfigured,
    PermissionsLocked,
    Restarted,
    Done,
}

/// Steps whose outcome is recorded in the report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    MainConfig,
    SecretsInstall,
    SecretsConfig,
    SecretsLockdown,
    Restart,
}

impl Step {
    pub fn label(&self) -> &'static str {
        match self {
            Step::MainConfig => "main config",
            Step::SecretsInstall => "secrets backend install",
            Step::SecretsConfig => "secrets backend config",
            Step::SecretsLockdown => "secrets backend lockdown",
            Step::Restart => "agent restart",
        }
    }
}

/// How a step ended
#[derive(Debug)]
pub enum StepStatus {
    Done,
    /// Done, but with permission problems
    Degraded(Vec<ConfigureError>),
    Skipped(String),
    Failed(ConfigureError),
}

impl StepStatus {
    fn from_write(result: Result<WriteReport, ConfigureError>) -> Self {
        match result {
            Ok(report) if report.is_clean() => StepStatus::Done,
            Ok(report) => StepStatus::Degraded(report.permission_errors),
            Err(e) => StepStatus::Failed(e),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StepStatus::Degraded(_) | StepStatus::Failed(_))
    }
}

/// What happened to one integration
#[derive(Debug)]
pub enum IntegrationOutcome {
    Applied {
        path: PathBuf,
        backup: Option<PathBuf>,
        permission_errors: Vec<ConfigureError>,
    },
    Skipped { reason: String },
    Failed(ConfigureError),
}

#[derive(Debug)]
pub struct IntegrationRecord {
    pub name: String,
    pub outcome: IntegrationOutcome,
}

/// Aggregated outcome of a run
#[derive(Debug)]
pub struct ReconcileReport {
    pub stage: Stage,
    pub steps: Vec<(Step, StepStatus)>,
    pub integrations: Vec<IntegrationRecord>,
}

impl ReconcileReport {
    fn new() -> Self {
        Self {
            stage: Stage::Start,
            steps: Vec::new(),
            integrations: Vec::new(),
        }
    }

    fn advance(&mut self, stage: Stage) {
        tracing::debug!(from = ?self.stage, to = ?stage, "Stage transition");
        self.stage = stage;
    }

    fn record_step(&mut self, step: Step, status: StepStatus) {
        match &status {
            StepStatus::Done => tracing::info!(step = step.label(), "Step completed"),
            StepStatus::Degraded(errors) => {
                for e in errors {
                    tracing::warn!(step = step.label(), "Step completed with permission problems: {}", e);
                }
            }
            StepStatus::Skipped(reason) => tracing::info!(step = step.label(), "Step skipped: {}", reason),
            StepStatus::Failed(e) => tracing::error!(step = step.label(), "Step failed: {}", e),
        }
        self.steps.push((step, status));
    }

    pub fn step(&self, step: Step) -> Option<&StepStatus> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, status)| status)
    }

    pub fn integration(&self, name: &str) -> Option<&IntegrationOutcome> {
        self.integrations
            .iter()
            .find(|record| record.name == name)
            .map(|record| &record.outcome)
    }

    pub fn applied(&self) -> usize {
        self.integrations
            .iter()
            .filter(|r| matches!(r.outcome, IntegrationOutcome::Applied { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.integrations
            .iter()
            .filter(|r| matches!(r.outcome, IntegrationOutcome::Skipped { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        let failed_integrations = self
            .integrations
            .iter()
            .filter(|r| match &r.outcome {
                IntegrationOutcome::Failed(_) => true,
                IntegrationOutcome::Applied { permission_errors, .. } => !permission_errors.is_empty(),
                IntegrationOutcome::Skipped { .. } => false,
            })
            .count();
        let failed_steps = self.steps.iter().filter(|(_, s)| s.is_failure()).count();
        failed_integrations + failed_steps
    }

    /// True if anything failed along the way
    pub fn is_degraded(&self) -> bool {
        self.failed() > 0
    }

    /// 0 for a clean run, 2 for a degraded one
    pub fn exit_code(&self) -> ExitCode {
        if self.is_degraded() {
            ExitCode::from(2)
        } else {
            ExitCode::SUCCESS
        }
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "integrations: {} applied, {} skipped; failures: {}; status: {}",
            self.applied(),
            self.skipped(),
            self.failed(),
            if self.is_degraded() { "degraded" } else { "ok" }
        )
    }
}

/// Drives one reconciliation run against a host
pub struct Reconciler {
    host: Arc<dyn HostEnvironment>,
    layout: AgentLayout,
    settings: Settings,
}

impl Reconciler {
    pub fn new(host: Arc<dyn HostEnvironment>, settings: Settings) -> Self {
        Self {
            host,
            layout: AgentLayout::new(settings.agent_dir.clone()),
            settings,
        }
    }

    pub fn layout(&self) -> &AgentLayout {
        &self.layout
    }

    /// Apply `config` to the host. Never fails; see the report for outcomes.
    pub async fn run(&self, config: &DesiredConfig, bundle: Option<&Path>) -> ReconcileReport {
        let host = self.host.as_ref();
        let writer = ConfigWriter::new(host, self.settings.owner());
        let mut report = ReconcileReport::new();

        tracing::info!(
            agent_dir = %self.layout.root().display(),
            platform = host.platform().label(),
            integrations = config.integrations.len(),
            "Starting reconciliation"
        );

        let main = writer.write(
            &self.layout.main_config(),
            &Value::Mapping(config.agent_settings.clone()),
            FileRole::AgentConfig,
        );
        report.record_step(Step::MainConfig, StepStatus::from_write(main));
        report.advance(Stage::MainConfigWritten);

        self.process_integrations(config, &writer, &mut report).await;
        report.advance(Stage::IntegrationsProcessed);

        let secrets = SecretsInstaller::new(host, &self.layout, &writer);

        let install = match bundle {
            Some(bundle) => match secrets.install(bundle) {
                Ok(()) => StepStatus::Done,
                Err(e) => StepStatus::Failed(e),
            },
            None => StepStatus::Skipped("no secrets backend bundle given".to_string()),
        };
        report.record_step(Step::SecretsInstall, install);
        report.advance(Stage::SecretsInstalled);

        let configure = match &config.secrets_backend_settings {
            Some(settings) => StepStatus::from_write(secrets.configure(settings)),
            None => StepStatus::Skipped("document has no datadog_secret_config".to_string()),
        };
        report.record_step(Step::SecretsConfig, configure);
        report.advance(Stage::SecretsConfigured);

        let lockdown = if !host.platform().is_posix() {
            StepStatus::Skipped("ownership is only managed on POSIX hosts".to_string())
        } else if bundle.is_none() && !self.layout.secrets_executable().exists() {
            StepStatus::Skipped("no secrets backend executable installed".to_string())
        } else {
            match secrets.lockdown_executable() {
                Ok(_) => StepStatus::Done,
                Err(e) => StepStatus::Failed(e),
            }
        };
        report.record_step(Step::SecretsLockdown, lockdown);
        report.advance(Stage::PermissionsLocked);

        let controller = ServiceController::new(host, self.settings.service_name.as_str());
        let restart = match controller.restart().await {
            Ok(()) => StepStatus::Done,
            Err(e) => StepStatus::Failed(e),
        };
        report.record_step(Step::Restart, restart);
        report.advance(Stage::Restarted);

        report.advance(Stage::Done);
        tracing::info!("Reconciliation finished: {}", report);
        report
    }

    /// Decide and write each integration in document order
    async fn process_integrations(
        &self,
        config: &DesiredConfig,
        writer: &ConfigWriter<'_>,
        report: &mut ReconcileReport,
    ) {
        let policy = ApplicabilityPolicy::new(self.host.as_ref(), self.settings.connect_timeout());

        for (key, fragment) in config.integrations() {
            let name = match IntegrationName::parse(key) {
                Ok(name) => name,
                Err(e) => {
                    tracing::error!("Skipping integration: {}", e);
                    report.integrations.push(IntegrationRecord {
                        name: key.as_str().map(str::to_string).unwrap_or_else(|| format!("{:?}", key)),
                        outcome: IntegrationOutcome::Failed(e),
                    });
                    continue;
                }
            };

            let decision = policy.decide(name.as_str(), fragment).await;
            if !decision.applicable {
                tracing::info!(integration = %name, "Skipping integration, not applicable on this host: {}", decision.reason);
                report.integrations.push(IntegrationRecord {
                    name: name.to_string(),
                    outcome: IntegrationOutcome::Skipped {
                        reason: decision.reason,
                    },
                });
                continue;
            }

            let target = self.layout.integration_config(name.as_str());
            let outcome = match writer.write(&target, fragment, FileRole::IntegrationConfig) {
                Ok(written) => {
                    tracing::info!(integration = %name, reason = %decision.reason, "Configured integration");
                    IntegrationOutcome::Applied {
                        path: written.path,
                        backup: written.backup,
                        permission_errors: written.permission_errors,
                    }
                }
                Err(e) => {
                    tracing::error!(integration = %name, "Error configuring integration: {}", e);
                    IntegrationOutcome::Failed(e)
                }
            };

            report.integrations.push(IntegrationRecord {
                name: name.to_string(),
                outcome,
            });
        }
    }
}
