#[cfg(test)]
mod tests {
    use crate::document::DesiredConfig;
    use crate::error::ConfigureError;
    use crate::host::{fs, MockHostEnvironment, Ownership, Platform};
    use crate::reconcile::*;
    use crate::settings::Settings;
    use std::path::Path;
    use std::sync::Arc;

    /// Mock host that really writes modes and answers probes from a process list
    fn host(platform: Platform, running: &'static [&'static str]) -> MockHostEnvironment {
        let mut host = MockHostEnvironment::new();
        host.expect_platform().return_const(platform);
        host.expect_process_running()
            .returning(move |name| running.iter().any(|p| *p == name));
        host.expect_service_exists().return_const(false);
        host.expect_can_connect().return_const(false);
        host.expect_apply_ownership()
            .returning(|_, _| Ok(Ownership::Unchanged("test".to_string())));
        host.expect_apply_mode().returning(|path, mode| fs::set_mode(path, mode));
        host
    }

    fn settings_for(dir: &Path, platform: Platform) -> Settings {
        Settings {
            agent_dir: dir.to_path_buf(),
            ..Settings::for_platform(platform)
        }
    }

    fn document(yaml: &str) -> DesiredConfig {
        DesiredConfig::from_yaml(yaml).unwrap()
    }

    #[tokio::test]
    async fn test_inapplicable_integration_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = host(Platform::Posix, &[]);
        host.expect_restart_service().times(1).returning(|_| Ok(()));

        let reconciler = Reconciler::new(Arc::new(host), settings_for(dir.path(), Platform::Posix));
        let report = reconciler
            .run(&document("datadog_checks:\n  mysql:\n    instances: [{}]\n"), None)
            .await;

        assert!(!dir.path().join("conf.d/mysql.d/conf.yaml").exists());
        assert!(matches!(
            report.integration("mysql"),
            Some(IntegrationOutcome::Skipped { reason }) if reason.contains("mysqld")
        ));
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.applied(), 0);
        assert!(!report.is_degraded());
        assert_eq!(report.stage, Stage::Done);
    }

    #[tokio::test]
    async fn test_integrations_processed_in_document_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = host(Platform::Posix, &["redis", "nginx"]);
        host.expect_restart_service().returning(|_| Ok(()));

        let reconciler = Reconciler::new(Arc::new(host), settings_for(dir.path(), Platform::Posix));
        let report = reconciler
            .run(
                &document("datadog_checks:\n  redis: {a: 1}\n  kafka: {b: 2}\n  nginx: {c: 3}\n"),
                None,
            )
            .await;

        let names: Vec<&str> = report.integrations.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["redis", "kafka", "nginx"]);
        assert_eq!(report.applied(), 2);
        assert_eq!(report.skipped(), 1);
        assert!(dir.path().join("conf.d/redis.d/conf.yaml").exists());
        assert!(dir.path().join("conf.d/nginx.d/conf.yaml").exists());
        assert!(!dir.path().join("conf.d/kafka.d").exists());
    }

    #[tokio::test]
    async fn test_invalid_integration_name_does_not_escape_conf_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = host(Platform::Posix, &["../../evil", "nginx"]);
        host.expect_restart_service().returning(|_| Ok(()));

        let reconciler = Reconciler::new(Arc::new(host), settings_for(dir.path(), Platform::Posix));
        let report = reconciler
            .run(&document("datadog_checks:\n  ../../evil: {a: 1}\n  nginx: {}\n"), None)
            .await;

        assert!(matches!(
            report.integration("../../evil"),
            Some(IntegrationOutcome::Failed(ConfigureError::InvalidIntegration { .. }))
        ));
        // The loop carries on past the bad entry
        assert!(matches!(report.integration("nginx"), Some(IntegrationOutcome::Applied { .. })));
        assert!(report.is_degraded());
    }

    #[tokio::test]
    async fn test_restart_reached_when_every_step_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocked_root = dir.path().join("agent");
        std::fs::write(&blocked_root, "not a directory").unwrap();

        let mut host = host(Platform::Posix, &["nginx"]);
        host.expect_install_bundle().times(1).returning(|bundle, _| {
            Err(ConfigureError::Install {
                bundle: bundle.to_path_buf(),
                message: "corrupt".to_string(),
            })
        });
        host.expect_restart_service().times(1).returning(|service| {
            Err(ConfigureError::Restart {
                service: service.to_string(),
                message: "systemd unavailable".to_string(),
            })
        });

        let bundle = dir.path().join("backend.tar.gz");
        std::fs::write(&bundle, "garbage").unwrap();

        let reconciler = Reconciler::new(Arc::new(host), settings_for(&blocked_root, Platform::Posix));
        let report = reconciler
            .run(
                &document("datadog_config: {api_key: x}\ndatadog_checks:\n  nginx: {}\ndatadog_secret_config: {a: 1}\n"),
                Some(&bundle),
            )
            .await;

        assert_eq!(report.stage, Stage::Done);
        assert!(matches!(report.step(Step::MainConfig), Some(StepStatus::Failed(_))));
        assert!(matches!(report.step(Step::SecretsInstall), Some(StepStatus::Failed(_))));
        assert!(matches!(report.step(Step::SecretsConfig), Some(StepStatus::Failed(_))));
        assert!(matches!(report.step(Step::SecretsLockdown), Some(StepStatus::Failed(_))));
        assert!(matches!(report.step(Step::Restart), Some(StepStatus::Failed(_))));
        assert!(matches!(report.integration("nginx"), Some(IntegrationOutcome::Failed(_))));
        assert_eq!(report.failed(), 6);
        assert!(report.is_degraded());
    }

    #[tokio::test]
    async fn test_secrets_steps_skipped_without_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = host(Platform::Posix, &[]);
        host.expect_install_bundle().never();
        host.expect_restart_service().times(1).returning(|_| Ok(()));

        let reconciler = Reconciler::new(Arc::new(host), settings_for(dir.path(), Platform::Posix));
        let report = reconciler.run(&document("datadog_config: {site: datadoghq.eu}\n"), None).await;

        assert!(matches!(report.step(Step::MainConfig), Some(StepStatus::Done)));
        assert!(matches!(report.step(Step::SecretsInstall), Some(StepStatus::Skipped(_))));
        assert!(matches!(report.step(Step::SecretsConfig), Some(StepStatus::Skipped(_))));
        assert!(matches!(report.step(Step::SecretsLockdown), Some(StepStatus::Skipped(_))));
        assert!(!dir.path().join("datadog-secret-backend.yaml").exists());
        assert!(!report.is_degraded());
    }

    #[tokio::test]
    async fn test_windows_skips_lockdown_and_uses_services() {
        let dir = tempfile::tempdir().unwrap();

        let mut host = MockHostEnvironment::new();
        host.expect_platform().return_const(Platform::Windows);
        host.expect_process_running().never();
        host.expect_service_exists()
            .withf(|name| name.to_string() == "MySQL")
            .times(1)
            .return_const(true);
        host.expect_apply_ownership()
            .returning(|_, _| Ok(Ownership::Unchanged("windows".to_string())));
        host.expect_apply_mode().returning(|_, _| Ok(()));
        host.expect_install_bundle().times(1).returning(|_, _| Ok(()));
        host.expect_restart_service().times(1).returning(|_| Ok(()));

        let bundle = dir.path().join("backend.zip");
        std::fs::write(&bundle, "zip").unwrap();

        let reconciler = Reconciler::new(Arc::new(host), settings_for(dir.path(), Platform::Windows));
        let report = reconciler
            .run(&document("datadog_checks:\n  mysql: {}\n"), Some(&bundle))
            .await;

        assert!(matches!(report.integration("mysql"), Some(IntegrationOutcome::Applied { .. })));
        assert!(matches!(report.step(Step::SecretsInstall), Some(StepStatus::Done)));
        assert!(matches!(report.step(Step::SecretsLockdown), Some(StepStatus::Skipped(_))));
        assert!(!report.is_degraded());
    }

    #[test]
    fn test_report_display() {
        let report = ReconcileReport {
            stage: Stage::Done,
            steps: vec![(Step::Restart, StepStatus::Done)],
            integrations: vec![
                IntegrationRecord {
                    name: "mysql".to_string(),
                    outcome: IntegrationOutcome::Skipped {
                        reason: "process 'mysqld' not found".to_string(),
                    },
                },
                IntegrationRecord {
                    name: "nginx".to_string(),
                    outcome: IntegrationOutcome::Applied {
                        path: "/etc/datadog-agent/conf.d/nginx.d/conf.yaml".into(),
                        backup: None,
                        permission_errors: vec![],
                    },
                },
            ],
        };

        assert_eq!(
            report.to_string(),
            "integrations: 1 applied, 1 skipped; failures: 0; status: ok"
        );
    }

    #[test]
    fn test_stage_order() {
        assert!(Stage::Start < Stage::MainConfigWritten);
        assert!(Stage::PermissionsLocked < Stage::Restarted);
        assert!(Stage::Restarted < Stage::Done);
    }
}
