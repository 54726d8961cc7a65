// Integration applicability: is the monitored component present on this host?

use crate::host::{HostEnvironment, Platform};
use serde_yaml::Value;
use std::fmt;
use std::time::Duration;

/// Process and service names of the process-backed database
pub const MYSQL_PROCESS: &str = "mysqld";
pub const MYSQL_SERVICE: &str = "MySQL";

/// Process and service names of the message-queue integration
pub const IBM_MQ_PROCESS: &str = "runmqlsr";
pub const IBM_MQ_SERVICE: &str = "IBM MQSeries";

/// Integrations whose applicability is a TCP reachability check
pub const CONNECTION_BACKED: &[&str] = &["postgres", "oracle", "sqlserver"];

/// How an integration is detected on a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrationKind {
    /// A fixed process on POSIX, a fixed service elsewhere
    ProcessBacked {
        process: &'static str,
        service: &'static str,
    },
    /// Reachable at `instances[0].host:port`
    ConnectionBacked,
    /// Either a fixed process or a fixed service, on any OS
    MessageQueue {
        process: &'static str,
        service: &'static str,
    },
    /// A process or service named like the integration
    Generic,
}

impl IntegrationKind {
    /// Classify an integration by name; first match wins
    pub fn classify(name: &str) -> Self {
        match name {
            "mysql" => IntegrationKind::ProcessBacked {
                process: MYSQL_PROCESS,
                service: MYSQL_SERVICE,
            },
            name if CONNECTION_BACKED.contains(&name) => IntegrationKind::ConnectionBacked,
            "ibm_mq" => IntegrationKind::MessageQueue {
                process: IBM_MQ_PROCESS,
                service: IBM_MQ_SERVICE,
            },
            _ => IntegrationKind::Generic,
        }
    }
}

/// Whether an integration applies to this host, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicabilityDecision {
    pub applicable: bool,
    pub reason: String,
}

impl ApplicabilityDecision {
    pub fn applicable(reason: impl Into<String>) -> Self {
        Self {
            applicable: true,
            reason: reason.into(),
        }
    }

    pub fn not_applicable(reason: impl Into<String>) -> Self {
        Self {
            applicable: false,
            reason: reason.into(),
        }
    }

    fn from_probe(found: bool, what: String) -> Self {
        if found {
            Self::applicable(format!("{} found", what))
        } else {
            Self::not_applicable(format!("{} not found", what))
        }
    }
}

impl fmt::Display for ApplicabilityDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.applicable { "applicable" } else { "not applicable" };
        write!(f, "{} ({})", verdict, self.reason)
    }
}

/// Decides per integration whether its configuration should be applied
pub struct ApplicabilityPolicy<'a> {
    host: &'a dyn HostEnvironment,
    connect_timeout: Duration,
}

impl<'a> ApplicabilityPolicy<'a> {
    pub fn new(host: &'a dyn HostEnvironment, connect_timeout: Duration) -> Self {
        Self {
            host,
            connect_timeout,
        }
    }

    /// Decide applicability for one integration.
    ///
    /// Never fails: malformed fragments and failed probes are "not applicable".
    pub async fn decide(&self, name: &str, fragment: &Value) -> ApplicabilityDecision {
        match IntegrationKind::classify(name) {
            IntegrationKind::ProcessBacked { process, service } => {
                self.probe_for_platform(process, service).await
            }
            IntegrationKind::ConnectionBacked => self.probe_connection(fragment).await,
            IntegrationKind::MessageQueue { process, service } => {
                if self.host.process_running(process).await {
                    ApplicabilityDecision::applicable(format!("process '{}' found", process))
                } else if self.host.service_exists(service).await {
                    ApplicabilityDecision::applicable(format!("service '{}' found", service))
                } else {
                    ApplicabilityDecision::not_applicable(format!(
                        "neither process '{}' nor service '{}' found",
                        process, service
                    ))
                }
            }
            IntegrationKind::Generic => self.probe_for_platform(name, name).await,
        }
    }

    /// Process probe on POSIX, service probe elsewhere
    async fn probe_for_platform(&self, process: &str, service: &str) -> ApplicabilityDecision {
        match self.host.platform() {
            Platform::Posix => ApplicabilityDecision::from_probe(
                self.host.process_running(process).await,
                format!("process '{}'", process),
            ),
            Platform::Windows => ApplicabilityDecision::from_probe(
                self.host.service_exists(service).await,
                format!("service '{}'", service),
            ),
        }
    }

    async fn probe_connection(&self, fragment: &Value) -> ApplicabilityDecision {
        let (host, port) = match first_endpoint(fragment) {
            Ok(endpoint) => endpoint,
            Err(reason) => return ApplicabilityDecision::not_applicable(reason),
        };

        if self.host.can_connect(host, port, self.connect_timeout).await {
            ApplicabilityDecision::applicable(format!("{}:{} is reachable", host, port))
        } else {
            ApplicabilityDecision::not_applicable(format!(
                "{}:{} is not reachable within {:?}",
                host, port, self.connect_timeout
            ))
        }
    }
}

/// `instances[0].host` and `instances[0].port` of a fragment
pub(crate) fn first_endpoint(fragment: &Value) -> Result<(&str, u16), &'static str> {
    let instance = fragment
        .get("instances")
        .and_then(Value::as_sequence)
        .and_then(|instances| instances.first())
        .ok_or("no instances configured")?;

    let host = instance
        .get("host")
        .and_then(Value::as_str)
        .filter(|host| !host.trim().is_empty())
        .ok_or("first instance has no host")?;

    let port = match instance.get("port") {
        Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Some(Value::String(s)) => s.trim().parse::<u16>().ok(),
        _ => None,
    }
    .filter(|port| *port != 0)
    .ok_or("first instance has no valid port")?;

    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MockHostEnvironment;

    fn fragment(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn host_on(platform: Platform) -> MockHostEnvironment {
        let mut host = MockHostEnvironment::new();
        host.expect_platform().return_const(platform);
        host
    }

    #[test]
    fn test_classification() {
        assert!(matches!(
            IntegrationKind::classify("mysql"),
            IntegrationKind::ProcessBacked { process: "mysqld", .. }
        ));
        assert_eq!(IntegrationKind::classify("postgres"), IntegrationKind::ConnectionBacked);
        assert_eq!(IntegrationKind::classify("oracle"), IntegrationKind::ConnectionBacked);
        assert_eq!(IntegrationKind::classify("sqlserver"), IntegrationKind::ConnectionBacked);
        assert!(matches!(
            IntegrationKind::classify("ibm_mq"),
            IntegrationKind::MessageQueue { .. }
        ));
        assert_eq!(IntegrationKind::classify("nginx"), IntegrationKind::Generic);
    }

    #[tokio::test]
    async fn test_mysql_uses_process_on_posix() {
        let mut host = host_on(Platform::Posix);
        host.expect_process_running()
            .withf(|name| name.to_string() == "mysqld")
            .times(1)
            .return_const(true);
        host.expect_service_exists().never();

        let policy = ApplicabilityPolicy::new(&host, Duration::from_secs(2));
        assert!(policy.decide("mysql", &Value::Null).await.applicable);
    }

    #[tokio::test]
    async fn test_mysql_uses_service_on_windows() {
        let mut host = host_on(Platform::Windows);
        host.expect_service_exists()
            .withf(|name| name.to_string() == "MySQL")
            .times(1)
            .return_const(false);
        host.expect_process_running().never();

        let policy = ApplicabilityPolicy::new(&host, Duration::from_secs(2));
        let decision = policy.decide("mysql", &Value::Null).await;
        assert!(!decision.applicable);
        assert!(decision.reason.contains("MySQL"));
    }

    #[tokio::test]
    async fn test_ibm_mq_process_only() {
        let mut host = host_on(Platform::Windows);
        host.expect_process_running()
            .withf(|name| name.to_string() == "runmqlsr")
            .return_const(true);
        host.expect_service_exists().return_const(false);

        let policy = ApplicabilityPolicy::new(&host, Duration::from_secs(2));
        assert!(policy.decide("ibm_mq", &Value::Null).await.applicable);
    }

    #[tokio::test]
    async fn test_ibm_mq_service_only() {
        let mut host = host_on(Platform::Posix);
        host.expect_process_running().return_const(false);
        host.expect_service_exists()
            .withf(|name| name.to_string() == "IBM MQSeries")
            .times(1)
            .return_const(true);

        let policy = ApplicabilityPolicy::new(&host, Duration::from_secs(2));
        assert!(policy.decide("ibm_mq", &Value::Null).await.applicable);
    }

    #[tokio::test]
    async fn test_ibm_mq_both_and_neither() {
        let mut both = host_on(Platform::Posix);
        both.expect_process_running().return_const(true);
        both.expect_service_exists().return_const(true);
        let policy = ApplicabilityPolicy::new(&both, Duration::from_secs(2));
        assert!(policy.decide("ibm_mq", &Value::Null).await.applicable);

        let mut neither = host_on(Platform::Posix);
        neither.expect_process_running().return_const(false);
        neither.expect_service_exists().return_const(false);
        let policy = ApplicabilityPolicy::new(&neither, Duration::from_secs(2));
        assert!(!policy.decide("ibm_mq", &Value::Null).await.applicable);
    }

    #[tokio::test]
    async fn test_connection_backed_uses_first_instance() {
        let mut host = host_on(Platform::Posix);
        host.expect_can_connect()
            .withf(|host, port, timeout| {
                host.to_string() == "db.internal" && *port == 5432 && *timeout == Duration::from_secs(2)
            })
            .times(1)
            .return_const(true);

        let policy = ApplicabilityPolicy::new(&host, Duration::from_secs(2));
        let fragment = fragment(
            "instances:\n  - host: db.internal\n    port: 5432\n  - host: other\n    port: 1\n",
        );
        assert!(policy.decide("postgres", &fragment).await.applicable);
    }

    #[tokio::test]
    async fn test_connection_backed_accepts_string_port() {
        let mut host = host_on(Platform::Windows);
        host.expect_can_connect()
            .withf(|_, port, _| *port == 1521)
            .return_const(false);

        let policy = ApplicabilityPolicy::new(&host, Duration::from_secs(2));
        let fragment = fragment("instances:\n  - host: ora\n    port: '1521'\n");
        assert!(!policy.decide("oracle", &fragment).await.applicable);
    }

    #[tokio::test]
    async fn test_malformed_fragments_are_not_applicable() {
        let mut host = host_on(Platform::Posix);
        host.expect_can_connect().never();
        let policy = ApplicabilityPolicy::new(&host, Duration::from_secs(2));

        let malformed = [
            "~",
            "instances: []",
            "instances: not-a-list",
            "instances:\n  - port: 5432\n",
            "instances:\n  - host: db\n",
            "instances:\n  - host: db\n    port: 70000\n",
            "instances:\n  - host: db\n    port: abc\n",
            "instances:\n  - host: ''\n    port: 5432\n",
            "instances:\n  - 42\n",
            "[1, 2, 3]",
        ];

        for yaml in malformed {
            let decision = policy.decide("sqlserver", &fragment(yaml)).await;
            assert!(!decision.applicable, "expected not applicable for {:?}", yaml);
        }
    }

    #[tokio::test]
    async fn test_generic_integration_probes_its_own_name() {
        let mut posix = host_on(Platform::Posix);
        posix
            .expect_process_running()
            .withf(|name| name.to_string() == "nginx")
            .return_const(true);
        let policy = ApplicabilityPolicy::new(&posix, Duration::from_secs(2));
        assert!(policy.decide("nginx", &Value::Null).await.applicable);

        let mut windows = host_on(Platform::Windows);
        windows
            .expect_service_exists()
            .withf(|name| name.to_string() == "nginx")
            .return_const(false);
        let policy = ApplicabilityPolicy::new(&windows, Duration::from_secs(2));
        assert!(!policy.decide("nginx", &Value::Null).await.applicable);
    }

    #[test]
    fn test_decision_display() {
        let decision = ApplicabilityDecision::not_applicable("process 'mysqld' not found");
        assert_eq!(decision.to_string(), "not applicable (process 'mysqld' not found)");
    }
}
