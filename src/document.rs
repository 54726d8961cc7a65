// Desired-state document: model and sources

use crate::error::{ConfigureError, StepResult};
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// The resolved desired state for this host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredConfig {
    /// Settings written verbatim to datadog.yaml
    #[serde(rename = "datadog_config", default, deserialize_with = "null_as_default")]
    pub agent_settings: Mapping,

    /// Integration name to configuration fragment, in document order
    #[serde(rename = "datadog_checks", default, deserialize_with = "null_as_default")]
    pub integrations: Mapping,

    /// Settings for the secrets backend, if the document carries any
    #[serde(rename = "datadog_secret_config", default)]
    pub secrets_backend_settings: Option<Mapping>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl DesiredConfig {
    /// Parse a YAML document
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        // An empty document is an empty desired state
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Integrations as (key, fragment) pairs in document order
    pub fn integrations(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.integrations.iter()
    }
}

/// A validated integration name, safe to use as a path component
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IntegrationName(String);

impl IntegrationName {
    /// Validate a document key as an integration name
    pub fn parse(key: &Value) -> StepResult<Self> {
        let name = key.as_str().ok_or_else(|| ConfigureError::InvalidIntegration {
            name: format!("{:?}", key),
            message: "integration names must be strings".to_string(),
        })?;

        let invalid = |message: &str| ConfigureError::InvalidIntegration {
            name: name.to_string(),
            message: message.to_string(),
        };

        if name.trim().is_empty() {
            return Err(invalid("name cannot be empty"));
        }
        if name.contains('/') || name.contains('\\') || name.contains('\0') {
            return Err(invalid("name cannot contain path separators"));
        }
        if name.contains("..") {
            return Err(invalid("name cannot contain '..'"));
        }
        // Names reach pgrep and PowerShell as arguments
        if name.starts_with('-') {
            return Err(invalid("name cannot start with '-'"));
        }
        if name.len() > 255 {
            return Err(invalid("name is too long"));
        }

        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IntegrationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the desired-state document comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    /// http(s) URL
    Remote(String),
    /// Local YAML file
    File(PathBuf),
    /// Standard input (`-`)
    Stdin,
}

impl DocumentSource {
    /// Resolve a source identifier given on the command line
    pub fn parse(id: &str) -> Self {
        let id = id.trim();
        if id == "-" {
            DocumentSource::Stdin
        } else if id.starts_with("http://") || id.starts_with("https://") {
            DocumentSource::Remote(id.to_string())
        } else if let Some(path) = id.strip_prefix("file://") {
            DocumentSource::File(PathBuf::from(path))
        } else {
            DocumentSource::File(PathBuf::from(id))
        }
    }

    /// Identifier used in logs and errors
    pub fn id(&self) -> String {
        match self {
            DocumentSource::Remote(url) => url.clone(),
            DocumentSource::File(path) => path.display().to_string(),
            DocumentSource::Stdin => "-".to_string(),
        }
    }

    /// Fetch and parse the document. Any failure here is fatal to the run.
    pub async fn fetch(&self, timeout: Duration) -> StepResult<DesiredConfig> {
        let text = self.read(timeout).await?;
        DesiredConfig::from_yaml(&text).map_err(|e| self.fetch_error(format!("invalid YAML: {}", e)))
    }

    async fn read(&self, timeout: Duration) -> StepResult<String> {
        match self {
            DocumentSource::Remote(url) => {
                let client = reqwest::Client::builder()
                    .user_agent(concat!("dd-configure/", env!("CARGO_PKG_VERSION")))
                    .timeout(timeout)
                    .build()
                    .map_err(|e| self.fetch_error(e))?;

                let response = client.get(url).send().await.map_err(|e| self.fetch_error(e))?;

                if !response.status().is_success() {
                    return Err(self.fetch_error(format!("server returned status {}", response.status())));
                }

                response.text().await.map_err(|e| self.fetch_error(e))
            }
            DocumentSource::File(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| self.fetch_error(e)),
            DocumentSource::Stdin => {
                let mut text = String::new();
                tokio::io::stdin()
                    .read_to_string(&mut text)
                    .await
                    .map_err(|e| self.fetch_error(e))?;
                Ok(text)
            }
        }
    }

    fn fetch_error(&self, cause: impl fmt::Display) -> ConfigureError {
        ConfigureError::Fetch {
            source_id: self.id(),
            message: cause.to_string(),
        }
    }
}
