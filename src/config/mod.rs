//! Configuration system for pubwrap.
//!
//! Values come from a TOML file, then environment variables, then whatever
//! the caller (usually the CLI) overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::broker::rest::{DEFAULT_ENDPOINT, RestBrokerConfig};
use crate::types::validation::{validate_ack_deadline, validate_project_id};
use crate::{Error, Result};

/// Environment variable holding the project ID.
pub const ENV_PROJECT_ID: &str = "GCP_PROJECT_ID";
/// Environment variable naming a local emulator (`host:port`).
pub const ENV_EMULATOR_HOST: &str = "PUBSUB_EMULATOR_HOST";
/// Environment variable overriding the REST endpoint.
pub const ENV_ENDPOINT: &str = "PUBSUB_ENDPOINT";
/// Environment variable holding a static bearer token.
pub const ENV_ACCESS_TOKEN: &str = "PUBSUB_ACCESS_TOKEN";
/// Environment variable pointing at a service account key file.
pub const ENV_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PubwrapConfig {
    /// Pub/Sub connection settings.
    pub pubsub: PubsubConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Pub/Sub connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PubsubConfig {
    /// Project that owns every topic and subscription.
    pub project_id: String,
    /// Explicit REST endpoint; wins over `emulator_host`.
    pub endpoint: Option<String>,
    /// Emulator address (`host:port`), reached over plain HTTP.
    pub emulator_host: Option<String>,
    /// Static bearer token.
    pub access_token: Option<String>,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Ack deadline for new subscriptions that do not set one.
    pub default_ack_deadline_seconds: u32,
}

impl Default for PubsubConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            endpoint: None,
            emulator_host: None,
            access_token: None,
            request_timeout_secs: 30,
            default_ack_deadline_seconds: 10,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive.
    pub level: String,
    /// Log format (text or json).
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log format enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text format.
    Text,
    /// JSON format.
    Json,
}

impl PubwrapConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary lookup; empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(project) = get(ENV_PROJECT_ID) {
            self.pubsub.project_id = project;
        }
        if let Some(host) = get(ENV_EMULATOR_HOST) {
            self.pubsub.emulator_host = Some(host);
        }
        if let Some(endpoint) = get(ENV_ENDPOINT) {
            self.pubsub.endpoint = Some(endpoint);
        }
        if let Some(token) = get(ENV_ACCESS_TOKEN) {
            self.pubsub.access_token = Some(token);
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validate_project_id(&self.pubsub.project_id)
            .map_err(|e| Error::Config(format!("pubsub.project_id: {}", e)))?;

        if self.pubsub.request_timeout_secs == 0 {
            return Err(Error::Config(
                "pubsub.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        validate_ack_deadline(self.pubsub.default_ack_deadline_seconds)
            .map_err(|e| Error::Config(format!("pubsub.default_ack_deadline_seconds: {}", e)))?;

        Ok(())
    }
}

impl PubsubConfig {
    /// Endpoint to talk to: explicit endpoint, then emulator, then the public API.
    pub fn resolved_endpoint(&self) -> String {
        if let Some(endpoint) = &self.endpoint {
            return endpoint.clone();
        }
        if let Some(host) = &self.emulator_host {
            if host.starts_with("http://") || host.starts_with("https://") {
                return host.clone();
            }
            return format!("http://{}", host);
        }
        DEFAULT_ENDPOINT.to_string()
    }

    /// Whether requests go to an emulator rather than the public API.
    pub fn uses_emulator(&self) -> bool {
        self.endpoint.is_none() && self.emulator_host.is_some()
    }

    /// REST broker settings derived from this configuration.
    pub fn rest_broker_config(&self) -> RestBrokerConfig {
        RestBrokerConfig {
            endpoint: self.resolved_endpoint(),
            access_token: self.access_token.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PubwrapConfig::default();
        assert_eq!(config.pubsub.request_timeout_secs, 30);
        assert_eq!(config.pubsub.default_ack_deadline_seconds, 10);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.pubsub.resolved_endpoint(), DEFAULT_ENDPOINT);
        // No project yet.
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[pubsub]
project_id = "local-project"
emulator_host = "localhost:8085"
default_ack_deadline_seconds = 20

[logging]
level = "debug"
format = "json"
"#
        )
        .unwrap();

        let config = PubwrapConfig::from_file(file.path()).unwrap();
        assert_eq!(config.pubsub.project_id, "local-project");
        assert_eq!(config.pubsub.default_ack_deadline_seconds, 20);
        assert_eq!(config.pubsub.request_timeout_secs, 30);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.pubsub.resolved_endpoint(), "http://localhost:8085");
        assert!(config.pubsub.uses_emulator());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let result = PubwrapConfig::from_toml("[pubsub\nproject_id = 1");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = [
            (ENV_PROJECT_ID, "env-project"),
            (ENV_ENDPOINT, "http://127.0.0.1:9999"),
            (ENV_EMULATOR_HOST, "localhost:8085"),
            (ENV_ACCESS_TOKEN, ""),
        ]
        .into_iter()
        .collect();

        let mut config = PubwrapConfig::default();
        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.pubsub.project_id, "env-project");
        assert_eq!(config.pubsub.resolved_endpoint(), "http://127.0.0.1:9999");
        assert!(!config.pubsub.uses_emulator());
        assert!(config.pubsub.access_token.is_none());
    }

    #[test]
    fn test_validate_ranges() {
        let mut config = PubwrapConfig::default();
        config.pubsub.project_id = "local-project".to_string();
        assert!(config.validate().is_ok());

        config.pubsub.default_ack_deadline_seconds = 5;
        assert!(config.validate().is_err());

        config.pubsub.default_ack_deadline_seconds = 10;
        config.pubsub.request_timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
