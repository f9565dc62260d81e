//! Per-request configuration
//!
//! Credentials come from the authentication collaborator, external-model
//! parameters from the request. Both are frozen into a [`PluginConfig`] that
//! is passed by reference through every capability call.

use crate::database::traits::PluginError;
use crate::schema::Record;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Advanced option naming the engine port
pub const OPTION_PORT: &str = "Port";

/// Advanced option naming the TLS mode (Postgres, MySQL)
pub const OPTION_SSL_MODE: &str = "SSL Mode";

/// Advanced option switching MongoDB to SRV lookup
pub const OPTION_DNS_ENABLED: &str = "DNS Enabled";

/// Advanced option selecting `http` or `https` for ClickHouse
pub const OPTION_HTTP_PROTOCOL: &str = "HTTP Protocol";

/// Advanced option bounding connection establishment, in seconds
pub const OPTION_CONNECTION_TIMEOUT: &str = "Connection Timeout";

/// How to reach one engine instance
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Database-type identifier, e.g. `Postgres` or `MongoDB`
    #[serde(rename = "type")]
    pub engine_type: String,

    #[serde(default)]
    pub hostname: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Database name, or the file path for SQLite
    #[serde(default)]
    pub database: String,

    /// Engine-specific options; unknown keys are ignored
    #[serde(default)]
    pub advanced: Vec<Record>,
}

impl Credentials {
    pub fn new(
        engine_type: impl Into<String>,
        hostname: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            engine_type: engine_type.into(),
            hostname: hostname.into(),
            username: username.into(),
            password: password.into(),
            database: database.into(),
            advanced: Vec::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.advanced.push(Record::new(key, value));
        self
    }

    /// First advanced option with the given key (case-insensitive), ignoring blanks
    pub fn option(&self, key: &str) -> Option<&str> {
        self.advanced
            .iter()
            .find(|record| record.key.eq_ignore_ascii_case(key))
            .map(|record| record.value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn option_enabled(&self, key: &str) -> bool {
        self.option(key)
            .map(|value| value.eq_ignore_ascii_case("true") || value == "1")
            .unwrap_or(false)
    }

    /// Port from the advanced options, or the engine default
    pub fn port(&self, default_port: u16) -> Result<u16, PluginError> {
        match self.option(OPTION_PORT) {
            Some(value) => value
                .parse()
                .map_err(|_| PluginError::Connection(format!("invalid port '{}'", value))),
            None => Ok(default_port),
        }
    }

    pub fn connection_timeout(&self) -> Result<Option<Duration>, PluginError> {
        match self.option(OPTION_CONNECTION_TIMEOUT) {
            Some(value) => value.parse::<u64>().map(|seconds| Some(Duration::from_secs(seconds))).map_err(
                |_| PluginError::Connection(format!("invalid connection timeout '{}'", value)),
            ),
            None => Ok(None),
        }
    }
}

// Keeps passwords out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("engine_type", &self.engine_type)
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .field("advanced", &self.advanced)
            .finish()
    }
}

/// Reference to the AI provider used by chat
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalModel {
    /// Provider type, e.g. `OpenAI` or `Ollama`
    #[serde(rename = "type")]
    pub model_type: String,

    #[serde(default)]
    pub token: String,
}

impl fmt::Debug for ExternalModel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ExternalModel")
            .field("model_type", &self.model_type)
            .field("token", &"***")
            .finish()
    }
}

/// Configuration of one request, immutable once built
#[derive(Debug, Clone)]
pub struct PluginConfig {
    credentials: Credentials,
    external_model: Option<ExternalModel>,
    timeout: Option<Duration>,
}

impl PluginConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            external_model: None,
            timeout: None,
        }
    }

    pub fn with_external_model(mut self, external_model: ExternalModel) -> Self {
        self.external_model = Some(external_model);
        self
    }

    /// Deadline applied to connection acquisition and to the unit of work
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn external_model(&self) -> Option<&ExternalModel> {
        self.external_model.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Authentication collaborator handing out the caller's credentials
pub trait CredentialsSource {
    fn credentials(&self) -> Option<Credentials>;
}

impl CredentialsSource for Credentials {
    fn credentials(&self) -> Option<Credentials> {
        Some(self.clone())
    }
}

/// Build the request configuration from the authenticated credentials and
/// optional external-model parameters
pub fn resolve_config(
    source: &dyn CredentialsSource,
    model_type: Option<&str>,
    token: Option<&str>,
    timeout: Option<Duration>,
) -> Result<PluginConfig, PluginError> {
    let credentials = source.credentials().ok_or(PluginError::MissingCredentials)?;
    let mut config = PluginConfig::new(credentials);

    if let Some(model_type) = model_type.filter(|value| !value.trim().is_empty()) {
        config = config.with_external_model(ExternalModel {
            model_type: model_type.to_string(),
            token: token.unwrap_or_default().to_string(),
        });
    }

    if let Some(timeout) = timeout {
        config = config.with_timeout(timeout);
    }

    Ok(config)
}
