//! Client configuration and loading.
//!
//! Sources are applied in order, later ones overriding earlier ones:
//!  1. an optional configuration file (format picked from its extension)
//!  2. environment variables prefixed `OAZURE` with `__` separators,
//!     e.g. `OAZURE__SERVICE_BUS__NAMESPACE=my-namespace`

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Environment variable prefix used by [`OazureConfig::load`]
pub const ENV_PREFIX: &str = "OAZURE";

/// Default server-side long-poll duration for one receive attempt
pub const DEFAULT_WAIT_HINT_SECONDS: u64 = 30;

/// Default storage REST API version
pub const DEFAULT_BLOB_API_VERSION: &str = "2016-05-31";

/// Secret value that never shows up in logs and is wiped on drop
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the secret value
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OazureConfig {
    #[serde(default)]
    pub service_bus: Option<ServiceBusConfig>,

    #[serde(default)]
    pub blob_storage: Option<BlobStorageConfig>,
}

impl OazureConfig {
    /// Load configuration from an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigurationError::Missing {
                    key: path.display().to_string(),
                });
            }
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Validate every configured section
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let Some(service_bus) = &self.service_bus {
            service_bus.validate()?;
        }
        if let Some(blob_storage) = &self.blob_storage {
            blob_storage.validate()?;
        }
        Ok(())
    }

    /// Service Bus section, or an error naming the missing key
    pub fn service_bus(&self) -> Result<&ServiceBusConfig, ConfigurationError> {
        self.service_bus
            .as_ref()
            .ok_or_else(|| ConfigurationError::Missing {
                key: "service_bus".to_string(),
            })
    }

    /// Blob Storage section, or an error naming the missing key
    pub fn blob_storage(&self) -> Result<&BlobStorageConfig, ConfigurationError> {
        self.blob_storage
            .as_ref()
            .ok_or_else(|| ConfigurationError::Missing {
                key: "blob_storage".to_string(),
            })
    }
}

/// Retry and timeout settings shared by every transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Total attempts for one logical call, first try included
    pub max_attempts: u32,

    /// Linear delay step between transport retries
    pub retry_delay_ms: u64,

    /// Client-side timeout for one-shot calls
    pub request_timeout_seconds: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 100,
            request_timeout_seconds: 30,
        }
    }
}

impl TransportConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_attempts == 0 {
            return Err(ConfigurationError::Invalid {
                message: "transport.max_attempts must be at least 1".to_string(),
            });
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigurationError::Invalid {
                message: "transport.request_timeout_seconds must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Service Bus namespace and shared access key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceBusConfig {
    pub namespace: String,
    pub key_name: String,
    pub key_value: Secret,

    /// Overrides the namespace endpoint (emulators, tests)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Server-side long-poll duration of one receive attempt
    #[serde(default = "default_wait_hint_seconds")]
    pub wait_hint_seconds: u64,

    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_wait_hint_seconds() -> u64 {
    DEFAULT_WAIT_HINT_SECONDS
}

impl ServiceBusConfig {
    pub fn new(
        namespace: impl Into<String>,
        key_name: impl Into<String>,
        key_value: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            key_name: key_name.into(),
            key_value: Secret::new(key_value),
            endpoint: None,
            wait_hint_seconds: DEFAULT_WAIT_HINT_SECONDS,
            transport: TransportConfig::default(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_wait_hint(mut self, wait_hint: Duration) -> Self {
        self.wait_hint_seconds = wait_hint.as_secs();
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Base URL requests are sent to, without a trailing slash
    pub fn endpoint(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}.servicebus.windows.net:443", self.namespace),
        }
    }

    pub fn wait_hint(&self) -> Duration {
        Duration::from_secs(self.wait_hint_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.namespace.is_empty() && self.endpoint.is_none() {
            return Err(ConfigurationError::Missing {
                key: "service_bus.namespace".to_string(),
            });
        }
        if self.key_name.is_empty() {
            return Err(ConfigurationError::Missing {
                key: "service_bus.key_name".to_string(),
            });
        }
        if self.key_value.is_empty() {
            return Err(ConfigurationError::Missing {
                key: "service_bus.key_value".to_string(),
            });
        }
        if self.wait_hint_seconds == 0 {
            return Err(ConfigurationError::Invalid {
                message: "service_bus.wait_hint_seconds must be at least 1".to_string(),
            });
        }
        self.transport.validate()
    }
}

/// Storage account name and shared key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStorageConfig {
    pub account_name: String,

    /// Base64 encoded account key
    pub account_key: Secret,

    /// Overrides the account endpoint (Azurite, tests)
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_blob_api_version")]
    pub api_version: String,

    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_blob_api_version() -> String {
    DEFAULT_BLOB_API_VERSION.to_string()
}

impl BlobStorageConfig {
    pub fn new(account_name: impl Into<String>, account_key: impl Into<String>) -> Self {
        Self {
            account_name: account_name.into(),
            account_key: Secret::new(account_key),
            endpoint: None,
            api_version: default_blob_api_version(),
            transport: TransportConfig::default(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Base URL requests are sent to, without a trailing slash
    pub fn endpoint(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}.blob.core.windows.net", self.account_name),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.account_name.is_empty() {
            return Err(ConfigurationError::Missing {
                key: "blob_storage.account_name".to_string(),
            });
        }
        if self.account_key.is_empty() {
            return Err(ConfigurationError::Missing {
                key: "blob_storage.account_key".to_string(),
            });
        }
        if self.api_version.is_empty() {
            return Err(ConfigurationError::Missing {
                key: "blob_storage.api_version".to_string(),
            });
        }
        self.transport.validate()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
