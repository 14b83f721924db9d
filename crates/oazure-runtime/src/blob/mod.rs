//! Blob Storage: lease management and lease-guarded blob operations.
//!
//! A lease is a server-enforced, time-bounded exclusive claim on one blob.
//! Holding the [`LeaseId`] string is the only proof of ownership the client
//! has; the service rejects renew, release and guarded writes made with an
//! identifier that is not the current one.

use crate::config::BlobStorageConfig;
use crate::error::{ConfigurationError, ValidationError};
use crate::signing::SharedKeySigner;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub mod client;
pub mod lease;

pub use client::{BlobClient, CopyStatus};
pub use lease::LeaseManager;

/// Header naming the lease a request acts under
pub const LEASE_ID_HEADER: &str = "x-ms-lease-id";

/// Content type signed on every blob PUT
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Transport signed with the storage account key
pub fn transport(config: &BlobStorageConfig) -> Result<Transport, ConfigurationError> {
    config.validate()?;

    let signer = SharedKeySigner::new(
        config.account_name.clone(),
        config.account_key.expose(),
        config.api_version.clone(),
    )?;
    Transport::new(config.endpoint(), Arc::new(signer), config.transport.clone())
}

// ============================================================================
// Blob References
// ============================================================================

/// A blob inside a container
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobRef {
    container: String,
    blob: String,
}

impl BlobRef {
    /// Create a reference, validating the container and blob names
    ///
    /// Container names follow the service rules: 3-63 lower-case letters,
    /// digits and single hyphens. Blob names may be any non-empty string of
    /// up to 1024 characters.
    pub fn new(
        container: impl Into<String>,
        blob: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let container = container.into();
        let blob = blob.into();

        if container.len() < 3 || container.len() > 63 {
            return Err(ValidationError::OutOfRange {
                field: "container".to_string(),
                message: "must be 3-63 characters".to_string(),
            });
        }

        if !container
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            || container.starts_with('-')
            || container.ends_with('-')
            || container.contains("--")
        {
            return Err(ValidationError::InvalidFormat {
                field: "container".to_string(),
                message: "only lower-case letters, digits and single inner hyphens allowed"
                    .to_string(),
            });
        }

        if blob.is_empty() {
            return Err(ValidationError::Required {
                field: "blob".to_string(),
            });
        }

        if blob.len() > 1024 {
            return Err(ValidationError::OutOfRange {
                field: "blob".to_string(),
                message: "must be at most 1024 characters".to_string(),
            });
        }

        Ok(Self { container, blob })
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn blob(&self) -> &str {
        &self.blob
    }

    /// Resource path with a leading `/`; blob name segments are
    /// percent-encoded and `/` separators kept
    pub fn path(&self) -> String {
        let blob = self
            .blob
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("/{}/{}", self.container, blob)
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.blob)
    }
}

// ============================================================================
// Leases
// ============================================================================

/// Service-assigned lease identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(String);

impl LeaseId {
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "lease_id".to_string(),
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for LeaseId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Lease duration within the range the service accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseDuration(u32);

impl LeaseDuration {
    pub const MIN_SECONDS: u32 = 15;
    pub const MAX_SECONDS: u32 = 60;

    /// Validate a duration in seconds
    pub fn new(seconds: u32) -> Result<Self, ValidationError> {
        if !(Self::MIN_SECONDS..=Self::MAX_SECONDS).contains(&seconds) {
            return Err(ValidationError::OutOfRange {
                field: "lease_duration".to_string(),
                message: format!(
                    "must be between {} and {} seconds, got {}",
                    Self::MIN_SECONDS,
                    Self::MAX_SECONDS,
                    seconds
                ),
            });
        }
        Ok(Self(seconds))
    }

    pub fn seconds(&self) -> u32 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.0))
    }
}

impl TryFrom<u32> for LeaseDuration {
    type Error = ValidationError;

    fn try_from(seconds: u32) -> Result<Self, Self::Error> {
        Self::new(seconds)
    }
}

/// A lease obtained through [`LeaseManager::acquire`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub blob: BlobRef,
    pub id: LeaseId,
    pub duration: LeaseDuration,
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
