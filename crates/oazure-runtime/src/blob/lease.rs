//! Blob lease acquire, renew and release.
//!
//! Every call is single-shot. Contention is returned to the caller as
//! [`ServiceError::AlreadyLeased`] and never retried here; only transport
//! failures are retried, inside the [`Transport`].
//!
//! | Response | acquire | renew | release |
//! |----------|---------|-------|---------|
//! | success  | 201     | 200   | 200     |
//! | 404      | `NotFound` | `NotFound` | `NotFound` |
//! | 409      | `AlreadyLeased` | `AlreadyLeased` | `AlreadyLeased` |
//! | other    | `Api`   | `Api` | `Api`   |

use super::{BlobRef, Lease, LeaseDuration, LeaseId, LEASE_ID_HEADER, OCTET_STREAM};
use crate::config::BlobStorageConfig;
use crate::error::{error_code, ServiceError};
use crate::signing::RequestTemplate;
use crate::transport::{RawResponse, Transport};
use reqwest::Method;
use std::fmt;
use tracing::{info, instrument, warn};

const LEASE_ACTION_HEADER: &str = "x-ms-lease-action";
const LEASE_DURATION_HEADER: &str = "x-ms-lease-duration";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaseAction {
    Acquire,
    Renew,
    Release,
}

impl LeaseAction {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Acquire => "acquire",
            Self::Renew => "renew",
            Self::Release => "release",
        }
    }

    fn success_status(&self) -> u16 {
        match self {
            Self::Acquire => 201,
            Self::Renew | Self::Release => 200,
        }
    }
}

impl fmt::Display for LeaseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issues lease calls against one storage account
#[derive(Debug, Clone)]
pub struct LeaseManager {
    transport: Transport,
}

impl LeaseManager {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub fn from_config(config: &BlobStorageConfig) -> Result<Self, ServiceError> {
        Ok(Self::new(super::transport(config)?))
    }

    /// Acquire a lease on `blob` for `duration_seconds`
    ///
    /// The duration is validated before any request is sent.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Validation`] for a duration outside 15..=60 seconds
    /// - [`ServiceError::NotFound`] when the blob or container does not exist
    /// - [`ServiceError::AlreadyLeased`] when another party holds a lease
    /// - [`ServiceError::InvalidResponse`] when the service returns no lease id
    #[instrument(skip(self, blob), fields(blob = %blob))]
    pub async fn acquire(
        &self,
        blob: &BlobRef,
        duration_seconds: u32,
    ) -> Result<Lease, ServiceError> {
        let duration = LeaseDuration::new(duration_seconds)?;

        let request = lease_request(blob, LeaseAction::Acquire)
            .with_header(LEASE_DURATION_HEADER, duration.seconds().to_string());
        let response = self.transport.execute(&request).await?;
        check_lease_response(blob, LeaseAction::Acquire, &response)?;

        let id = response
            .header(LEASE_ID_HEADER)
            .and_then(|id| LeaseId::new(id).ok())
            .ok_or_else(|| ServiceError::InvalidResponse {
                message: format!("lease acquired on {} without {} header", blob, LEASE_ID_HEADER),
            })?;

        info!(lease_id = %id, duration = duration.seconds(), "Lease acquired");
        Ok(Lease {
            blob: blob.clone(),
            id,
            duration,
        })
    }

    /// Extend a held lease by its original duration
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::AlreadyLeased`] when `id` is no longer the
    /// current lease, e.g. after it expired and another party acquired it.
    #[instrument(skip(self, blob, id), fields(blob = %blob, lease_id = %id))]
    pub async fn renew(&self, blob: &BlobRef, id: &LeaseId) -> Result<(), ServiceError> {
        let request =
            lease_request(blob, LeaseAction::Renew).with_header(LEASE_ID_HEADER, id.as_str());
        let response = self.transport.execute(&request).await?;
        check_lease_response(blob, LeaseAction::Renew, &response)?;

        info!("Lease renewed");
        Ok(())
    }

    /// Give up a held lease
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] when the blob no longer exists and
    /// [`ServiceError::AlreadyLeased`] when `id` was superseded.
    #[instrument(skip(self, blob, id), fields(blob = %blob, lease_id = %id))]
    pub async fn release(&self, blob: &BlobRef, id: &LeaseId) -> Result<(), ServiceError> {
        let request =
            lease_request(blob, LeaseAction::Release).with_header(LEASE_ID_HEADER, id.as_str());
        let response = self.transport.execute(&request).await?;
        check_lease_response(blob, LeaseAction::Release, &response)?;

        info!("Lease released");
        Ok(())
    }

    /// [`LeaseManager::renew`] for a lease from [`LeaseManager::acquire`]
    pub async fn renew_lease(&self, lease: &Lease) -> Result<(), ServiceError> {
        self.renew(&lease.blob, &lease.id).await
    }

    /// [`LeaseManager::release`] for a lease from [`LeaseManager::acquire`]
    pub async fn release_lease(&self, lease: Lease) -> Result<(), ServiceError> {
        self.release(&lease.blob, &lease.id).await
    }
}

fn lease_request(blob: &BlobRef, action: LeaseAction) -> RequestTemplate {
    RequestTemplate::new(Method::PUT, blob.path())
        .with_query("comp", "lease")
        .with_header("Content-Type", OCTET_STREAM)
        .with_header(LEASE_ACTION_HEADER, action.as_str())
}

fn check_lease_response(
    blob: &BlobRef,
    action: LeaseAction,
    response: &RawResponse,
) -> Result<(), ServiceError> {
    if response.status == action.success_status() {
        return Ok(());
    }

    let error = match response.status {
        404 => ServiceError::NotFound {
            resource: blob.to_string(),
            code: error_code(&response.body),
        },
        409 => ServiceError::AlreadyLeased {
            resource: blob.to_string(),
        },
        status => ServiceError::api(blob.to_string(), status, &response.body),
    };

    warn!(status = response.status, action = %action, error = %error, "Lease call rejected");
    Err(error)
}

#[cfg(test)]
#[path = "lease_tests.rs"]
mod tests;
