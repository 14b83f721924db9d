//! Lease-guarded blob write, delete and copy.
//!
//! Each operation optionally acts under a lease. The lease id is sent as
//! `x-ms-lease-id`, and a 412 answer means the blob is leased by someone
//! else (or the given lease is no longer current). That case surfaces as
//! [`ServiceError::LockedPrecondition`] so callers can tell contention from a
//! failed write.

use super::{BlobRef, LeaseId, LEASE_ID_HEADER, OCTET_STREAM};
use crate::config::BlobStorageConfig;
use crate::error::{error_code, ServiceError};
use crate::signing::RequestTemplate;
use crate::transport::{RawResponse, Transport};
use bytes::Bytes;
use reqwest::Method;
use tracing::{debug, instrument, warn};

/// State of a server-side copy started by [`BlobClient::copy_blob`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyStatus {
    /// `success` or `pending`, as reported in `x-ms-copy-status`
    pub status: String,

    /// Identifier of the copy operation
    pub copy_id: String,
}

impl CopyStatus {
    pub fn is_complete(&self) -> bool {
        self.status == "success"
    }
}

/// Blob operations against one storage account
#[derive(Debug, Clone)]
pub struct BlobClient {
    transport: Transport,
}

impl BlobClient {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub fn from_config(config: &BlobStorageConfig) -> Result<Self, ServiceError> {
        Ok(Self::new(super::transport(config)?))
    }

    /// Create or replace `blob` as a block blob holding `body`
    #[instrument(skip(self, blob, body, lease), fields(blob = %blob, leased = lease.is_some()))]
    pub async fn write_blob(
        &self,
        blob: &BlobRef,
        body: impl Into<Bytes>,
        lease: Option<&LeaseId>,
    ) -> Result<(), ServiceError> {
        let body = body.into();
        let size = body.len();
        let request = with_lease(
            RequestTemplate::new(Method::PUT, blob.path())
                .with_header("Content-Type", OCTET_STREAM)
                .with_header("x-ms-blob-type", "BlockBlob")
                .with_body(body),
            lease,
        );

        let response = self.transport.execute(&request).await?;
        expect_status(blob, 201, &response)?;

        debug!(size, "Blob written");
        Ok(())
    }

    /// Delete `blob` together with its snapshots
    #[instrument(skip(self, blob, lease), fields(blob = %blob, leased = lease.is_some()))]
    pub async fn delete_blob(
        &self,
        blob: &BlobRef,
        lease: Option<&LeaseId>,
    ) -> Result<(), ServiceError> {
        let request = with_lease(
            RequestTemplate::new(Method::DELETE, blob.path())
                .with_header("x-ms-delete-snapshots", "include"),
            lease,
        );

        let response = self.transport.execute(&request).await?;
        expect_status(blob, 202, &response)?;

        debug!("Blob deleted");
        Ok(())
    }

    /// Start a server-side copy of `source` onto `destination`
    ///
    /// `lease` guards the destination blob.
    #[instrument(skip(self, source, destination, lease), fields(
        source = %source,
        destination = %destination,
        leased = lease.is_some(),
    ))]
    pub async fn copy_blob(
        &self,
        source: &BlobRef,
        destination: &BlobRef,
        lease: Option<&LeaseId>,
    ) -> Result<CopyStatus, ServiceError> {
        let source_url = format!("{}{}", self.transport.endpoint(), source.path());
        let request = with_lease(
            RequestTemplate::new(Method::PUT, destination.path())
                .with_header("Content-Type", OCTET_STREAM)
                .with_header("x-ms-copy-source", source_url),
            lease,
        );

        let response = self.transport.execute(&request).await?;
        expect_status(destination, 202, &response)?;

        let header = |name: &str| {
            response
                .header(name)
                .map(str::to_string)
                .ok_or_else(|| ServiceError::InvalidResponse {
                    message: format!("copy onto {} accepted without {} header", destination, name),
                })
        };
        let status = CopyStatus {
            status: header("x-ms-copy-status")?,
            copy_id: header("x-ms-copy-id")?,
        };

        debug!(copy_id = %status.copy_id, copy_status = %status.status, "Blob copy started");
        Ok(status)
    }
}

fn with_lease(request: RequestTemplate, lease: Option<&LeaseId>) -> RequestTemplate {
    match lease {
        Some(id) => request.with_header(LEASE_ID_HEADER, id.as_str()),
        None => request,
    }
}

fn expect_status(
    blob: &BlobRef,
    expected: u16,
    response: &RawResponse,
) -> Result<(), ServiceError> {
    if response.status == expected {
        return Ok(());
    }

    let error = match response.status {
        404 => ServiceError::NotFound {
            resource: blob.to_string(),
            code: error_code(&response.body),
        },
        412 => ServiceError::LockedPrecondition {
            resource: blob.to_string(),
            code: error_code(&response.body),
        },
        status => ServiceError::api(blob.to_string(), status, &response.body),
    };

    warn!(status = response.status, error = %error, "Blob operation rejected");
    Err(error)
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
