//! # Oazure Runtime
//!
//! Hand-signed REST client for Azure Service Bus and Blob Storage.
//!
//! This library provides:
//! - Long-poll message receive that races a deadline and a cancellation token
//! - Peek-lock companions (unlock, delete, renew lock) and message send
//! - Blob lease acquire, renew and release with typed contention outcomes
//! - Lease-guarded blob write, delete and copy
//! - Shared Access Signature and Shared Key request signing
//!
//! ## Module Organization
//!
//! - [`error`] - Error taxonomy and service error-code extraction
//! - [`config`] - Configuration loading from files and the environment
//! - [`signing`] - Request templates and signers
//! - [`transport`] - Signed HTTP transport with transport-level retries
//! - [`race`] - First-of-three racing between an operation, a deadline and a token
//! - [`servicebus`] - Long-poll receiver, lock companions and sender
//! - [`blob`] - Lease manager and lease-guarded blob operations

pub mod blob;
pub mod config;
pub mod error;
pub mod race;
pub mod servicebus;
pub mod signing;
pub mod transport;

pub use blob::{BlobClient, BlobRef, CopyStatus, Lease, LeaseDuration, LeaseId, LeaseManager};
pub use config::{BlobStorageConfig, OazureConfig, Secret, ServiceBusConfig, TransportConfig};
pub use error::{error_code, ConfigurationError, ServiceError, ValidationError};
pub use race::{race, Settled};
pub use servicebus::{
    EntityPath, LockToken, LongPollReceiver, Message, MessageId, MessageSender, ReceiveMode,
    ReceiveOutcome,
};
pub use signing::{RequestSigner, RequestTemplate, SharedAccessSignatureSigner, SharedKeySigner};
pub use transport::{RawResponse, Transport};

// Re-exported so callers can cancel receives without a direct dependency
pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
