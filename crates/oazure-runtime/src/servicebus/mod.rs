//! Service Bus REST client: long-poll receive, lock companions and send.
//!
//! Entities are addressed through [`EntityPath`] values; the receiver and the
//! sender only ever see the resolved path, never the queue/topic distinction.

use crate::config::ServiceBusConfig;
use crate::error::{ConfigurationError, ServiceError};
use crate::signing::SharedAccessSignatureSigner;
use crate::transport::Transport;
use std::sync::Arc;

pub mod message;
pub mod receiver;
pub mod sender;

pub use message::{EntityPath, LockToken, Message, MessageId, ReceiveMode, BROKER_PROPERTIES};
pub use receiver::{LongPollReceiver, ReceiveOutcome};
pub use sender::MessageSender;

/// Content type the service expects on every request with a verb other than GET
pub const ATOM_CONTENT_TYPE: &str = "application/atom+xml;type=entry;charset=utf-8";

/// Transport signed with the namespace's shared access key
pub fn transport(config: &ServiceBusConfig) -> Result<Transport, ConfigurationError> {
    config.validate()?;

    let signer =
        SharedAccessSignatureSigner::new(config.key_name.clone(), config.key_value.expose());
    Transport::new(config.endpoint(), Arc::new(signer), config.transport.clone())
}

/// Classify a rejected Service Bus response
pub(crate) fn rejection(resource: &str, status: u16, body: &[u8]) -> ServiceError {
    match status {
        404 => ServiceError::NotFound {
            resource: resource.to_string(),
            code: crate::error::error_code(body),
        },
        _ => ServiceError::api(resource, status, body),
    }
}
