//! Sending messages to a queue or topic.

use super::message::EntityPath;
use super::{rejection, ATOM_CONTENT_TYPE};
use crate::config::ServiceBusConfig;
use crate::error::{ServiceError, ValidationError};
use crate::signing::RequestTemplate;
use crate::transport::Transport;
use bytes::Bytes;
use reqwest::Method;
use tracing::{debug, instrument, warn};

/// Sends messages to one queue or topic
#[derive(Debug, Clone)]
pub struct MessageSender {
    transport: Transport,
    entity: EntityPath,
}

impl MessageSender {
    /// Create a sender for `entity`
    ///
    /// Subscriptions are fed by their topic and are rejected.
    pub fn new(transport: Transport, entity: EntityPath) -> Result<Self, ValidationError> {
        if !entity.can_send() {
            return Err(ValidationError::InvalidFormat {
                field: "entity".to_string(),
                message: format!("cannot send to subscription '{}', send to its topic", entity),
            });
        }

        Ok(Self { transport, entity })
    }

    pub fn from_config(
        config: &ServiceBusConfig,
        entity: EntityPath,
    ) -> Result<Self, ServiceError> {
        let transport = super::transport(config)?;
        Ok(Self::new(transport, entity)?)
    }

    pub fn entity(&self) -> &EntityPath {
        &self.entity
    }

    /// Enqueue `body` as a new message
    #[instrument(skip(self, body), fields(entity = %self.entity))]
    pub async fn send(&self, body: impl Into<Bytes>) -> Result<(), ServiceError> {
        let body = body.into();
        let size = body.len();
        let request = RequestTemplate::new(Method::POST, format!("{}/messages", self.entity.path()))
            .with_header("Content-Type", ATOM_CONTENT_TYPE)
            .with_body(body);

        let response = self.transport.execute(&request).await?;

        if response.status != 201 {
            warn!(status = response.status, "Send rejected");
            return Err(rejection(&self.entity.to_string(), response.status, &response.body));
        }

        debug!(size, "Message sent");
        Ok(())
    }
}

#[cfg(test)]
#[path = "sender_tests.rs"]
mod tests;
