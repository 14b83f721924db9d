//! Long-poll receive with timeout and cooperative cancellation.
//!
//! A receive issues one `messages/head` request at a time. The service holds
//! each request open for up to the wait hint and answers either 201 with a
//! message or 204 when nothing arrived. A 204 is never surfaced: the receiver
//! immediately issues the next attempt until a message arrives, the caller's
//! deadline passes or the caller's cancellation token fires.
//!
//! # Concurrency
//!
//! Each receiver serialises its receive calls through an async mutex, so at
//! most one receive request is outstanding per receiver. The attempt loop,
//! the deadline and the cancellation token race through [`race`]; whichever
//! loses is dropped, which aborts any in-flight HTTP request.

use super::message::{
    EntityPath, LockToken, Message, MessageId, ReceiveMode, BROKER_PROPERTIES,
};
use super::{rejection, ATOM_CONTENT_TYPE};
use crate::config::ServiceBusConfig;
use crate::error::{ServiceError, ValidationError};
use crate::race::{race, Settled};
use crate::signing::RequestTemplate;
use crate::transport::Transport;
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Client-side allowance on top of the server-side wait hint
pub const POLL_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

/// Result of a racing receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// A message arrived before the deadline and the cancellation signal
    Message(Message),

    /// The caller's deadline passed without a message
    TimedOut,

    /// The caller's cancellation token fired first
    Cancelled,
}

impl ReceiveOutcome {
    pub fn into_message(self) -> Option<Message> {
        match self {
            Self::Message(message) => Some(message),
            _ => None,
        }
    }
}

/// Receives messages from one queue or subscription
#[derive(Debug, Clone)]
pub struct LongPollReceiver {
    transport: Transport,
    entity: EntityPath,
    wait_hint: Duration,
    poll_lock: Arc<Mutex<()>>,
}

impl LongPollReceiver {
    /// Create a receiver for `entity`
    ///
    /// `wait_hint` is the server-side long-poll duration of each attempt and
    /// is sent in whole seconds.
    ///
    /// # Errors
    ///
    /// Returns a validation error for topics, which cannot be read directly,
    /// and for wait hints below one second.
    pub fn new(
        transport: Transport,
        entity: EntityPath,
        wait_hint: Duration,
    ) -> Result<Self, ValidationError> {
        if !entity.can_receive() {
            return Err(ValidationError::InvalidFormat {
                field: "entity".to_string(),
                message: format!(
                    "cannot receive from topic '{}', use one of its subscriptions",
                    entity
                ),
            });
        }

        if wait_hint.as_secs() == 0 {
            return Err(ValidationError::OutOfRange {
                field: "wait_hint".to_string(),
                message: "must be at least one second".to_string(),
            });
        }

        Ok(Self {
            transport,
            entity,
            wait_hint,
            poll_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Create a receiver from configuration
    pub fn from_config(
        config: &ServiceBusConfig,
        entity: EntityPath,
    ) -> Result<Self, ServiceError> {
        let transport = super::transport(config)?;
        Ok(Self::new(transport, entity, config.wait_hint())?)
    }

    pub fn entity(&self) -> &EntityPath {
        &self.entity
    }

    pub fn wait_hint(&self) -> Duration {
        self.wait_hint
    }

    /// Receive the next message, racing against `timeout` and `cancel`.
    ///
    /// The timeout is measured from this call and bounds the whole attempt
    /// loop, including the wait for a previous receive on this receiver.
    /// A timeout too large to express as an instant imposes no deadline.
    /// Without a timeout and a token the call only returns once a message
    /// arrives or the service rejects a request.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Api`] when the service answers with anything
    /// but 201 or 204, [`ServiceError::InvalidResponse`] when the message
    /// metadata cannot be parsed and [`ServiceError::Transport`] once a single
    /// attempt exhausted its transport retries.
    #[instrument(skip(self, mode, cancel), fields(entity = %self.entity, mode = %mode))]
    pub async fn receive(
        &self,
        mode: ReceiveMode,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<ReceiveOutcome, ServiceError> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        match race(self.poll_until_message(mode), deadline, cancel).await {
            Settled::Completed(Ok(message)) => {
                info!(message_id = %message.id, "Received message");
                Ok(ReceiveOutcome::Message(message))
            }
            Settled::Completed(Err(e)) => Err(e),
            Settled::DeadlineElapsed => {
                debug!(timeout = ?timeout, "Receive timed out");
                Ok(ReceiveOutcome::TimedOut)
            }
            Settled::Cancelled => {
                debug!("Receive cancelled");
                Ok(ReceiveOutcome::Cancelled)
            }
        }
    }

    /// Receive the next message within `budget`, without cancellation.
    ///
    /// The budget is spent in whole seconds across sequential attempts. Each
    /// attempt waits for the wait hint clamped to the remaining budget, and
    /// every empty answer deducts that wait from the budget.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Timeout`] once the budget is spent, otherwise
    /// the same errors as [`LongPollReceiver::receive`].
    #[instrument(skip(self, mode), fields(entity = %self.entity, mode = %mode))]
    pub async fn receive_bounded(
        &self,
        mode: ReceiveMode,
        budget: Duration,
    ) -> Result<Message, ServiceError> {
        let _polling = self.poll_lock.lock().await;

        let budget_seconds = budget.as_secs();
        let hint_seconds = self.wait_hint.as_secs();
        let mut spent = 0;

        while spent < budget_seconds {
            let wait = hint_seconds.min(budget_seconds - spent);
            if let Some(message) = self.poll_once(mode, Duration::from_secs(wait)).await? {
                info!(message_id = %message.id, "Received message");
                return Ok(message);
            }
            spent += wait;
            debug!(spent, budget_seconds, "Entity empty, polling again");
        }

        Err(ServiceError::Timeout { duration: budget })
    }

    /// Sequential attempts until one returns a message or fails
    async fn poll_until_message(&self, mode: ReceiveMode) -> Result<Message, ServiceError> {
        let _polling = self.poll_lock.lock().await;

        let mut empty_polls: u32 = 0;
        loop {
            if let Some(message) = self.poll_once(mode, self.wait_hint).await? {
                return Ok(message);
            }
            empty_polls += 1;
            debug!(empty_polls, "Entity empty, polling again");
        }
    }

    /// One `messages/head` request; `None` when the entity stayed empty
    async fn poll_once(
        &self,
        mode: ReceiveMode,
        wait: Duration,
    ) -> Result<Option<Message>, ServiceError> {
        let resource = format!("{}/messages/head", self.entity.path());
        let request = RequestTemplate::new(mode.method(), resource)
            .with_query("timeout", wait.as_secs().to_string())
            .with_header("Content-Type", ATOM_CONTENT_TYPE)
            .with_timeout(wait + POLL_TIMEOUT_MARGIN);

        let response = self.transport.execute(&request).await?;

        match response.status {
            201 => {
                let properties = response.header(BROKER_PROPERTIES).map(str::to_string);
                Message::from_response(mode, properties.as_deref(), response.body).map(Some)
            }
            204 => Ok(None),
            status => {
                warn!(status, "Receive rejected");
                Err(ServiceError::api(self.entity.to_string(), status, &response.body))
            }
        }
    }

    // ------------------------------------------------------------------------
    // Lock companions
    // ------------------------------------------------------------------------

    /// Make a peek-locked message visible to receivers again
    pub async fn unlock(&self, id: &MessageId, token: &LockToken) -> Result<(), ServiceError> {
        self.settle(Method::PUT, "unlock", id, token).await
    }

    /// Remove a peek-locked message
    pub async fn delete(&self, id: &MessageId, token: &LockToken) -> Result<(), ServiceError> {
        self.settle(Method::DELETE, "delete", id, token).await
    }

    /// Extend the lock on a peek-locked message
    pub async fn renew_lock(&self, id: &MessageId, token: &LockToken) -> Result<(), ServiceError> {
        self.settle(Method::POST, "renew_lock", id, token).await
    }

    /// [`LongPollReceiver::unlock`] for a received message
    pub async fn unlock_message(&self, message: &Message) -> Result<(), ServiceError> {
        let token = message.require_lock_token("unlock")?;
        self.unlock(&message.id, token).await
    }

    /// [`LongPollReceiver::delete`] for a received message
    pub async fn delete_message(&self, message: &Message) -> Result<(), ServiceError> {
        let token = message.require_lock_token("delete")?;
        self.delete(&message.id, token).await
    }

    /// [`LongPollReceiver::renew_lock`] for a received message
    pub async fn renew_message_lock(&self, message: &Message) -> Result<(), ServiceError> {
        let token = message.require_lock_token("renew_lock")?;
        self.renew_lock(&message.id, token).await
    }

    #[instrument(skip(self, method, token), fields(entity = %self.entity))]
    async fn settle(
        &self,
        method: Method,
        operation: &str,
        id: &MessageId,
        token: &LockToken,
    ) -> Result<(), ServiceError> {
        let resource = format!(
            "{}/messages/{}/{}",
            self.entity.path(),
            urlencoding::encode(id.as_str()),
            urlencoding::encode(token.as_str())
        );
        let request = RequestTemplate::new(method, resource.as_str())
            .with_header("Content-Type", ATOM_CONTENT_TYPE);

        let response = self.transport.execute(&request).await?;

        if response.status != 200 {
            warn!(status = response.status, operation, message_id = %id, "Lock operation rejected");
            return Err(rejection(
                resource.trim_start_matches('/'),
                response.status,
                &response.body,
            ));
        }

        debug!(operation, message_id = %id, "Lock operation succeeded");
        Ok(())
    }
}

#[cfg(test)]
#[path = "receiver_tests.rs"]
mod tests;
