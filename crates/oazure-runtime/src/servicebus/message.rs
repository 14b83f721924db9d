//! Service Bus identifiers, entity paths and received messages.

use crate::error::{ServiceError, ValidationError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Response header carrying the message metadata as JSON
pub const BROKER_PROPERTIES: &str = "BrokerProperties";

// ============================================================================
// Entity Paths
// ============================================================================

/// Location of a queue, topic or subscription within a namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityPath {
    Queue { name: String },
    Topic { name: String },
    Subscription { topic: String, subscription: String },
}

impl EntityPath {
    pub fn queue(name: impl Into<String>) -> Result<Self, ValidationError> {
        Ok(Self::Queue {
            name: validate_entity_name("queue", name.into())?,
        })
    }

    pub fn topic(name: impl Into<String>) -> Result<Self, ValidationError> {
        Ok(Self::Topic {
            name: validate_entity_name("topic", name.into())?,
        })
    }

    pub fn subscription(
        topic: impl Into<String>,
        subscription: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        Ok(Self::Subscription {
            topic: validate_entity_name("topic", topic.into())?,
            subscription: validate_entity_name("subscription", subscription.into())?,
        })
    }

    /// Resource path below the namespace endpoint, with a leading `/`
    pub fn path(&self) -> String {
        match self {
            Self::Queue { name } | Self::Topic { name } => format!("/{}", name),
            Self::Subscription {
                topic,
                subscription,
            } => format!("/{}/subscriptions/{}", topic, subscription),
        }
    }

    /// Topics only fan out; messages are read from their subscriptions
    pub fn can_receive(&self) -> bool {
        !matches!(self, Self::Topic { .. })
    }

    /// Subscriptions are fed by their topic and cannot be sent to directly
    pub fn can_send(&self) -> bool {
        !matches!(self, Self::Subscription { .. })
    }
}

impl fmt::Display for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path().trim_start_matches('/'))
    }
}

fn validate_entity_name(field: &str, name: String) -> Result<String, ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if name.len() > 260 {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            message: "must be 1-260 characters".to_string(),
        });
    }

    // Entity names may contain `/` to form hierarchies, but never at the edges
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '~'))
        || name.starts_with('/')
        || name.ends_with('/')
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "only ASCII alphanumeric, '-', '_', '.', '~' and inner '/' allowed"
                .to_string(),
        });
    }

    Ok(name)
}

// ============================================================================
// Identifiers
// ============================================================================

/// Service-assigned message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Claim check issued with a peek-locked message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockToken(String);

impl LockToken {
    pub fn new(token: impl Into<String>) -> Result<Self, ValidationError> {
        let token = token.into();
        if token.is_empty() {
            return Err(ValidationError::Required {
                field: "lock_token".to_string(),
            });
        }
        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LockToken {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// Receive Mode
// ============================================================================

/// How a receive treats the message at the head of the entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReceiveMode {
    /// Message stays enqueued but invisible until unlocked, deleted or expired
    PeekLock,

    /// Message is removed as it is read
    ReceiveAndDelete,
}

impl ReceiveMode {
    /// HTTP verb used on `messages/head`
    pub fn method(&self) -> Method {
        match self {
            Self::PeekLock => Method::POST,
            Self::ReceiveAndDelete => Method::DELETE,
        }
    }
}

impl fmt::Display for ReceiveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeekLock => write!(f, "peek-lock"),
            Self::ReceiveAndDelete => write!(f, "receive-and-delete"),
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Metadata the service returns in the `BrokerProperties` header
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BrokerProperties {
    message_id: Option<String>,
    lock_token: Option<String>,
    delivery_count: Option<u32>,
    sequence_number: Option<i64>,
    enqueued_time_utc: Option<String>,
    locked_until_utc: Option<String>,
}

/// A message taken from a queue or subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,

    /// Present only for peek-lock receives
    pub lock_token: Option<LockToken>,

    pub body: Bytes,
    pub delivery_count: Option<u32>,
    pub sequence_number: Option<i64>,
    pub enqueued_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl Message {
    /// Build a message from the `BrokerProperties` header and body of a
    /// successful receive.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidResponse`] when the header is missing,
    /// is not JSON, lacks `MessageId`, or lacks `LockToken` in peek-lock mode.
    pub fn from_response(
        mode: ReceiveMode,
        broker_properties: Option<&str>,
        body: Bytes,
    ) -> Result<Self, ServiceError> {
        let raw = broker_properties.ok_or_else(|| ServiceError::InvalidResponse {
            message: format!("missing {} header", BROKER_PROPERTIES),
        })?;

        let properties: BrokerProperties =
            serde_json::from_str(raw).map_err(|e| ServiceError::InvalidResponse {
                message: format!("malformed {} header: {}", BROKER_PROPERTIES, e),
            })?;

        let id = properties
            .message_id
            .and_then(|id| MessageId::new(id).ok())
            .ok_or_else(|| ServiceError::InvalidResponse {
                message: format!("{} without MessageId", BROKER_PROPERTIES),
            })?;

        let lock_token = match mode {
            ReceiveMode::PeekLock => Some(
                properties
                    .lock_token
                    .and_then(|token| LockToken::new(token).ok())
                    .ok_or_else(|| ServiceError::InvalidResponse {
                        message: format!("peek-lock receive of {} without LockToken", id),
                    })?,
            ),
            ReceiveMode::ReceiveAndDelete => None,
        };

        Ok(Self {
            id,
            lock_token,
            body,
            delivery_count: properties.delivery_count,
            sequence_number: properties.sequence_number,
            enqueued_at: properties.enqueued_time_utc.as_deref().and_then(parse_http_date),
            locked_until: properties.locked_until_utc.as_deref().and_then(parse_http_date),
        })
    }

    /// Lock token, or the error naming the operation that needed it
    pub fn require_lock_token(&self, operation: &str) -> Result<&LockToken, ValidationError> {
        self.lock_token
            .as_ref()
            .ok_or_else(|| ValidationError::MissingLockToken {
                operation: operation.to_string(),
                message_id: self.id.to_string(),
            })
    }

    /// Body as (lossy) UTF-8
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Parse an RFC 1123 timestamp such as `Wed, 02 Jul 2014 01:32:27 GMT`
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
