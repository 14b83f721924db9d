//! Error types for Service Bus and Blob Storage operations.

use std::time::Duration;
use thiserror::Error;

/// Every outcome of a service call that is not a success.
///
/// Application-level statuses are classified exactly once, when the response
/// arrives. Transport failures are retried inside the transport and only show
/// up here as [`ServiceError::Transport`] once the attempt budget is spent.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Resource not found: {resource} ({code})")]
    NotFound { resource: String, code: String },

    #[error("Resource is leased by another party: {resource}")]
    AlreadyLeased { resource: String },

    #[error("Lease precondition failed for {resource}: {code}")]
    LockedPrecondition { resource: String, code: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Service returned {status} for {resource}: {code} - {body}")]
    Api {
        resource: String,
        status: u16,
        code: String,
        body: String,
    },

    #[error("Transport failed after {attempts} attempt(s): {message}")]
    Transport { attempts: u32, message: String },

    #[error("Invalid response from service: {message}")]
    InvalidResponse { message: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl ServiceError {
    /// Build an [`ServiceError::Api`] from a rejected response.
    pub fn api(resource: impl Into<String>, status: u16, body: &[u8]) -> Self {
        Self::Api {
            resource: resource.into(),
            status,
            code: error_code(body),
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }

    /// Check if the error means another actor holds the resource.
    ///
    /// Callers can back off and retry on contention instead of treating it as
    /// a definitive failure.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            Self::AlreadyLeased { .. } | Self::LockedPrecondition { .. }
        )
    }

    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotFound { .. } => false,
            Self::AlreadyLeased { .. } => false,
            Self::LockedPrecondition { .. } => false,
            Self::Timeout { .. } => true,
            Self::Api { .. } => false,
            Self::Transport { .. } => true,
            Self::InvalidResponse { .. } => false,
            Self::Validation(_) => false,
            Self::Configuration(_) => false,
        }
    }

    /// HTTP status observed for this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NotFound { .. } => Some(404),
            Self::AlreadyLeased { .. } => Some(409),
            Self::LockedPrecondition { .. } => Some(412),
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Caller contract violations detected before any network call
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },

    #[error(
        "Operation '{operation}' needs a lock token; \
         message {message_id} was received in delete-on-read mode"
    )]
    MissingLockToken {
        operation: String,
        message_id: String,
    },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        Self::Parsing {
            message: err.to_string(),
        }
    }
}

/// Extract the service error code from a response body.
///
/// Storage answers with `<Error><Code>..</Code></Error>` XML while the JSON
/// services use a `code` member, sometimes nested under `error` or
/// `odata.error`. Empty or unparseable bodies yield an empty string.
pub fn error_code(body: &[u8]) -> String {
    let text = match std::str::from_utf8(body) {
        Ok(text) => text.trim_start_matches('\u{feff}').trim(),
        Err(_) => return String::new(),
    };

    if text.is_empty() {
        return String::new();
    }

    if text.starts_with('{') {
        return json_error_code(text).unwrap_or_default();
    }

    xml_error_code(text).unwrap_or_default()
}

fn json_error_code(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;

    let direct = |v: &serde_json::Value| {
        v.get("code")
            .or_else(|| v.get("Code"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
    };

    direct(&value)
        .or_else(|| value.get("error").and_then(direct))
        .or_else(|| value.get("odata.error").and_then(direct))
}

fn xml_error_code(text: &str) -> Option<String> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut in_code = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Code" => in_code = true,
            Ok(Event::Text(e)) if in_code => {
                return e.unescape().ok().map(|s| s.into_owned());
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Code" => in_code = false,
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
