//! Signed HTTP transport shared by the Service Bus and Blob clients.
//!
//! The transport turns a [`RequestTemplate`] into a signed request, sends it
//! and hands back the raw status, headers and body. It never interprets the
//! status: mapping statuses to outcomes is done by the protocol modules.
//!
//! Failures below HTTP (connect, reset, client-side timeout, body read) are
//! retried up to [`TransportConfig::max_attempts`] times with a linear delay.
//! Every attempt is signed afresh because signatures embed the signing time.

use crate::config::TransportConfig;
use crate::error::{ConfigurationError, ServiceError};
use crate::signing::{RequestSigner, RequestTemplate};
use bytes::Bytes;
use chrono::Utc;
use reqwest::header::HeaderMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Correlation header attached to every logical call
pub const CLIENT_REQUEST_ID: &str = "x-ms-client-request-id";

/// Status, headers and body of one HTTP response
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    /// Header value as text, if present and valid
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Body decoded as (lossy) UTF-8
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP transport bound to one endpoint and one signer
#[derive(Debug, Clone)]
pub struct Transport {
    http: reqwest::Client,
    endpoint: String,
    signer: Arc<dyn RequestSigner>,
    settings: TransportConfig,
}

impl Transport {
    /// Create a transport for `endpoint`
    pub fn new(
        endpoint: impl Into<String>,
        signer: Arc<dyn RequestSigner>,
        settings: TransportConfig,
    ) -> Result<Self, ConfigurationError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("oazure/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            signer,
            settings,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn settings(&self) -> &TransportConfig {
        &self.settings
    }

    /// Send `request`, retrying transport failures
    ///
    /// Any HTTP status, including 4xx and 5xx, is returned as a response.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Transport`] once every attempt failed below HTTP.
    #[instrument(skip(self, request), fields(
        method = %request.method,
        path = %request.path,
        request_id = tracing::field::Empty,
    ))]
    pub async fn execute(&self, request: &RequestTemplate) -> Result<RawResponse, ServiceError> {
        let request_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("request_id", request_id.as_str());

        let url = request.url(&self.endpoint);
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.send_once(request, &url, &request_id).await {
                Ok(response) => {
                    debug!(status = response.status, attempt, "Received response");
                    return Ok(response);
                }
                Err(e) if attempt >= max_attempts => {
                    warn!(attempt, error = %e, "Transport failed, giving up");
                    return Err(ServiceError::Transport {
                        attempts: attempt,
                        message: describe(&e),
                    });
                }
                Err(e) => {
                    let delay = self.settings.retry_delay() * attempt;
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transport failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn send_once(
        &self,
        request: &RequestTemplate,
        url: &str,
        request_id: &str,
    ) -> Result<RawResponse, reqwest::Error> {
        let auth_headers = self.signer.sign(request, url, Utc::now());

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .timeout(request.timeout.unwrap_or_else(|| self.settings.request_timeout()))
            .header(CLIENT_REQUEST_ID, request_id);

        for (name, value) in request.headers.iter().chain(auth_headers.iter()) {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.body(request.body.clone()).send().await?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

fn describe(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("Request timeout: {}", error)
    } else if error.is_connect() {
        format!("Connection failed: {}", error)
    } else {
        format!("HTTP request failed: {}", error)
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
