//! Request descriptors and the shared-key signers that authorize them.
//!
//! Signing is a pure function of the request, its final URL, the secret and
//! the signing instant. The transport calls [`RequestSigner::sign`] again for
//! every attempt because the embedded timestamps expire quickly.
//!
//! ## Schemes
//!
//! - **SharedAccessSignature** (Service Bus): HMAC-SHA256 over the lower-cased,
//!   percent-encoded request URL and an expiry instant.
//! - **SharedKey** (Blob Storage): HMAC-SHA256 over the canonical string built
//!   from the verb, standard headers, `x-ms-*` headers and the resource path.
//!
//! ## References
//!
//! - [Service Bus SAS](https://learn.microsoft.com/azure/service-bus-messaging/service-bus-sas)
//! - [Storage Shared Key][shared-key]
//!
//! [shared-key]: https://learn.microsoft.com/rest/api/storageservices/authorize-with-shared-key

use crate::error::ConfigurationError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Method;
use sha2::Sha256;
use std::fmt;
use std::time::Duration;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the authorization token
pub const AUTHORIZATION: &str = "Authorization";

/// Validity window of a shared access signature
pub const SAS_VALIDITY_SECONDS: i64 = 300;

/// Standard headers that take part in the SharedKey string-to-sign, in order
const SHARED_KEY_STANDARD_HEADERS: [&str; 11] = [
    "content-encoding",
    "content-language",
    "content-length",
    "content-md5",
    "content-type",
    "date",
    "if-modified-since",
    "if-match",
    "if-none-match",
    "if-unmodified-since",
    "range",
];

// ============================================================================
// Request Template
// ============================================================================

/// Unsigned description of one logical call
///
/// Header names are stored as given; lookups are case-insensitive.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub timeout: Option<Duration>,
}

impl RequestTemplate {
    /// Create a template for `method` on the resource `path` (leading `/`)
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Bytes::new(),
            timeout: None,
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Full request URL below `endpoint`
    ///
    /// Query pairs keep their insertion order; values are percent-encoded.
    pub fn url(&self, endpoint: &str) -> String {
        let mut url = format!("{}{}", endpoint.trim_end_matches('/'), self.path);
        if !self.query.is_empty() {
            let query = self
                .query
                .iter()
                .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            url.push('?');
            url.push_str(&query);
        }
        url
    }
}

// ============================================================================
// Signer Trait
// ============================================================================

/// Produces the authorization headers for a request at a given instant
pub trait RequestSigner: Send + Sync + fmt::Debug {
    /// Headers to attach to `request`, which will be sent to `url`
    fn sign(
        &self,
        request: &RequestTemplate,
        url: &str,
        now: DateTime<Utc>,
    ) -> Vec<(String, String)>;
}

fn hmac_base64(key: &[u8], data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    BASE64.encode(mac.finalize().into_bytes())
}

// ============================================================================
// Shared Access Signature (Service Bus)
// ============================================================================

/// Signs Service Bus requests with a namespace or entity shared access key
#[derive(Clone)]
pub struct SharedAccessSignatureSigner {
    key_name: String,
    key: Zeroizing<String>,
}

impl SharedAccessSignatureSigner {
    pub fn new(key_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            key_name: key_name.into(),
            key: Zeroizing::new(key.into()),
        }
    }

    /// Build the `SharedAccessSignature ...` token for `url` expiring at `expiry`
    ///
    /// `expiry` is in unix seconds.
    pub fn token(&self, url: &str, expiry: i64) -> String {
        let resource = urlencoding::encode(url).to_lowercase();
        let string_to_sign = format!("{}\n{}", resource, expiry);
        let signature = hmac_base64(self.key.as_bytes(), string_to_sign.as_bytes());

        format!(
            "SharedAccessSignature sig={}&se={}&skn={}&sr={}",
            urlencoding::encode(&signature),
            expiry,
            self.key_name,
            resource
        )
    }
}

impl fmt::Debug for SharedAccessSignatureSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedAccessSignatureSigner")
            .field("key_name", &self.key_name)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl RequestSigner for SharedAccessSignatureSigner {
    fn sign(
        &self,
        _request: &RequestTemplate,
        url: &str,
        now: DateTime<Utc>,
    ) -> Vec<(String, String)> {
        let expiry = now.timestamp() + SAS_VALIDITY_SECONDS;
        vec![(AUTHORIZATION.to_string(), self.token(url, expiry))]
    }
}

// ============================================================================
// Shared Key (Blob Storage)
// ============================================================================

/// Signs Storage requests with the account key
#[derive(Clone)]
pub struct SharedKeySigner {
    account: String,
    key: Zeroizing<Vec<u8>>,
    api_version: String,
}

impl SharedKeySigner {
    /// Create a signer from the base64 account key
    pub fn new(
        account: impl Into<String>,
        account_key: &str,
        api_version: impl Into<String>,
    ) -> Result<Self, ConfigurationError> {
        let key = BASE64
            .decode(account_key.trim())
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("account key is not valid base64: {}", e),
            })?;

        Ok(Self {
            account: account.into(),
            key: Zeroizing::new(key),
            api_version: api_version.into(),
        })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Canonical string-to-sign for `request` once `x-ms-date` and
    /// `x-ms-version` are attached
    pub fn string_to_sign(&self, request: &RequestTemplate, date: &str) -> String {
        let mut lines: Vec<String> = Vec::with_capacity(16);
        lines.push(request.method.as_str().to_string());

        for name in SHARED_KEY_STANDARD_HEADERS {
            let value = match name {
                // Empty rather than "0" since API version 2015-02-21
                "content-length" => match request.body.len() {
                    0 => String::new(),
                    len => len.to_string(),
                },
                _ => request.header(name).unwrap_or_default().to_string(),
            };
            lines.push(value);
        }

        let mut ms_headers: Vec<(String, String)> = request
            .headers
            .iter()
            .filter(|(k, _)| k.to_ascii_lowercase().starts_with("x-ms-"))
            .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
            .chain([
                ("x-ms-date".to_string(), date.to_string()),
                ("x-ms-version".to_string(), self.api_version.clone()),
            ])
            .collect();
        ms_headers.sort();
        lines.extend(ms_headers.into_iter().map(|(k, v)| format!("{}:{}", k, v)));

        lines.push(format!("/{}{}", self.account, request.path));

        let mut params: Vec<(String, String)> = request
            .query
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();
        params.sort();
        lines.extend(params.into_iter().map(|(k, v)| format!("{}:{}", k, v)));

        lines.join("\n")
    }
}

impl fmt::Debug for SharedKeySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedKeySigner")
            .field("account", &self.account)
            .field("api_version", &self.api_version)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl RequestSigner for SharedKeySigner {
    fn sign(
        &self,
        request: &RequestTemplate,
        _url: &str,
        now: DateTime<Utc>,
    ) -> Vec<(String, String)> {
        let date = rfc1123(now);
        let string_to_sign = self.string_to_sign(request, &date);
        let signature = hmac_base64(&self.key, string_to_sign.as_bytes());

        vec![
            ("x-ms-date".to_string(), date),
            ("x-ms-version".to_string(), self.api_version.clone()),
            (
                AUTHORIZATION.to_string(),
                format!("SharedKey {}:{}", self.account, signature),
            ),
        ]
    }
}

/// Format an instant the way `x-ms-date` expects it
pub fn rfc1123(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
#[path = "signing_tests.rs"]
mod tests;
