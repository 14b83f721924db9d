//! Common test utilities for oazure-runtime integration tests
//!
//! This module provides:
//! - A stateful in-memory Service Bus queue served through wiremock
//! - A stateful in-memory Blob Storage account with lease semantics
//! - Helpers that point runtime clients at those simulations

use oazure_runtime::{BlobStorageConfig, ServiceBusConfig, TransportConfig};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Transport settings that fail fast instead of backing off
#[allow(dead_code)]
pub fn fast_transport() -> TransportConfig {
    TransportConfig {
        max_attempts: 2,
        retry_delay_ms: 10,
        request_timeout_seconds: 5,
    }
}

fn header<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request.headers.get(name).and_then(|v| v.to_str().ok())
}

fn storage_error(status: u16, code: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_string(format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
         <Error><Code>{}</Code><Message>simulated</Message></Error>",
        code
    ))
}

// ============================================================================
// Simulated Service Bus Queue
// ============================================================================

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    body: String,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    available: VecDeque<StoredMessage>,
    locked: HashMap<String, (String, StoredMessage)>,
    deleted: Vec<String>,
}

/// In-memory queue answering the Service Bus REST receive protocol
#[derive(Clone)]
#[allow(dead_code)]
pub struct SimulatedQueue {
    name: String,
    empty_poll_delay: Duration,
    state: Arc<Mutex<QueueState>>,
}

#[allow(dead_code)]
impl SimulatedQueue {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            empty_poll_delay: Duration::from_millis(200),
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    pub fn enqueue(&self, id: &str, body: &str) {
        self.state.lock().unwrap().available.push_back(StoredMessage {
            id: id.to_string(),
            body: body.to_string(),
            delivery_count: 0,
        });
    }

    pub fn available(&self) -> usize {
        self.state.lock().unwrap().available.len()
    }

    pub fn locked(&self) -> usize {
        self.state.lock().unwrap().locked.len()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// Start a mock server that serves this queue
    pub async fn serve(&self) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(self.clone())
            .mount(&server)
            .await;
        server
    }

    fn receive(&self, request: &Request, delete_on_read: bool) -> ResponseTemplate {
        let timeout_present = request.url.query_pairs().any(|(name, _)| name == "timeout");
        if !timeout_present {
            return ResponseTemplate::new(400);
        }

        let mut state = self.state.lock().unwrap();
        let Some(mut message) = state.available.pop_front() else {
            return ResponseTemplate::new(204).set_delay(self.empty_poll_delay);
        };
        message.delivery_count += 1;

        let mut properties = serde_json::json!({
            "MessageId": message.id,
            "DeliveryCount": message.delivery_count,
            "SequenceNumber": 1,
        });

        if delete_on_read {
            state.deleted.push(message.id.clone());
        } else {
            let token = uuid::Uuid::new_v4().to_string();
            properties["LockToken"] = serde_json::Value::String(token.clone());
            properties["LockedUntilUtc"] =
                serde_json::Value::String("Mon, 01 Jan 2024 00:01:00 GMT".to_string());
            state.locked.insert(message.id.clone(), (token, message.clone()));
        }

        ResponseTemplate::new(201)
            .insert_header("BrokerProperties", properties.to_string().as_str())
            .set_body_string(message.body)
    }

    fn settle(&self, method: &str, id: &str, token: &str) -> ResponseTemplate {
        let mut state = self.state.lock().unwrap();

        let holds_lock = matches!(state.locked.get(id), Some((current, _)) if current == token);
        if !holds_lock {
            return ResponseTemplate::new(404);
        }

        match method {
            "DELETE" => {
                state.locked.remove(id);
                state.deleted.push(id.to_string());
            }
            "PUT" => {
                if let Some((_, message)) = state.locked.remove(id) {
                    state.available.push_front(message);
                }
            }
            "POST" => {}
            _ => return ResponseTemplate::new(405),
        }

        ResponseTemplate::new(200)
    }
}

impl Respond for SimulatedQueue {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let authorization = header(request, "authorization");
        if authorization.map_or(true, |v| !v.starts_with("SharedAccessSignature ")) {
            return ResponseTemplate::new(401);
        }

        let prefix = format!("/{}/messages/", self.name);
        let Some(rest) = request.url.path().strip_prefix(prefix.as_str()) else {
            return ResponseTemplate::new(404);
        };

        let method = request.method.as_str();
        match (method, rest.split('/').collect::<Vec<_>>().as_slice()) {
            ("POST", ["head"]) => self.receive(request, false),
            ("DELETE", ["head"]) => self.receive(request, true),
            (method, [id, token]) => self.settle(method, id, token),
            _ => ResponseTemplate::new(400),
        }
    }
}

/// Service Bus settings pointed at `server`
#[allow(dead_code)]
pub fn service_bus_config(server: &MockServer) -> ServiceBusConfig {
    ServiceBusConfig::new("contoso", "RootManageSharedAccessKey", "c2VjcmV0")
        .with_endpoint(server.uri())
        .with_wait_hint(Duration::from_secs(1))
        .with_transport(fast_transport())
}

// ============================================================================
// Simulated Blob Storage
// ============================================================================

#[derive(Debug, Default)]
struct BlobState {
    blobs: HashMap<String, String>,
    leases: HashMap<String, String>,
}

/// In-memory storage account with exclusive blob leases
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct SimulatedStorage {
    state: Arc<Mutex<BlobState>>,
}

#[allow(dead_code)]
impl SimulatedStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: &str, content: &str) {
        self.state
            .lock()
            .unwrap()
            .blobs
            .insert(path.to_string(), content.to_string());
    }

    pub fn content(&self, path: &str) -> Option<String> {
        self.state.lock().unwrap().blobs.get(path).cloned()
    }

    pub fn is_leased(&self, path: &str) -> bool {
        self.state.lock().unwrap().leases.contains_key(path)
    }

    pub async fn serve(&self) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(self.clone())
            .mount(&server)
            .await;
        server
    }

    fn lease(&self, path: &str, request: &Request) -> ResponseTemplate {
        let mut state = self.state.lock().unwrap();
        if !state.blobs.contains_key(path) {
            return storage_error(404, "BlobNotFound");
        }

        let presented = header(request, "x-ms-lease-id");
        let current = state.leases.get(path).cloned();

        match header(request, "x-ms-lease-action") {
            Some("acquire") => {
                if current.is_some() {
                    return storage_error(409, "LeaseAlreadyPresent");
                }
                let id = uuid::Uuid::new_v4().to_string();
                state.leases.insert(path.to_string(), id.clone());
                ResponseTemplate::new(201).insert_header("x-ms-lease-id", id.as_str())
            }
            Some("renew") => match current {
                Some(id) if Some(id.as_str()) == presented => ResponseTemplate::new(200),
                _ => storage_error(409, "LeaseIdMismatchWithLeaseOperation"),
            },
            Some("release") => match current {
                Some(id) if Some(id.as_str()) == presented => {
                    state.leases.remove(path);
                    ResponseTemplate::new(200)
                }
                _ => storage_error(409, "LeaseIdMismatchWithLeaseOperation"),
            },
            _ => storage_error(400, "InvalidHeaderValue"),
        }
    }

    /// Lease guard shared by write, delete and copy
    fn guard(state: &BlobState, path: &str, request: &Request) -> Option<ResponseTemplate> {
        let presented = header(request, "x-ms-lease-id");
        match (state.leases.get(path), presented) {
            (Some(_), None) => Some(storage_error(412, "LeaseIdMissing")),
            (Some(id), Some(presented)) if id != presented => {
                Some(storage_error(412, "LeaseIdMismatchWithBlobOperation"))
            }
            (None, Some(_)) => Some(storage_error(412, "LeaseNotPresentWithBlobOperation")),
            _ => None,
        }
    }
}

impl Respond for SimulatedStorage {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        if header(request, "authorization").map_or(true, |v| !v.starts_with("SharedKey ")) {
            return storage_error(403, "AuthenticationFailed");
        }

        let path = request.url.path().trim_start_matches('/').to_string();
        let is_lease = request
            .url
            .query_pairs()
            .any(|(name, value)| name == "comp" && value == "lease");
        if is_lease {
            return self.lease(&path, request);
        }

        let mut state = self.state.lock().unwrap();
        match request.method.as_str() {
            "PUT" => {
                if let Some(rejection) = Self::guard(&state, &path, request) {
                    return rejection;
                }
                if let Some(source) = header(request, "x-ms-copy-source") {
                    let source_path = url_path(source);
                    let Some(content) = state.blobs.get(&source_path).cloned() else {
                        return storage_error(404, "CannotVerifyCopySource");
                    };
                    state.blobs.insert(path, content);
                    return ResponseTemplate::new(202)
                        .insert_header("x-ms-copy-status", "success")
                        .insert_header("x-ms-copy-id", uuid::Uuid::new_v4().to_string().as_str());
                }
                let body = String::from_utf8_lossy(&request.body).into_owned();
                state.blobs.insert(path, body);
                ResponseTemplate::new(201)
            }
            "DELETE" => {
                if !state.blobs.contains_key(&path) {
                    return storage_error(404, "BlobNotFound");
                }
                if let Some(rejection) = Self::guard(&state, &path, request) {
                    return rejection;
                }
                state.blobs.remove(&path);
                state.leases.remove(&path);
                ResponseTemplate::new(202)
            }
            _ => storage_error(405, "UnsupportedHttpVerb"),
        }
    }
}

/// Path of an absolute URL without its leading slash
fn url_path(url: &str) -> String {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    without_scheme
        .split_once('/')
        .map_or(String::new(), |(_, path)| path.to_string())
}

/// Blob Storage settings pointed at `server`
#[allow(dead_code)]
pub fn blob_storage_config(server: &MockServer) -> BlobStorageConfig {
    BlobStorageConfig::new("devstoreaccount1", "a2V5")
        .with_endpoint(server.uri())
        .with_transport(fast_transport())
}
