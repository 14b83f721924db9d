//! Tests for the lease manager.

use super::*;
use crate::config::TransportConfig;
use crate::error::ValidationError;
use crate::signing::SharedKeySigner;
use std::sync::Arc;
use wiremock::matchers::{header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LEASE_ID: &str = "a8b6f0c2-7d5e-4b34-9f21-2c8c0c1f4e10";

fn manager_for(server: &MockServer) -> LeaseManager {
    let signer = SharedKeySigner::new("myaccount", "a2V5", "2016-05-31").unwrap();
    let transport =
        Transport::new(server.uri(), Arc::new(signer), TransportConfig::default()).unwrap();
    LeaseManager::new(transport)
}

fn job_lock() -> BlobRef {
    BlobRef::new("locks", "job.lock").unwrap()
}

fn lease_id() -> LeaseId {
    LeaseId::new(LEASE_ID).unwrap()
}

mod acquire_tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_returns_service_lease_id() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/locks/job.lock"))
            .and(query_param("comp", "lease"))
            .and(header("x-ms-lease-action", "acquire"))
            .and(header("x-ms-lease-duration", "30"))
            .and(header("x-ms-version", "2016-05-31"))
            .and(header_exists("x-ms-date"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(201).insert_header("x-ms-lease-id", LEASE_ID))
            .expect(1)
            .mount(&server)
            .await;

        // Act
        let lease = manager_for(&server).acquire(&job_lock(), 30).await.unwrap();

        // Assert
        assert_eq!(lease.id, lease_id());
        assert_eq!(lease.blob, job_lock());
        assert_eq!(lease.duration.seconds(), 30);
    }

    #[tokio::test]
    async fn test_every_valid_duration_is_sent_once() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(201).insert_header("x-ms-lease-id", LEASE_ID))
            .mount(&server)
            .await;

        let manager = manager_for(&server);
        for seconds in LeaseDuration::MIN_SECONDS..=LeaseDuration::MAX_SECONDS {
            manager.acquire(&job_lock(), seconds).await.unwrap();
        }

        let requests = server.received_requests().await.unwrap();
        let durations: Vec<u32> = requests
            .iter()
            .map(|request| {
                request.headers["x-ms-lease-duration"]
                    .to_str()
                    .unwrap()
                    .parse()
                    .unwrap()
            })
            .collect();
        assert_eq!(durations, (15..=60).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn test_out_of_range_duration_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(201).insert_header("x-ms-lease-id", LEASE_ID))
            .expect(0)
            .mount(&server)
            .await;

        let manager = manager_for(&server);
        for seconds in [0, 14, 61, 3600] {
            let result = manager.acquire(&job_lock(), seconds).await;
            assert!(matches!(
                result,
                Err(ServiceError::Validation(ValidationError::OutOfRange { .. }))
            ));
        }
    }

    #[tokio::test]
    async fn test_conflict_is_already_leased() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(409).set_body_string(
                concat!(
                    "<?xml version=\"1.0\" encoding=\"utf-8\"?>",
                    "<Error><Code>LeaseAlreadyPresent</Code></Error>"
                ),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let result = manager_for(&server).acquire(&job_lock(), 15).await;

        let error = result.unwrap_err();
        assert!(matches!(error, ServiceError::AlreadyLeased { .. }));
        assert!(error.is_contention());
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(404).set_body_string(
                concat!(
                    "<?xml version=\"1.0\" encoding=\"utf-8\"?>",
                    "<Error><Code>BlobNotFound</Code></Error>"
                ),
            ))
            .mount(&server)
            .await;

        let result = manager_for(&server).acquire(&job_lock(), 15).await;

        match result {
            Err(ServiceError::NotFound { resource, code }) => {
                assert_eq!(resource, "locks/job.lock");
                assert_eq!(code, "BlobNotFound");
            }
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_lease_id_header_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let result = manager_for(&server).acquire(&job_lock(), 15).await;

        assert!(matches!(result, Err(ServiceError::InvalidResponse { .. })));
    }
}

mod renew_release_tests {
    use super::*;

    #[tokio::test]
    async fn test_renew_and_release_send_lease_id() {
        let server = MockServer::start().await;
        for action in ["renew", "release"] {
            Mock::given(method("PUT"))
                .and(path("/locks/job.lock"))
                .and(query_param("comp", "lease"))
                .and(header("x-ms-lease-action", action))
                .and(header("x-ms-lease-id", LEASE_ID))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server)
                .await;
        }

        let manager = manager_for(&server);
        let lease = Lease {
            blob: job_lock(),
            id: lease_id(),
            duration: LeaseDuration::new(15).unwrap(),
        };

        manager.renew_lease(&lease).await.unwrap();
        manager.release_lease(lease).await.unwrap();
    }

    #[tokio::test]
    async fn test_superseded_lease_is_already_leased() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(409).set_body_string(
                "<Error><Code>LeaseIdMismatchWithLeaseOperation</Code></Error>",
            ))
            .mount(&server)
            .await;

        let manager = manager_for(&server);

        assert!(matches!(
            manager.renew(&job_lock(), &lease_id()).await,
            Err(ServiceError::AlreadyLeased { .. })
        ));
        assert!(matches!(
            manager.release(&job_lock(), &lease_id()).await,
            Err(ServiceError::AlreadyLeased { .. })
        ));
    }

    #[tokio::test]
    async fn test_release_on_deleted_blob_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = manager_for(&server).release(&job_lock(), &lease_id()).await;

        assert!(matches!(result, Err(ServiceError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_other_statuses_are_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                "<Error><Code>InvalidHeaderValue</Code></Error>",
            ))
            .mount(&server)
            .await;

        let result = manager_for(&server).renew(&job_lock(), &lease_id()).await;

        match result {
            Err(ServiceError::Api { status, code, .. }) => {
                assert_eq!(status, 400);
                assert_eq!(code, "InvalidHeaderValue");
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_renew_success_status_is_exact() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let result = manager_for(&server).renew(&job_lock(), &lease_id()).await;

        assert!(matches!(result, Err(ServiceError::Api { status: 201, .. })));
    }
}
