//! Tests for RangeFetcher with mocked HTTP responses.

use std::time::Duration;

use drive_fetch::config::MIB;
use drive_fetch::fetcher::{ByteRange, ChunkResult, FailureReason, RangeFetcher};
use drive_fetch::planner::ChunkPlanner;
use drive_fetch::transfer::TransferState;
use drive_fetch::{Credentials, NetworkEnv, TransferConfig};
use mockito::Server;
use tokio_util::sync::CancellationToken;

fn fetcher(credentials: Credentials, max_attempts: u32) -> RangeFetcher {
    let config = TransferConfig::default();
    RangeFetcher::new(
        reqwest::Client::new(),
        credentials,
        ChunkPlanner::new(NetworkEnv::Generic, &config),
        max_attempts,
        Duration::from_millis(1),
    )
}

mod responses {
    use super::*;

    #[tokio::test]
    async fn partial_content_is_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/content")
            .match_header("range", "bytes=10-19")
            .with_status(206)
            .with_body("0123456789")
            .create_async()
            .await;

        let mut state = TransferState::new(10, 10);
        state.backoff = Duration::from_millis(400);
        let result = fetcher(Credentials::Anonymous, 3)
            .fetch(
                &format!("{}/content", server.url()),
                ByteRange::new(10, 10),
                &mut state,
                &CancellationToken::new(),
            )
            .await;

        match result {
            ChunkResult::Success(bytes) => assert_eq!(&bytes[..], b"0123456789"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(state.backoff, Duration::ZERO);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn bearer_token_is_sent() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/content")
            .match_header("authorization", "Bearer ya29.token")
            .with_status(206)
            .with_body("abc")
            .create_async()
            .await;

        let mut state = TransferState::new(0, 3);
        let result = fetcher(Credentials::Bearer("ya29.token".to_string()), 1)
            .fetch(
                &format!("{}/content", server.url()),
                ByteRange::new(0, 3),
                &mut state,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, ChunkResult::Success(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unsatisfiable_range_is_not_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/content")
            .with_status(416)
            .with_body("Requested range not satisfiable")
            .expect(1)
            .create_async()
            .await;

        let mut state = TransferState::new(0, 10);
        let result = fetcher(Credentials::Anonymous, 5)
            .fetch(
                &format!("{}/content", server.url()),
                ByteRange::new(100, 10),
                &mut state,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, ChunkResult::PartialRangeUnsatisfiable(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn permission_denied_is_fatal() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/content")
            .with_status(403)
            .with_body(r#"{"error":{"code":403,"message":"The user does not have sufficient permissions for this file."}}"#)
            .expect(1)
            .create_async()
            .await;

        let mut state = TransferState::new(0, 10);
        let result = fetcher(Credentials::Anonymous, 5)
            .fetch(
                &format!("{}/content", server.url()),
                ByteRange::new(0, 10),
                &mut state,
                &CancellationToken::new(),
            )
            .await;

        match result {
            ChunkResult::Fatal(FailureReason::Http { status, message }) => {
                assert_eq!(status, 403);
                assert!(message.contains("sufficient permissions"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn ignored_range_past_start_is_fatal() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/content")
            .with_status(200)
            .with_body("whole file")
            .create_async()
            .await;

        let mut state = TransferState::new(5, 10);
        let result = fetcher(Credentials::Anonymous, 3)
            .fetch(
                &format!("{}/content", server.url()),
                ByteRange::new(5, 5),
                &mut state,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            result,
            ChunkResult::Fatal(FailureReason::Http { status: 200, .. })
        ));
    }
}

mod rate_limits {
    use super::*;

    #[tokio::test]
    async fn retries_until_budget_is_spent() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/content")
            .with_status(429)
            .expect(4)
            .create_async()
            .await;

        let mut state = TransferState::new(0, 10);
        let result = fetcher(Credentials::Anonymous, 4)
            .fetch(
                &format!("{}/content", server.url()),
                ByteRange::new(0, 10),
                &mut state,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, ChunkResult::RateLimited { attempts: 4 }));
        // three sleeps: 1ms, 2ms, 4ms
        assert_eq!(state.backoff, Duration::from_millis(4));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn quota_forbidden_counts_as_rate_limit() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/content")
            .with_status(403)
            .with_body(r#"{"error":{"code":403,"message":"User Rate Limit Exceeded","errors":[{"reason":"userRateLimitExceeded"}]}}"#)
            .expect(2)
            .create_async()
            .await;

        let mut state = TransferState::new(0, 10);
        let result = fetcher(Credentials::Anonymous, 2)
            .fetch(
                &format!("{}/content", server.url()),
                ByteRange::new(0, 10),
                &mut state,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, ChunkResult::RateLimited { attempts: 2 }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fast_link_enlarges_chunk_on_rate_limit() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/content")
            .with_status(429)
            .create_async()
            .await;

        // pretend 64 MiB already arrived in this run
        let mut state = TransferState::new(0, 8 * MIB);
        state.bytes_written = 64 * MIB;

        let result = fetcher(Credentials::Anonymous, 2)
            .fetch(
                &format!("{}/content", server.url()),
                ByteRange::new(64 * MIB, 8 * MIB),
                &mut state,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, ChunkResult::RateLimited { .. }));
        assert_eq!(state.chunk_size, 16 * MIB);
    }

    #[tokio::test]
    async fn cancellation_stops_backoff() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/content")
            .with_status(429)
            .create_async()
            .await;

        let config = TransferConfig::default();
        let slow = RangeFetcher::new(
            reqwest::Client::new(),
            Credentials::Anonymous,
            ChunkPlanner::new(NetworkEnv::Generic, &config),
            10,
            Duration::from_secs(30),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let mut state = TransferState::new(0, 10);
        let started = std::time::Instant::now();
        let result = slow
            .fetch(
                &format!("{}/content", server.url()),
                ByteRange::new(0, 10),
                &mut state,
                &cancel,
            )
            .await;

        assert!(matches!(result, ChunkResult::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
