//! Byte-range requests with classification and bounded retry.
//!
//! Every HTTP outcome is mapped to a [`ResponseClass`] by one function, and
//! what happens next is decided by [`retry_policy`] from the class alone.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::auth::Credentials;
use crate::planner::ChunkPlanner;
use crate::transfer::TransferState;

/// Inclusive byte range `start..=end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Range of `len` bytes starting at `start`. `len` must be non-zero.
    pub fn new(start: u64, len: u64) -> Self {
        debug_assert!(len > 0, "empty byte range");
        Self {
            start,
            end: start + len.max(1) - 1,
        }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Classification of one request attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    PartialSuccess,
    RateLimited,
    Unsatisfiable,
    /// The host could not be reached at all.
    TransportFailure,
    /// Timeout or broken body; worth another try.
    Transient,
    OtherFatal,
}

/// What the fetcher does with a classified attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    Accept,
    Retry { enlarge: bool },
    Fail,
}

pub fn retry_policy(class: ResponseClass) -> RetryPolicy {
    match class {
        ResponseClass::PartialSuccess => RetryPolicy::Accept,
        ResponseClass::RateLimited => RetryPolicy::Retry { enlarge: true },
        ResponseClass::Transient => RetryPolicy::Retry { enlarge: false },
        ResponseClass::Unsatisfiable
        | ResponseClass::TransportFailure
        | ResponseClass::OtherFatal => RetryPolicy::Fail,
    }
}

/// Classify an HTTP response by status and, for 403, its body.
///
/// `200 OK` only counts as success for ranges starting at offset zero, where
/// a server that ignores `Range` still sends the right bytes first.
pub fn classify_status(status: StatusCode, body: &str, range_start: u64) -> ResponseClass {
    match status {
        StatusCode::PARTIAL_CONTENT => ResponseClass::PartialSuccess,
        StatusCode::OK if range_start == 0 => ResponseClass::PartialSuccess,
        StatusCode::TOO_MANY_REQUESTS => ResponseClass::RateLimited,
        StatusCode::FORBIDDEN if is_rate_limit_reason(body) => ResponseClass::RateLimited,
        StatusCode::RANGE_NOT_SATISFIABLE => ResponseClass::Unsatisfiable,
        _ => ResponseClass::OtherFatal,
    }
}

/// Classify a request that produced no response.
pub fn classify_transport(err: &reqwest::Error) -> ResponseClass {
    if err.is_builder() {
        ResponseClass::OtherFatal
    } else if err.is_connect() {
        ResponseClass::TransportFailure
    } else {
        ResponseClass::Transient
    }
}

/// Whether an error body names a rate or quota limit.
pub fn is_rate_limit_reason(body: &str) -> bool {
    let body = body.to_ascii_lowercase();
    ["ratelimit", "rate limit", "quotaexceeded", "quota exceeded", "dailylimitexceeded"]
        .iter()
        .any(|needle| body.contains(needle))
}

/// Why a transfer stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The server kept rate-limiting after every attempt.
    RateLimited { attempts: u32 },
    /// The server rejected the requested range (416).
    Unsatisfiable(String),
    /// Any other non-success status.
    Http { status: u16, message: String },
    /// The connection broke repeatedly mid-request.
    Transport(String),
    /// The host could not be reached.
    Unreachable(String),
    /// A success status arrived with no bytes.
    EmptyResponse,
}

impl FailureReason {
    /// Whether rerunning with resume can pick up from the partial file.
    pub fn is_resumable(&self) -> bool {
        !matches!(self, FailureReason::Unreachable(_))
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::RateLimited { attempts } => {
                write!(f, "rate limited after {} attempts", attempts)
            }
            FailureReason::Unsatisfiable(msg) => write!(f, "range not satisfiable: {}", msg),
            FailureReason::Http { status, message } => write!(f, "HTTP {}: {}", status, message),
            FailureReason::Transport(msg) => write!(f, "connection error: {}", msg),
            FailureReason::Unreachable(msg) => write!(f, "site unreachable: {}", msg),
            FailureReason::EmptyResponse => write!(f, "server returned an empty body"),
        }
    }
}

/// Outcome of one [`RangeFetcher::fetch`] call.
#[derive(Debug)]
pub enum ChunkResult {
    Success(Bytes),
    /// The attempt budget ran out while the server was still rate-limiting.
    RateLimited { attempts: u32 },
    PartialRangeUnsatisfiable(String),
    Fatal(FailureReason),
    Cancelled,
}

#[derive(Debug)]
struct AttemptError {
    class: ResponseClass,
    reason: FailureReason,
}

/// Issues range requests for one content URL at a time.
#[derive(Clone)]
pub struct RangeFetcher {
    http: Client,
    credentials: Credentials,
    planner: ChunkPlanner,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl RangeFetcher {
    pub fn new(
        http: Client,
        credentials: Credentials,
        planner: ChunkPlanner,
        max_attempts: u32,
        initial_backoff: Duration,
    ) -> Self {
        Self {
            http,
            credentials,
            planner,
            max_attempts: max_attempts.max(1),
            initial_backoff,
        }
    }

    pub fn planner(&self) -> &ChunkPlanner {
        &self.planner
    }

    /// Fetch `range` from `url`, retrying rate limits and transient errors.
    ///
    /// Rate-limit retries sleep for the state's backoff, which doubles on
    /// every consecutive retry, and may enlarge `state.chunk_size` for the
    /// chunks that follow. A successful fetch resets the backoff.
    pub async fn fetch(
        &self,
        url: &str,
        range: ByteRange,
        state: &mut TransferState,
        cancel: &CancellationToken,
    ) -> ChunkResult {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ChunkResult::Cancelled,
                outcome = self.attempt(url, range) => outcome,
            };

            let err = match outcome {
                Ok(bytes) => {
                    if attempt > 1 {
                        tracing::debug!(range = %range, attempts = attempt, "range fetched after retry");
                    }
                    state.reset_backoff();
                    return ChunkResult::Success(bytes);
                }
                Err(err) => err,
            };

            match retry_policy(err.class) {
                RetryPolicy::Retry { enlarge } if attempt < self.max_attempts => {
                    if enlarge {
                        if let Some(size) = self.planner.grow(state.chunk_size, state.bandwidth()) {
                            tracing::info!(from = state.chunk_size, to = size, "enlarging chunk size");
                            state.chunk_size = size;
                        }
                    }

                    let delay = state.next_backoff(self.initial_backoff);
                    tracing::warn!(
                        range = %range,
                        class = ?err.class,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "range request failed, retrying"
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return ChunkResult::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RetryPolicy::Retry { .. } => {
                    tracing::error!(range = %range, attempts = attempt, error = %err.reason, "retry budget exhausted");
                    return match err.class {
                        ResponseClass::RateLimited => ChunkResult::RateLimited { attempts: attempt },
                        _ => ChunkResult::Fatal(err.reason),
                    };
                }
                RetryPolicy::Fail | RetryPolicy::Accept => {
                    return match err.reason {
                        FailureReason::Unsatisfiable(msg) => ChunkResult::PartialRangeUnsatisfiable(msg),
                        reason => ChunkResult::Fatal(reason),
                    };
                }
            }
        }
    }

    async fn attempt(&self, url: &str, range: ByteRange) -> Result<Bytes, AttemptError> {
        let request = self.http.get(url).header(RANGE, range.header_value());

        let response = match self.credentials.authorize(request).send().await {
            Ok(response) => response,
            Err(e) => {
                let class = classify_transport(&e);
                let reason = if class == ResponseClass::TransportFailure {
                    FailureReason::Unreachable(e.to_string())
                } else {
                    FailureReason::Transport(e.to_string())
                };
                return Err(AttemptError { class, reason });
            }
        };

        let status = response.status();
        if status == StatusCode::PARTIAL_CONTENT || status == StatusCode::OK {
            if classify_status(status, "", range.start) != ResponseClass::PartialSuccess {
                return Err(AttemptError {
                    class: ResponseClass::OtherFatal,
                    reason: FailureReason::Http {
                        status: status.as_u16(),
                        message: format!("server ignored range {}", range),
                    },
                });
            }

            let mut bytes = response.bytes().await.map_err(|e| AttemptError {
                class: ResponseClass::Transient,
                reason: FailureReason::Transport(e.to_string()),
            })?;

            if bytes.is_empty() {
                return Err(AttemptError {
                    class: ResponseClass::OtherFatal,
                    reason: FailureReason::EmptyResponse,
                });
            }
            if status == StatusCode::PARTIAL_CONTENT && bytes.len() as u64 > range.len() {
                bytes.truncate(range.len() as usize);
            }
            return Ok(bytes);
        }

        let body = response.text().await.unwrap_or_default();
        let class = classify_status(status, &body, range.start);
        let message = if body.is_empty() {
            status.to_string()
        } else {
            body
        };
        let reason = match class {
            ResponseClass::Unsatisfiable => FailureReason::Unsatisfiable(message),
            _ => FailureReason::Http {
                status: status.as_u16(),
                message,
            },
        };
        Err(AttemptError { class, reason })
    }
}
