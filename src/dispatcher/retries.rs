//! Per-attempt interpretation of responses.
//!
//! [`assess`] turns one response into an [`Attempt`]: what the retry loop should do next,
//! how long the bucket stays locked, and whether every bucket must pause. Nothing here
//! touches shared state, the dispatcher applies the verdict.

use std::time::Duration;

use http::StatusCode;
use serde::Deserialize;

use super::{
    error::DispatchError,
    http::{InboundResponse, PROVENANCE, RATELIMIT_REMAINING, RATELIMIT_RESET_AFTER},
};

/// What the retry loop does after an attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Return this response to the caller.
    Success(InboundResponse),
    /// Try again, unless the budget is spent; the response is kept for the exhaustion error.
    Retry(InboundResponse),
    /// Stop and surface this error.
    Fail(DispatchError),
}

impl AttemptOutcome {
    pub const fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success(_))
    }

    pub const fn is_retry(&self) -> bool {
        matches!(self, AttemptOutcome::Retry(_))
    }
}

#[derive(Debug)]
pub struct Attempt {
    pub outcome: AttemptOutcome,
    /// How long the bucket stays locked after this attempt.
    pub release_after: Duration,
    /// Set when the server declared an account-wide limit: close the global gate this long.
    pub global_throttle: Option<Duration>,
}

impl Attempt {
    pub fn fail(error: DispatchError) -> Self {
        Self {
            outcome: AttemptOutcome::Fail(error),
            release_after: Duration::ZERO,
            global_throttle: None,
        }
    }

    fn new(outcome: AttemptOutcome, release_after: Duration) -> Self {
        Self {
            outcome,
            release_after,
            global_throttle: None,
        }
    }
}

/// The bucket headers present on every response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitHeaders {
    /// Defaults to 1 when absent, so a missing header never throttles.
    pub remaining: f64,
    /// Seconds; defaults to 0.
    pub reset_after: f64,
}

impl RateLimitHeaders {
    pub fn from_response(response: &InboundResponse) -> Self {
        Self {
            remaining: response.header_f64(RATELIMIT_REMAINING).unwrap_or(1.0),
            reset_after: response.header_f64(RATELIMIT_RESET_AFTER).unwrap_or(0.0),
        }
    }

    pub fn exhausted(&self) -> bool {
        self.remaining == 0.0
    }
}

/// Body of an authoritative 429.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RateLimitBody {
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub retry_after: f64,
}

/// Ceiling for any server-provided delay, so timer deadlines stay representable.
pub const MAX_SERVER_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Converts server-provided seconds, treating negative or non-finite values as zero.
pub fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::try_from_secs_f64(value)
            .unwrap_or(MAX_SERVER_DELAY)
            .min(MAX_SERVER_DELAY)
    } else {
        Duration::ZERO
    }
}

/// Backoff before retrying a 5xx: 1s, 3s, 5s, ...
pub fn server_error_backoff(attempt: usize) -> Duration {
    Duration::from_secs(1 + 2 * attempt as u64)
}

/// Interprets the response of attempt `attempt` (zero-based) out of `retries`.
///
/// - Any non-429 response reporting `remaining = 0` holds the bucket for `reset-after`,
///   even when it succeeded.
/// - 2xx succeeds.
/// - 429 without the provenance header fails with `RateLimitRejected`. Otherwise the body's
///   `retry_after` holds the bucket and, when `global`, the whole gate; the call is retried.
/// - 5xx is retried after `1 + 2 * attempt` seconds, or longer if the bucket is exhausted.
/// - Anything else fails with `Status`.
///
/// On the last attempt a retryable response releases the bucket at once: nobody from this
/// call is coming back for it.
pub fn assess(response: InboundResponse, attempt: usize, retries: usize) -> Attempt {
    let status = response.status();
    let last_attempt = attempt + 1 >= retries;
    let limits = RateLimitHeaders::from_response(&response);

    let mut release_after = Duration::ZERO;
    if status != StatusCode::TOO_MANY_REQUESTS && limits.exhausted() {
        release_after = seconds(limits.reset_after);
    }

    if status.is_success() {
        return Attempt::new(AttemptOutcome::Success(response), release_after);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        if !response.headers().contains_key(PROVENANCE) {
            return Attempt::fail(DispatchError::RateLimitRejected { response });
        }

        let body: RateLimitBody = match response.json() {
            Ok(body) => body,
            Err(source) => {
                return Attempt::fail(DispatchError::MalformedRateLimitBody { source, response });
            }
        };
        let retry_after = seconds(body.retry_after);
        return Attempt {
            outcome: AttemptOutcome::Retry(response),
            release_after: if last_attempt { Duration::ZERO } else { retry_after },
            global_throttle: body.global.then_some(retry_after),
        };
    }

    if status.is_server_error() {
        let backoff = release_after.max(server_error_backoff(attempt));
        return Attempt::new(
            AttemptOutcome::Retry(response),
            if last_attempt { Duration::ZERO } else { backoff },
        );
    }

    Attempt::new(
        AttemptOutcome::Fail(DispatchError::Status { response }),
        release_after,
    )
}
