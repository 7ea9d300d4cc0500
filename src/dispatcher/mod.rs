//! Dispatch requests against a bucketed, rate-limited API.

pub mod attachment;
pub mod bucket;
pub mod config;
pub mod error;
pub mod gate;
pub mod http;
pub mod internal_event;
pub mod registry;
pub mod reqwest_integration;
pub mod request;
pub mod retries;

use std::{sync::Arc, time::Duration};

use snafu::{ResultExt, ensure};
use tower::{Service, ServiceExt};

pub use self::config::DispatcherConfig;
pub use self::error::DispatchError;
use self::{
    error::{AttemptAbortedSnafu, InvalidRequestSnafu},
    gate::GlobalThrottleGate,
    http::{HttpError, InboundResponse, PreparedRequest},
    internal_event::{InternalEvent, RateLimitRejected, ResponseReceived, RetriesExhausted, RetryScheduled},
    registry::{BucketGuard, LockRegistry},
    reqwest_integration::ReqwestService,
    request::OutboundRequest,
    retries::{Attempt, AttemptOutcome},
};

/// Serializes requests per bucket, honors the global throttle, and retries.
///
/// Share one dispatcher (e.g. behind an `Arc`) between every caller using the same
/// credential: its buckets and gate only protect the requests that go through it.
#[derive(Debug)]
pub struct Dispatcher<S = ReqwestService> {
    transport: S,
    buckets: Arc<LockRegistry>,
    gate: Arc<GlobalThrottleGate>,
    base_url: String,
    default_retries: usize,
}

impl Dispatcher<ReqwestService> {
    pub fn new(config: DispatcherConfig) -> Self {
        let transport = ReqwestService::new(&config);
        Self::with_transport(&config, transport)
    }

    /// Releases the HTTP session. Call once in-flight dispatches have finished; a later
    /// dispatch opens a new session.
    pub fn close(&self) {
        self.transport.close_session();
    }
}

impl<S> Dispatcher<S>
where
    S: Service<PreparedRequest, Response = InboundResponse, Error = HttpError> + Clone + Send + Sync + 'static,
    S::Future: Send,
{
    pub fn with_transport(config: &DispatcherConfig, transport: S) -> Self {
        Self {
            transport,
            buckets: Arc::new(LockRegistry::new(config.bucket_capacity)),
            gate: Arc::new(GlobalThrottleGate::new()),
            base_url: config.base_url.clone(),
            default_retries: config.default_retries,
        }
    }

    pub fn transport(&self) -> &S {
        &self.transport
    }

    pub fn buckets(&self) -> &LockRegistry {
        &self.buckets
    }

    pub fn gate(&self) -> &GlobalThrottleGate {
        &self.gate
    }

    /// Sends `request`, retrying within its attempt budget.
    ///
    /// Each attempt holds the bucket lock from before the global-gate wait until its
    /// scheduled release, on every exit path. Returns the first 2xx response unmodified.
    ///
    /// Once an attempt reaches the transport it runs on its own task: dropping the returned
    /// future abandons the result, but the request still completes and its response still
    /// decides when the bucket frees up.
    pub async fn dispatch(&self, request: OutboundRequest) -> Result<InboundResponse, DispatchError> {
        let OutboundRequest {
            route,
            body,
            mut files,
            reason,
            retries,
        } = request;
        let retries = retries.unwrap_or(self.default_retries);
        ensure!(
            retries > 0,
            InvalidRequestSnafu {
                details: "at least one attempt is required"
            }
        );

        let bucket = route.bucket();
        let url = route.url(&self.base_url)?;
        let headers = request::request_headers(reason.as_deref())?;

        let mut last_response = None;
        for attempt in 0..retries {
            let guard = self.buckets.acquire(&bucket).await;
            self.gate.wait().await;

            let payload = match request::build_payload(body.as_ref(), &mut files, attempt).await {
                Ok(payload) => payload,
                Err(error) => {
                    self.buckets.schedule_release(guard, Duration::ZERO);
                    return Err(error);
                }
            };
            let prepared = PreparedRequest {
                method: route.method().clone(),
                url: url.clone(),
                headers: headers.clone(),
                payload,
            };

            let in_flight = tokio::spawn(complete_attempt(
                self.transport.clone(),
                Arc::clone(&self.buckets),
                Arc::clone(&self.gate),
                guard,
                prepared,
                attempt,
                retries,
            ));
            let Attempt {
                outcome,
                release_after,
                ..
            } = in_flight.await.context(AttemptAbortedSnafu)?;

            match outcome {
                AttemptOutcome::Success(response) => return Ok(response),
                AttemptOutcome::Retry(response) => {
                    RetryScheduled {
                        bucket: &bucket,
                        status: response.status(),
                        delay: release_after,
                        attempt,
                    }
                    .emit();
                    last_response = Some(response);
                }
                AttemptOutcome::Fail(error) => {
                    if error.is_rate_limit_rejected() {
                        RateLimitRejected { bucket: &bucket }.emit();
                    }
                    return Err(error);
                }
            }
        }

        match last_response {
            Some(response) => {
                RetriesExhausted {
                    bucket: &bucket,
                    attempts: retries,
                    status: response.status(),
                }
                .emit();
                Err(DispatchError::RetriesExhausted {
                    attempts: retries,
                    response,
                })
            }
            // Every iteration either returns or records a response.
            None => InvalidRequestSnafu {
                details: "no attempt was made",
            }
            .fail(),
        }
    }
}

/// Sends one attempt and applies its verdict: closes the gate on a global limit and
/// schedules the bucket's release. Owns the guard, so it finishes even if the caller is gone.
async fn complete_attempt<S>(
    transport: S,
    buckets: Arc<LockRegistry>,
    gate: Arc<GlobalThrottleGate>,
    guard: BucketGuard,
    request: PreparedRequest,
    index: usize,
    retries: usize,
) -> Attempt
where
    S: Service<PreparedRequest, Response = InboundResponse, Error = HttpError>,
{
    let attempt = match transport.oneshot(request).await {
        Ok(response) => {
            ResponseReceived {
                bucket: guard.key(),
                status: response.status(),
                attempt: index,
            }
            .emit();
            retries::assess(response, index, retries)
        }
        Err(source) => Attempt::fail(DispatchError::Transport { source }),
    };

    if let Some(duration) = attempt.global_throttle {
        gate.close(duration);
    }
    buckets.schedule_release(guard, attempt.release_after);
    attempt
}
