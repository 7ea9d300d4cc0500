use std::time::Duration;

use http::StatusCode;
use metrics::{counter, gauge, histogram};

use super::InternalEvent;
use crate::dispatcher::bucket::BucketKey;

#[derive(Debug)]
pub struct ResponseReceived<'a> {
    pub bucket: &'a BucketKey,
    pub status: StatusCode,
    pub attempt: usize,
}

impl InternalEvent for ResponseReceived<'_> {
    fn emit(self) {
        trace!(
            target: "bucket_dispatch::dispatch",
            bucket = %self.bucket,
            status = self.status.as_u16(),
            attempt = self.attempt,
            "Response received"
        );
        counter!(
            "bucket_dispatch_requests_total",
            "status" => self.status.as_u16().to_string()
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct RetryScheduled<'a> {
    pub bucket: &'a BucketKey,
    pub status: StatusCode,
    pub delay: Duration,
    pub attempt: usize,
}

impl InternalEvent for RetryScheduled<'_> {
    fn emit(self) {
        warn!(
            target: "bucket_dispatch::dispatch",
            bucket = %self.bucket,
            status = self.status.as_u16(),
            delay_ms = self.delay.as_millis() as u64,
            attempt = self.attempt,
            "Retryable response; attempting again once the bucket frees up"
        );
        counter!(
            "bucket_dispatch_retries_total",
            "status" => self.status.as_u16().to_string()
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct GlobalThrottleEngaged {
    pub duration: Duration,
}

impl InternalEvent for GlobalThrottleEngaged {
    fn emit(self) {
        warn!(
            target: "bucket_dispatch::dispatch",
            duration_ms = self.duration.as_millis() as u64,
            "Global rate limit hit; pausing all buckets"
        );
        counter!("bucket_dispatch_global_throttles_total").increment(1);
    }
}

#[derive(Debug)]
pub struct ReleaseScheduled<'a> {
    pub bucket: &'a BucketKey,
    pub delay: Duration,
}

impl InternalEvent for ReleaseScheduled<'_> {
    fn emit(self) {
        if !self.delay.is_zero() {
            debug!(
                target: "bucket_dispatch::dispatch",
                bucket = %self.bucket,
                delay_ms = self.delay.as_millis() as u64,
                "Holding bucket until its window resets"
            );
        }
        histogram!("bucket_dispatch_release_delay_seconds").record(self.delay.as_secs_f64());
    }
}

#[derive(Debug)]
pub struct RateLimitRejected<'a> {
    pub bucket: &'a BucketKey,
}

impl InternalEvent for RateLimitRejected<'_> {
    fn emit(self) {
        error!(
            target: "bucket_dispatch::dispatch",
            bucket = %self.bucket,
            "429 without provenance header; not retrying"
        );
        counter!("bucket_dispatch_rejected_total").increment(1);
    }
}

#[derive(Debug)]
pub struct RetriesExhausted<'a> {
    pub bucket: &'a BucketKey,
    pub attempts: usize,
    pub status: StatusCode,
}

impl InternalEvent for RetriesExhausted<'_> {
    fn emit(self) {
        error!(
            target: "bucket_dispatch::dispatch",
            bucket = %self.bucket,
            attempts = self.attempts,
            status = self.status.as_u16(),
            "Retries exhausted; giving up"
        );
        counter!("bucket_dispatch_retries_exhausted_total").increment(1);
    }
}

#[derive(Debug)]
pub struct BucketsEvicted {
    pub evicted: usize,
    pub remaining: usize,
}

impl InternalEvent for BucketsEvicted {
    fn emit(self) {
        debug!(
            target: "bucket_dispatch::registry",
            evicted = self.evicted,
            remaining = self.remaining,
            "Evicted idle buckets"
        );
        gauge!("bucket_dispatch_buckets").set(self.remaining as f64);
    }
}
