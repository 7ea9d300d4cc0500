//! Rate-limited request dispatching for bucketed REST APIs
//!
//! This crate lets many concurrent callers share one API credential against a server
//! that partitions its rate limits into *buckets* and occasionally imposes an
//! account-wide (global) throttle.
//!
//! # How a request flows
//! 1. The route's path template and its scoping ids (`channel_id`, `guild_id`,
//!    `webhook_id`) are folded into a [`dispatcher::bucket::BucketKey`].
//! 2. The bucket's lock is acquired (FIFO), then the global gate is awaited.
//! 3. The payload is built (JSON, raw bytes, or a multipart form when files are attached)
//!    and handed to the transport, a `tower::Service`.
//! 4. Rate-limit headers and 429 bodies decide how long the bucket stays locked,
//!    whether the global gate closes, and whether the attempt is retried.
//!
//! # Basic Usage
//! ```no_run
//! use bucket_dispatch::dispatcher::{Dispatcher, DispatcherConfig};
//! use bucket_dispatch::dispatcher::request::{OutboundRequest, RequestBody, Route};
//! use http::Method;
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), bucket_dispatch::Error> {
//! let dispatcher = Dispatcher::new(DispatcherConfig::builder().token("my-token".to_owned()).build());
//!
//! let route = Route::new(Method::POST, "/channels/{channel_id}/messages").param("channel_id", 1234);
//! let request = OutboundRequest::builder()
//!     .route(route)
//!     .body(RequestBody::Json(json!({ "content": "hello" })))
//!     .reason("greeting")
//!     .build();
//!
//! let response = dispatcher.dispatch(request).await?;
//! println!("{}", response.status());
//! dispatcher.close();
//! # Ok(())
//! # }
//! ```
//!
//! # Metrics
//! Emits counters and histograms through the `metrics` facade via the `InternalEvent` trait.
pub mod dispatcher;
#[cfg(test)]
pub mod test_utils;

#[macro_use]
extern crate tracing;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;
