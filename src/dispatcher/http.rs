// src/dispatcher/http.rs
use std::borrow::Cow;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use snafu::Snafu;

use crate::Error as CrateError;

/// Sent by the server on every response: requests left in the current window.
pub const RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
/// Seconds (fractional) until the bucket's window resets.
pub const RATELIMIT_RESET_AFTER: &str = "x-ratelimit-reset-after";
/// Present on 429s produced by the API's own rate limiter; absent when an edge layer answered.
pub const PROVENANCE: &str = "via";
/// Carries the caller-supplied reason for audited actions.
pub const AUDIT_LOG_REASON: &str = "x-audit-log-reason";
/// Asks the server for millisecond precision in the reset headers.
pub const RATELIMIT_PRECISION: &str = "x-ratelimit-precision";

/// Errors raised by the transport itself, before any HTTP status is known.
///
/// Status codes are not errors at this layer: every response, 4xx and 5xx included,
/// comes back as an [`InboundResponse`] so the dispatcher can read its rate-limit signals.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HttpError {
    /// An error occurred during the transport of the request (e.g., network issue, DNS).
    #[snafu(display("HTTP transport error: {}", source))]
    Transport { source: CrateError },

    /// The request itself was malformed or invalid before sending.
    #[snafu(display("Invalid HTTP request: {}", details))]
    InvalidRequest { details: String },

    /// A timeout occurred.
    #[snafu(display("HTTP request timed out"))]
    Timeout,

    /// An error occurred while building the request or the session.
    #[snafu(display("Failed to build HTTP request: {}", details))]
    BuildRequest { details: String },

    /// Other, unspecified HTTP client errors.
    #[snafu(display("Generic HTTP client error: {}", source))]
    ClientError { source: CrateError },
}

/// A file part of a multipart upload, already read into memory for this attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartFile {
    pub field: String,
    pub filename: String,
    pub data: Bytes,
}

/// The body of a [`PreparedRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Json(serde_json::Value),
    Raw { content_type: String, bytes: Bytes },
    Multipart {
        fields: Vec<(String, String)>,
        files: Vec<MultipartFile>,
    },
}

/// A fully resolved request, ready for the transport.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    /// Per-request headers. Credentials and client identification are attached by the session.
    pub headers: HeaderMap,
    pub payload: Payload,
}

/// A response with its body fully read.
#[derive(Debug, Clone)]
pub struct InboundResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl InboundResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes) {
        (self.status, self.headers, self.body)
    }

    /// Reads a header as a float, `None` if it is absent or not a number.
    pub fn header_f64(&self, name: &str) -> Option<f64> {
        let raw = self.headers.get(name)?.to_str().ok()?;
        match raw.trim().parse::<f64>() {
            Ok(value) => Some(value),
            Err(_) => {
                debug!(header = name, value = raw, "Ignoring non-numeric header value");
                None
            }
        }
    }
}
