use snafu::Snafu;

use super::http::{HttpError, InboundResponse};

/// Everything [`Dispatcher::dispatch`](super::Dispatcher::dispatch) can fail with.
///
/// Variants that stem from a response carry it, so callers can inspect status, headers
/// and body without reaching into the dispatcher's lock state.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DispatchError {
    /// A 429 without the provenance header: an intermediary refused the request, so the
    /// rate-limit body cannot be trusted and retrying here would not help.
    #[snafu(display("Request rejected with {} by an intermediary, not the rate limiter", response.status()))]
    RateLimitRejected { response: InboundResponse },

    /// An attachment that cannot honor the upload contract (rewindable, named).
    #[snafu(display("Attachment #{index} ({filename:?}) is not uploadable: {details}"))]
    AttachmentTypeMismatch {
        index: usize,
        filename: String,
        details: String,
    },

    #[snafu(display("Failed to read attachment {filename:?}: {source}"))]
    ReadAttachment {
        filename: String,
        source: std::io::Error,
    },

    /// Propagated unchanged from the transport.
    #[snafu(display("Transport failure: {source}"))]
    Transport { source: HttpError },

    /// Every attempt ended on a retryable path (authoritative 429 or 5xx).
    #[snafu(display("Gave up after {attempts} attempt(s); last status {}", response.status()))]
    RetriesExhausted {
        attempts: usize,
        response: InboundResponse,
    },

    /// A non-retryable status outside 2xx, 429 and 5xx.
    #[snafu(display("Request failed with status {}", response.status()))]
    Status { response: InboundResponse },

    #[snafu(display("Unreadable rate-limit body on {}: {source}", response.status()))]
    MalformedRateLimitBody {
        source: serde_json::Error,
        response: InboundResponse,
    },

    /// The task running an attempt panicked; its bucket was released as the guard dropped.
    #[snafu(display("Attempt task failed: {source}"))]
    AttemptAborted { source: tokio::task::JoinError },

    #[snafu(display("Path template {template:?} references missing parameter {name:?}"))]
    MissingPathParam { template: String, name: String },

    #[snafu(display("Invalid request: {details}"))]
    InvalidRequest { details: String },
}

impl DispatchError {
    /// The response that caused this error, if one was received.
    pub fn response(&self) -> Option<&InboundResponse> {
        match self {
            DispatchError::RateLimitRejected { response }
            | DispatchError::RetriesExhausted { response, .. }
            | DispatchError::Status { response }
            | DispatchError::MalformedRateLimitBody { response, .. } => Some(response),
            _ => None,
        }
    }

    pub const fn is_rate_limit_rejected(&self) -> bool {
        matches!(self, DispatchError::RateLimitRejected { .. })
    }

    pub const fn is_retries_exhausted(&self) -> bool {
        matches!(self, DispatchError::RetriesExhausted { .. })
    }
}
