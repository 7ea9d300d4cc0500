//! Scripted transport and response fixtures for dispatcher tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
    time::Duration,
};

use futures::future::BoxFuture;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use tokio::time::Instant;
use tower::Service;

use crate::dispatcher::{
    Dispatcher, DispatcherConfig,
    http::{HttpError, InboundResponse, PROVENANCE, Payload, PreparedRequest, RATELIMIT_REMAINING, RATELIMIT_RESET_AFTER},
};

pub const BASE_URL: &str = "http://api.test";

/// What the mock does with the next call to a path.
#[derive(Debug)]
pub enum Scripted {
    Respond(InboundResponse),
    /// Responds once `delay` has passed since the call.
    RespondAfter(Duration, InboundResponse),
    Fail(HttpError),
}

/// A request as the transport saw it.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub payload: Payload,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct MockState {
    scripts: HashMap<String, VecDeque<Scripted>>,
    calls: Vec<RecordedCall>,
}

/// Transport answering from per-path scripts; unscripted calls get an empty 200.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues the next answer for `path` (the URL without [`BASE_URL`]).
    pub fn push(&self, path: &str, scripted: Scripted) {
        self.state()
            .scripts
            .entry(path.to_owned())
            .or_default()
            .push_back(scripted);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        let url = format!("{BASE_URL}{path}");
        self.state()
            .calls
            .iter()
            .filter(|call| call.url == url)
            .cloned()
            .collect()
    }
}

impl Service<PreparedRequest> for MockTransport {
    type Response = InboundResponse;
    type Error = HttpError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: PreparedRequest) -> Self::Future {
        let scripted = {
            let mut state = self.state();
            let path = request.url.strip_prefix(BASE_URL).unwrap_or(&request.url).to_owned();
            state.calls.push(RecordedCall {
                method: request.method,
                url: request.url,
                headers: request.headers,
                payload: request.payload,
                at: Instant::now(),
            });
            state.scripts.get_mut(&path).and_then(VecDeque::pop_front)
        };

        Box::pin(async move {
            match scripted {
                None => Ok(ok("")),
                Some(Scripted::Respond(response)) => Ok(response),
                Some(Scripted::RespondAfter(delay, response)) => {
                    tokio::time::sleep(delay).await;
                    Ok(response)
                }
                Some(Scripted::Fail(error)) => Err(error),
            }
        })
    }
}

pub fn test_config() -> DispatcherConfig {
    DispatcherConfig::builder()
        .token("test".to_owned())
        .base_url(BASE_URL.to_owned())
        .build()
}

pub fn test_dispatcher(mock: MockTransport) -> Dispatcher<MockTransport> {
    Dispatcher::with_transport(&test_config(), mock)
}

fn response(status: u16, headers: &[(&'static str, String)], body: &'static str) -> InboundResponse {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(
            HeaderName::from_static(*name),
            HeaderValue::from_str(value).expect("fixture header value"),
        );
    }
    InboundResponse::new(StatusCode::from_u16(status).expect("fixture status"), map, body)
}

pub fn ok(body: &'static str) -> InboundResponse {
    response(200, &[], body)
}

pub fn status(code: u16) -> InboundResponse {
    response(code, &[], "")
}

/// A 200 that spent the bucket's last request.
pub fn exhausted(reset_after: f64) -> InboundResponse {
    response(
        200,
        &[
            (RATELIMIT_REMAINING, "0".to_owned()),
            (RATELIMIT_RESET_AFTER, reset_after.to_string()),
        ],
        "{}",
    )
}

/// A 429 from the API's own limiter.
pub fn rate_limited(global: bool, retry_after: f64) -> InboundResponse {
    let body = serde_json::json!({ "global": global, "retry_after": retry_after }).to_string();
    let mut headers = HeaderMap::new();
    headers.insert(PROVENANCE, HeaderValue::from_static("1.1 google"));
    InboundResponse::new(StatusCode::TOO_MANY_REQUESTS, headers, body)
}

/// A 429 from something in front of the API.
pub fn edge_rate_limited() -> InboundResponse {
    response(429, &[], r#"{"message": "You are being rate limited."}"#)
}
