// src/dispatcher/reqwest_integration.rs
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
    time::Duration,
};

use futures::future::BoxFuture;
use http::{HeaderMap, HeaderName, HeaderValue, header};
use reqwest::multipart::{Form, Part};
use tower::Service;

use super::{
    config::DispatcherConfig,
    http::{HttpError, InboundResponse, MultipartFile, Payload, PreparedRequest, RATELIMIT_PRECISION},
};

#[derive(Debug)]
struct SessionSettings {
    token: String,
    user_agent: String,
    timeout: Duration,
}

/// The production transport: a `tower::Service` over a lazily created `reqwest::Client`.
///
/// The client (the session) is built on first use and shared by every clone of the
/// service. [`close_session`](Self::close_session) drops it; the next request builds a
/// fresh one, so closing is never fatal.
#[derive(Clone, Debug)]
pub struct ReqwestService {
    settings: Arc<SessionSettings>,
    session: Arc<Mutex<Option<reqwest::Client>>>,
}

impl ReqwestService {
    pub fn new(config: &DispatcherConfig) -> Self {
        Self {
            settings: Arc::new(SessionSettings {
                token: config.token.clone(),
                user_agent: config.user_agent.clone(),
                timeout: config.request_timeout,
            }),
            session: Arc::new(Mutex::new(None)),
        }
    }

    fn session(&self) -> MutexGuard<'_, Option<reqwest::Client>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the live session, creating it if none is open.
    pub fn ensure_session(&self) -> Result<reqwest::Client, HttpError> {
        let mut session = self.session();
        if let Some(client) = session.as_ref() {
            return Ok(client.clone());
        }
        let client = self.build_client()?;
        debug!(message = "Opened HTTP session.", user_agent = %self.settings.user_agent);
        *session = Some(client.clone());
        Ok(client)
    }

    /// Drops the session. Returns whether one was open.
    pub fn close_session(&self) -> bool {
        let closed = self.session().take().is_some();
        if closed {
            debug!(message = "Closed HTTP session.");
        }
        closed
    }

    pub fn has_session(&self) -> bool {
        self.session().is_some()
    }

    fn build_client(&self) -> Result<reqwest::Client, HttpError> {
        let mut authorization = HeaderValue::from_str(&format!("Bot {}", self.settings.token))
            .map_err(|e| HttpError::BuildRequest {
                details: format!("Invalid token: {}", e),
            })?;
        authorization.set_sensitive(true);
        let user_agent = HeaderValue::from_str(&self.settings.user_agent).map_err(|e| HttpError::BuildRequest {
            details: format!("Invalid User-Agent: {}", e),
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, authorization);
        headers.insert(header::USER_AGENT, user_agent);
        headers.insert(
            HeaderName::from_static(RATELIMIT_PRECISION),
            HeaderValue::from_static("millisecond"),
        );

        reqwest::Client::builder()
            .default_headers(headers)
            .timeout(self.settings.timeout)
            .build()
            .map_err(|e| HttpError::BuildRequest {
                details: format!("Failed to build reqwest client: {}", e),
            })
    }
}

fn multipart_form(fields: Vec<(String, String)>, files: Vec<MultipartFile>) -> Form {
    let form = fields
        .into_iter()
        .fold(Form::new(), |form, (name, value)| form.text(name, value));
    files.into_iter().fold(form, |form, file| {
        form.part(file.field, Part::bytes(file.data.to_vec()).file_name(file.filename))
    })
}

fn classify(error: reqwest::Error) -> HttpError {
    if error.is_timeout() {
        warn!(error = %error, "Request timed out");
        HttpError::Timeout
    } else if error.is_connect() {
        error!(error = %error, "Connection error");
        HttpError::Transport {
            source: Box::new(error),
        }
    } else {
        error!(error = %error, "Other reqwest error");
        HttpError::ClientError {
            source: Box::new(error),
        }
    }
}

impl Service<PreparedRequest> for ReqwestService {
    type Response = InboundResponse;
    type Error = HttpError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: PreparedRequest) -> Self::Future {
        let client = match self.ensure_session() {
            Ok(client) => client,
            Err(error) => return Box::pin(async move { Err(error) }),
        };

        Box::pin(async move {
            let PreparedRequest {
                method,
                url,
                headers,
                payload,
            } = request;

            let url = reqwest::Url::parse(&url).map_err(|parse_err| HttpError::InvalidRequest {
                details: format!("Invalid URL '{}': {}", url, parse_err),
            })?;

            let builder = client.request(method, url).headers(headers);
            let builder = match payload {
                Payload::Empty => builder,
                Payload::Json(value) => builder.json(&value),
                Payload::Raw {
                    content_type,
                    bytes,
                } => builder.header(header::CONTENT_TYPE, content_type).body(bytes),
                Payload::Multipart { fields, files } => builder.multipart(multipart_form(fields, files)),
            };

            let response = builder.send().await.map_err(classify)?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(classify)?;
            Ok(InboundResponse::new(status, headers, body))
        })
    }
}
