use std::{collections::BTreeMap, fmt::Display};

use bon::Builder;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use snafu::OptionExt;

use super::{
    attachment::{self, FileAttachment},
    bucket::BucketKey,
    error::{DispatchError, InvalidRequestSnafu, MissingPathParamSnafu},
    http::{AUDIT_LOG_REASON, Payload},
};

/// Values substituted into a route's `{name}` placeholders.
pub type PathParams = BTreeMap<String, String>;

/// A named, parameterized endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    method: Method,
    template: String,
    params: PathParams,
}

impl Route {
    pub fn new(method: Method, template: impl Into<String>) -> Self {
        Self {
            method,
            template: template.into(),
            params: PathParams::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Display) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub fn bucket(&self) -> BucketKey {
        BucketKey::resolve(&self.template, &self.params)
    }

    /// The template with every `{name}` replaced by its parameter.
    pub fn path(&self) -> Result<String, DispatchError> {
        let mut path = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some(open) = rest.find('{') {
            let Some(len) = rest[open..].find('}') else {
                break;
            };
            let name = &rest[open + 1..open + len];
            let value = self.params.get(name).context(MissingPathParamSnafu {
                template: self.template.as_str(),
                name,
            })?;
            path.push_str(&rest[..open]);
            path.push_str(value);
            rest = &rest[open + len + 1..];
        }
        path.push_str(rest);
        Ok(path)
    }

    pub fn url(&self, base_url: &str) -> Result<String, DispatchError> {
        Ok(format!("{}{}", base_url.trim_end_matches('/'), self.path()?))
    }
}

/// The request body as supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Sent as JSON, or flattened into form fields when files are attached.
    Json(serde_json::Value),
    Raw { content_type: String, bytes: Bytes },
}

#[derive(Debug, Builder)]
pub struct OutboundRequest {
    pub(crate) route: Route,
    pub(crate) body: Option<RequestBody>,
    #[builder(default)]
    pub(crate) files: Vec<FileAttachment>,
    /// Sent as the audit-log reason header, never in the body.
    #[builder(into)]
    pub(crate) reason: Option<String>,
    /// Attempt budget; falls back to the dispatcher's default.
    pub(crate) retries: Option<usize>,
}

impl OutboundRequest {
    pub fn new(route: Route) -> Self {
        Self::builder().route(route).build()
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn files(&self) -> &[FileAttachment] {
        &self.files
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

/// Builds the per-request headers.
pub(crate) fn request_headers(reason: Option<&str>) -> Result<HeaderMap, DispatchError> {
    let mut headers = HeaderMap::new();
    if let Some(reason) = reason {
        let value = HeaderValue::from_str(reason).map_err(|e| {
            InvalidRequestSnafu {
                details: format!("audit reason is not a valid header value: {e}"),
            }
            .build()
        })?;
        headers.insert(HeaderName::from_static(AUDIT_LOG_REASON), value);
    }
    Ok(headers)
}

/// Builds the payload for attempt number `attempt`.
pub(crate) async fn build_payload(
    body: Option<&RequestBody>,
    files: &mut [FileAttachment],
    attempt: usize,
) -> Result<Payload, DispatchError> {
    if !files.is_empty() {
        return attachment::encode_multipart(files, body, attempt).await;
    }
    Ok(match body {
        None => Payload::Empty,
        Some(RequestBody::Json(value)) => Payload::Json(value.clone()),
        Some(RequestBody::Raw {
            content_type,
            bytes,
        }) => Payload::Raw {
            content_type: content_type.clone(),
            bytes: bytes.clone(),
        },
    })
}
