use std::{fmt, time::Duration};

use bon::Builder;
use snafu::{OptionExt, ResultExt, Snafu};

pub const DEFAULT_BASE_URL: &str = "https://discord.com/api/v9";
pub const DEFAULT_USER_AGENT: &str = concat!(
    "DiscordBot (",
    env!("CARGO_PKG_NAME"),
    ", ",
    env!("CARGO_PKG_VERSION"),
    ")"
);
pub const DEFAULT_RETRIES: usize = 3;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const TOKEN_VAR: &str = "BUCKET_DISPATCH_TOKEN";
pub const BASE_URL_VAR: &str = "BUCKET_DISPATCH_BASE_URL";
pub const RETRIES_VAR: &str = "BUCKET_DISPATCH_RETRIES";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("Environment variable {name} is not set"))]
    MissingVar { name: &'static str },

    #[snafu(display("Environment variable {name} is invalid: {source}"))]
    InvalidNumber {
        name: &'static str,
        source: std::num::ParseIntError,
    },
}

/// Settings for a [`Dispatcher`](super::Dispatcher) and its HTTP session.
///
/// # Example
///
/// ```rust
/// use bucket_dispatch::dispatcher::DispatcherConfig;
///
/// let config = DispatcherConfig::builder()
///     .token("my-token".to_owned())
///     .default_retries(5)
///     .bucket_capacity(10_000)
///     .build();
/// assert_eq!(config.base_url, "https://discord.com/api/v9");
/// ```
#[derive(Clone, Builder)]
pub struct DispatcherConfig {
    /// Bot token, sent as `Authorization: Bot <token>`.
    pub token: String,

    /// Prefix for every route path.
    #[builder(default = DEFAULT_BASE_URL.to_owned())]
    pub base_url: String,

    #[builder(default = DEFAULT_USER_AGENT.to_owned())]
    pub user_agent: String,

    /// Attempt budget for requests that don't set their own.
    #[builder(default = DEFAULT_RETRIES)]
    pub default_retries: usize,

    /// Whole-request timeout enforced by the HTTP session.
    #[builder(default = DEFAULT_REQUEST_TIMEOUT)]
    pub request_timeout: Duration,

    /// Registry size past which idle buckets are evicted; unbounded when `None`.
    pub bucket_capacity: Option<usize>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            default_retries: DEFAULT_RETRIES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            bucket_capacity: None,
        }
    }
}

impl fmt::Debug for DispatcherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherConfig")
            .field("token", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("user_agent", &self.user_agent)
            .field("default_retries", &self.default_retries)
            .field("request_timeout", &self.request_timeout)
            .field("bucket_capacity", &self.bucket_capacity)
            .finish()
    }
}

impl DispatcherConfig {
    /// Reads `BUCKET_DISPATCH_TOKEN` (required), `BUCKET_DISPATCH_BASE_URL` and
    /// `BUCKET_DISPATCH_RETRIES` (optional) from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let token = lookup(TOKEN_VAR)
            .filter(|token| !token.is_empty())
            .context(MissingVarSnafu { name: TOKEN_VAR })?;

        let mut config = Self {
            token,
            ..Self::default()
        };
        if let Some(base_url) = lookup(BASE_URL_VAR) {
            config.base_url = base_url;
        }
        if let Some(retries) = lookup(RETRIES_VAR) {
            config.default_retries = retries
                .trim()
                .parse()
                .context(InvalidNumberSnafu { name: RETRIES_VAR })?;
        }
        Ok(config)
    }
}
