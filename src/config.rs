use std::time::Duration;

use reqwest::header::HeaderName;
use url::Url;

use crate::classify::DEFAULT_EXPIRED_CODE;
use crate::envelope::EnvelopeMode;
use crate::error::Error;

/// Backend endpoint paths, relative to the base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Endpoints {
    pub login: String,
    pub register: String,
    pub logout: String,
    pub refresh: String,
    pub profile: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "/auth/login".into(),
            register: "/auth/register".into(),
            logout: "/auth/logout".into(),
            refresh: "/auth/refresh".into(),
            profile: "/users/info".into(),
        }
    }
}

/// API client configuration.
///
/// Required field (`base_url`) is a constructor parameter; everything else
/// has a default and a `with_*` override.
///
/// ```rust,ignore
/// use api_session::{ClientConfig, EnvelopeMode};
///
/// let config = ClientConfig::new("https://api.example.com/v1".parse()?)
///     .with_envelope(EnvelopeMode::Bare)
///     .with_timeout(std::time::Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ClientConfig {
    pub(crate) base_url: Url,
    pub(crate) envelope: EnvelopeMode,
    pub(crate) expired_code: i64,
    pub(crate) refresh_header: Option<HeaderName>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) endpoints: Endpoints,
}

impl ClientConfig {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            envelope: EnvelopeMode::default(),
            expired_code: DEFAULT_EXPIRED_CODE,
            refresh_header: None,
            timeout: None,
            endpoints: Endpoints::default(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `API_BASE`: API origin (must be a valid URL)
    ///
    /// # Optional env vars
    /// - `API_ENVELOPE`: `wrapped` (default) or `bare`
    /// - `API_EXPIRED_CODE`: domain code for "access token expired" (default 419)
    /// - `API_REFRESH_HEADER`: header that also carries the refresh token on refresh calls
    /// - `API_TIMEOUT_SECS`: transport timeout in seconds
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `API_BASE` is missing or any value is malformed.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `API_BASE` is missing or any value is malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let base = lookup("API_BASE")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| Error::Config("API_BASE is required".into()))?;
        let base_url: Url = base
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("API_BASE: {e}")))?;

        let mut config = Self::new(base_url);

        if let Some(mode) = lookup("API_ENVELOPE") {
            let mode = mode
                .parse()
                .map_err(|e| Error::Config(format!("API_ENVELOPE: {e}")))?;
            config = config.with_envelope(mode);
        }
        if let Some(code) = lookup("API_EXPIRED_CODE") {
            let code = code
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("API_EXPIRED_CODE: {e}")))?;
            config = config.with_expired_code(code);
        }
        if let Some(name) = lookup("API_REFRESH_HEADER") {
            let name = HeaderName::try_from(name.trim())
                .map_err(|e| Error::Config(format!("API_REFRESH_HEADER: {e}")))?;
            config = config.with_refresh_header(name);
        }
        if let Some(secs) = lookup("API_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("API_TIMEOUT_SECS: {e}")))?;
            config = config.with_timeout(Duration::from_secs(secs));
        }

        Ok(config)
    }

    /// Response envelope shape (default: [`EnvelopeMode::Wrapped`]).
    #[must_use]
    pub fn with_envelope(mut self, envelope: EnvelopeMode) -> Self {
        self.envelope = envelope;
        self
    }

    /// Domain code meaning "access token expired" (default: 419).
    #[must_use]
    pub fn with_expired_code(mut self, code: i64) -> Self {
        self.expired_code = code;
        self
    }

    /// Also send the refresh token in this header on refresh calls.
    #[must_use]
    pub fn with_refresh_header(mut self, name: HeaderName) -> Self {
        self.refresh_header = Some(name);
        self
    }

    /// Transport timeout applied to every call, refresh included.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn envelope(&self) -> EnvelopeMode {
        self.envelope
    }

    #[must_use]
    pub fn expired_code(&self) -> i64 {
        self.expired_code
    }

    #[must_use]
    pub fn refresh_header(&self) -> Option<&HeaderName> {
        self.refresh_header.as_ref()
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Join `path` onto the base URL, keeping any path prefix of the base.
    pub(crate) fn url_for(&self, path: &str) -> Result<Url, url::ParseError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Url::parse(&format!("{base}/{path}"))
    }
}
