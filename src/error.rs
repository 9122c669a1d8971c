use std::sync::Arc;

/// Crate-level errors raised while building a client or its configuration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Classification of a failed API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ErrorKind {
    /// The request never produced an HTTP response (connect, TLS, timeout).
    Network,
    /// The access token expired; recoverable through a refresh.
    AuthExpired,
    /// The session can no longer be recovered; the user must log in again.
    AuthInvalid,
    Forbidden,
    NotFound,
    /// A 4xx rejection carrying a server message.
    Validation,
    /// A 5xx failure.
    Server,
    Unknown,
}

/// Typed error returned by every API call.
///
/// Cloning is cheap, so a single refresh outcome can be handed to every
/// caller waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[source] Arc<reqwest::Error>),

    #[error("Access token expired: {message}")]
    AuthExpired { message: String },

    #[error("Authentication required: {message}")]
    AuthInvalid { message: String },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Rejected ({code}): {message}")]
    Validation { code: i64, message: String },

    #[error("Server error ({code}): {message}")]
    Server { code: i64, message: String },

    #[error("Unexpected response ({code}): {message}")]
    Unknown { code: i64, message: String },
}

impl ApiError {
    /// Builds the error variant matching `kind`.
    ///
    /// `Network` has no HTTP code or message to carry and maps to `Unknown`;
    /// transport failures enter through `From<reqwest::Error>` instead.
    #[must_use]
    pub fn from_kind(kind: ErrorKind, code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::AuthExpired => Self::AuthExpired { message },
            ErrorKind::AuthInvalid => Self::AuthInvalid { message },
            ErrorKind::Forbidden => Self::Forbidden { message },
            ErrorKind::NotFound => Self::NotFound { message },
            ErrorKind::Validation => Self::Validation { code, message },
            ErrorKind::Server => Self::Server { code, message },
            ErrorKind::Network | ErrorKind::Unknown => Self::Unknown { code, message },
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::AuthExpired { .. } => ErrorKind::AuthExpired,
            Self::AuthInvalid { .. } => ErrorKind::AuthInvalid,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Server { .. } => ErrorKind::Server,
            Self::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// Server-provided message, or the transport error text for `Network`.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Network(e) => e.to_string(),
            Self::AuthExpired { message }
            | Self::AuthInvalid { message }
            | Self::Forbidden { message }
            | Self::NotFound { message }
            | Self::Validation { message, .. }
            | Self::Server { message, .. }
            | Self::Unknown { message, .. } => message.clone(),
        }
    }

    /// Check if this error requires the user to log in again.
    #[must_use]
    pub fn requires_relogin(&self) -> bool {
        matches!(self, Self::AuthInvalid { .. })
    }

    /// Check if this error is transient and may be retried by the caller.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Server { .. })
    }

    pub(crate) fn auth_invalid(message: impl Into<String>) -> Self {
        Self::AuthInvalid {
            message: message.into(),
        }
    }

    pub(crate) fn unknown(code: i64, message: impl Into<String>) -> Self {
        Self::Unknown {
            code,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(Arc::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_kind_roundtrips_through_kind() {
        for kind in [
            ErrorKind::AuthExpired,
            ErrorKind::AuthInvalid,
            ErrorKind::Forbidden,
            ErrorKind::NotFound,
            ErrorKind::Validation,
            ErrorKind::Server,
            ErrorKind::Unknown,
        ] {
            assert_eq!(ApiError::from_kind(kind, 400, "msg").kind(), kind);
        }
    }

    #[test]
    fn message_is_kept_intact() {
        let err = ApiError::from_kind(ErrorKind::Validation, 422, "email already taken");
        assert_eq!(err.message(), "email already taken");
        assert_eq!(err.to_string(), "Rejected (422): email already taken");
    }

    #[test]
    fn relogin_and_transient_flags() {
        assert!(ApiError::auth_invalid("gone").requires_relogin());
        assert!(!ApiError::auth_invalid("gone").is_transient());

        let server = ApiError::from_kind(ErrorKind::Server, 502, "bad gateway");
        assert!(server.is_transient());
        assert!(!server.requires_relogin());

        let forbidden = ApiError::from_kind(ErrorKind::Forbidden, 403, "nope");
        assert!(!forbidden.is_transient());
        assert!(!forbidden.requires_relogin());
    }
}
