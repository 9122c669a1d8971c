//! Maps an HTTP status and response envelope to an [`ErrorKind`].
//!
//! This is the only place where status codes are interpreted. Everything
//! else reacts to the returned kind.

use reqwest::StatusCode;

use crate::envelope::Envelope;
use crate::error::{ApiError, ErrorKind};

/// Envelope code signaling success.
pub const SUCCESS_CODE: i64 = 200;

/// Default domain code for "access token expired".
pub const DEFAULT_EXPIRED_CODE: i64 = 419;

/// Error classifier.
///
/// Both `401` and the configured expiry code (default `419`) are read as
/// "access token expired", on the HTTP status or on the envelope code. Whether
/// the session is unrecoverable is decided by the refresh endpoint, not here:
/// the client turns an expiry into `AuthInvalid` only once a refresh has
/// failed or a refreshed retry expired again.
///
/// | input                                   | kind          |
/// |-----------------------------------------|---------------|
/// | 401 / expiry code (status or envelope)  | `AuthExpired` |
/// | 403                                     | `Forbidden`   |
/// | 404                                     | `NotFound`    |
/// | other 4xx with a message                | `Validation`  |
/// | 5xx                                     | `Server`      |
/// | anything else                           | `Unknown`     |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classifier {
    expired_code: i64,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRED_CODE)
    }
}

impl Classifier {
    #[must_use]
    pub fn new(expired_code: i64) -> Self {
        Self { expired_code }
    }

    #[must_use]
    pub fn expired_code(&self) -> i64 {
        self.expired_code
    }

    /// Classify a failed response. Pure: no side effects.
    #[must_use]
    pub fn classify<T>(&self, http_status: u16, envelope: Option<&Envelope<T>>) -> ErrorKind {
        let is_expiry = |code: i64| code == 401 || code == self.expired_code;

        if is_expiry(i64::from(http_status)) || envelope.is_some_and(|e| is_expiry(e.code)) {
            return ErrorKind::AuthExpired;
        }

        let has_message = envelope.is_some_and(|e| !e.message.trim().is_empty());

        match Self::effective_code(http_status, envelope) {
            403 => ErrorKind::Forbidden,
            404 => ErrorKind::NotFound,
            400..=499 if has_message => ErrorKind::Validation,
            500..=599 => ErrorKind::Server,
            _ => ErrorKind::Unknown,
        }
    }

    /// Classify and build the matching [`ApiError`], keeping the server message.
    #[must_use]
    pub fn error<T>(&self, http_status: u16, envelope: Option<&Envelope<T>>) -> ApiError {
        let kind = self.classify(http_status, envelope);
        let code = Self::effective_code(http_status, envelope);
        let message = envelope
            .map(|e| e.message.clone())
            .filter(|m| !m.trim().is_empty())
            .or_else(|| {
                StatusCode::from_u16(http_status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .map(str::to_owned)
            })
            .unwrap_or_default();

        ApiError::from_kind(kind, code, message)
    }

    /// A non-2xx status wins; on 2xx the envelope's domain code is used.
    fn effective_code<T>(http_status: u16, envelope: Option<&Envelope<T>>) -> i64 {
        let status = i64::from(http_status);
        if (200..300).contains(&http_status) {
            envelope.map_or(status, |e| e.code)
        } else {
            status
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    fn env(code: i64, message: &str) -> Envelope<Value> {
        Envelope {
            code,
            message: message.into(),
            data: Value::Null,
        }
    }

    #[test]
    fn expiry_from_status_or_envelope() {
        let c = Classifier::default();
        assert_eq!(c.classify::<Value>(401, None), ErrorKind::AuthExpired);
        assert_eq!(c.classify::<Value>(419, None), ErrorKind::AuthExpired);
        assert_eq!(c.classify(200, Some(&env(419, "token expired"))), ErrorKind::AuthExpired);
        assert_eq!(c.classify(200, Some(&env(401, "unauthorized"))), ErrorKind::AuthExpired);
    }

    #[test]
    fn custom_expiry_code() {
        let c = Classifier::new(4011);
        assert_eq!(c.classify(200, Some(&env(4011, "expired"))), ErrorKind::AuthExpired);
        assert_eq!(c.classify::<Value>(419, None), ErrorKind::Unknown);
    }

    #[test]
    fn status_mapping_table() {
        let c = Classifier::default();
        assert_eq!(c.classify::<Value>(403, None), ErrorKind::Forbidden);
        assert_eq!(c.classify::<Value>(404, None), ErrorKind::NotFound);
        assert_eq!(c.classify(400, Some(&env(400, "bad email"))), ErrorKind::Validation);
        assert_eq!(c.classify::<Value>(400, None), ErrorKind::Unknown);
        assert_eq!(c.classify(422, Some(&env(422, "  "))), ErrorKind::Unknown);
        assert_eq!(c.classify::<Value>(500, None), ErrorKind::Server);
        assert_eq!(c.classify::<Value>(503, None), ErrorKind::Server);
        assert_eq!(c.classify::<Value>(302, None), ErrorKind::Unknown);
    }

    #[test]
    fn envelope_code_used_on_success_status() {
        let c = Classifier::default();
        assert_eq!(c.classify(200, Some(&env(403, "no access"))), ErrorKind::Forbidden);
        assert_eq!(c.classify(200, Some(&env(404, "missing"))), ErrorKind::NotFound);
        assert_eq!(c.classify(200, Some(&env(409, "duplicate"))), ErrorKind::Validation);
        assert_eq!(c.classify(200, Some(&env(500, "boom"))), ErrorKind::Server);
        assert_eq!(c.classify(200, Some(&env(1001, "custom"))), ErrorKind::Unknown);
    }

    #[test]
    fn http_status_wins_over_envelope_code() {
        let c = Classifier::default();
        assert_eq!(c.classify(500, Some(&env(404, "missing"))), ErrorKind::Server);
    }

    #[test]
    fn error_keeps_server_message() {
        let c = Classifier::default();
        let err = c.error(200, Some(&env(409, "email already registered")));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.message(), "email already registered");
        assert!(matches!(err, ApiError::Validation { code: 409, .. }));
    }

    #[test]
    fn error_falls_back_to_reason_phrase() {
        let c = Classifier::default();
        let err = c.error::<Value>(503, None);
        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(err.message(), "Service Unavailable");
    }
}
