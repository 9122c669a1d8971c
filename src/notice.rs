//! UI boundary: navigation and notification ports.
//!
//! The client never talks to a UI. It returns typed errors, and the
//! coordinator tells a [`Navigator`] when the user has to log in again.
//! [`NoticeAdapter`] turns a call result into at most one [`Notice`] for
//! the consumer's toast/snackbar layer.

use crate::error::{ApiError, ErrorKind};

/// Consumer-provided navigation (e.g. route to the login page).
///
/// Invoked once per invalidated session, never once per failed request.
pub trait Navigator: Send + Sync + 'static {
    fn login_required(&self, reason: &ApiError);
}

impl<F> Navigator for F
where
    F: Fn(&ApiError) + Send + Sync + 'static,
{
    fn login_required(&self, reason: &ApiError) {
        self(reason);
    }
}

/// Navigator for headless use: only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn login_required(&self, reason: &ApiError) {
        tracing::info!(reason = %reason, "Login required");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// A user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    #[must_use]
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    /// Notice for a failed call, carrying the server message as-is.
    ///
    /// `None` for `AuthInvalid`: the navigator already handles it.
    #[must_use]
    pub fn from_error(error: &ApiError) -> Option<Self> {
        let level = match error.kind() {
            ErrorKind::AuthInvalid => return None,
            ErrorKind::Validation | ErrorKind::Forbidden | ErrorKind::NotFound => {
                NoticeLevel::Warning
            }
            ErrorKind::AuthExpired
            | ErrorKind::Network
            | ErrorKind::Server
            | ErrorKind::Unknown => NoticeLevel::Error,
        };
        Some(Self::new(level, error.message()))
    }
}

/// Consumer-provided notification sink (toast, snackbar, status line).
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

impl<F> Notifier for F
where
    F: Fn(Notice) + Send + Sync,
{
    fn notify(&self, notice: Notice) {
        self(notice);
    }
}

/// Maps call outcomes to notices, one per user action.
pub struct NoticeAdapter<N> {
    notifier: N,
}

impl<N: Notifier> NoticeAdapter<N> {
    #[must_use]
    pub fn new(notifier: N) -> Self {
        Self { notifier }
    }

    /// Report the final outcome of a user action.
    ///
    /// Success is silent unless `success` text is given; failures emit the
    /// server message (nothing for `AuthInvalid`).
    pub fn report<T>(&self, result: &Result<T, ApiError>, success: Option<&str>) {
        match result {
            Ok(_) => {
                if let Some(message) = success {
                    self.notifier
                        .notify(Notice::new(NoticeLevel::Success, message));
                }
            }
            Err(e) => {
                if let Some(notice) = Notice::from_error(e) {
                    self.notifier.notify(notice);
                }
            }
        }
    }
}
