use derive_more::{Display, From, Into};
use serde::{Deserialize, Deserializer, Serialize};

/// Short-lived bearer credential authorizing API calls.
///
/// `Debug` is redacted so the value never ends up in logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Longer-lived credential used solely to mint a new access token.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
#[serde(transparent)]
pub struct RefreshToken(String);

impl RefreshToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RefreshToken(***)")
    }
}

/// Access/refresh token pair.
///
/// A refresh token only exists alongside the access token it was issued
/// with: the pair is built and replaced as a whole, never field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialPair {
    access_token: Option<AccessToken>,
    refresh_token: Option<RefreshToken>,
}

impl CredentialPair {
    /// A pair issued by the backend. The refresh token is optional.
    #[must_use]
    pub fn issued(access_token: AccessToken, refresh_token: Option<RefreshToken>) -> Self {
        Self {
            access_token: Some(access_token),
            refresh_token,
        }
    }

    /// The empty pair (no session).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&AccessToken> {
        self.access_token.as_ref()
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<&RefreshToken> {
        self.refresh_token.as_ref()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none()
    }
}

/// Monotonic counter tagging a credential pair.
///
/// Every credential mutation produces a new generation, so work started
/// against an older one can detect that it has been superseded.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Into,
)]
pub struct Generation(u64);

impl Generation {
    #[must_use]
    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Backend user identifier. Accepts JSON numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Display, From, Into)]
#[serde(transparent)]
pub struct UserId(pub String);

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Self(n.to_string()),
            Raw::Text(s) => Self(s),
        })
    }
}

/// Cached user profile returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct UserProfile {
    pub id: UserId,
    #[serde(alias = "nickname", alias = "username", alias = "display_name")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl UserProfile {
    /// Create a profile with the required fields.
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: UserId(id.into()),
            display_name: display_name.into(),
            email: None,
            avatar: None,
        }
    }

    /// Set the email.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the avatar URL.
    #[must_use]
    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }
}

/// Body of `POST /auth/login`.
#[derive(Debug, Clone, Serialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

/// Body of `POST /auth/register`.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterCredentials {
    pub email: String,
    pub password: String,
    pub nickname: String,
}

/// Token payload returned by login and refresh.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenGrant {
    #[serde(alias = "token", alias = "accessToken")]
    pub(crate) access_token: AccessToken,
    #[serde(default, alias = "refreshToken")]
    pub(crate) refresh_token: Option<RefreshToken>,
}

impl TokenGrant {
    pub(crate) fn into_pair(self) -> CredentialPair {
        CredentialPair::issued(self.access_token, self.refresh_token)
    }
}

/// `data` of a successful login.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LoginGrant {
    #[serde(flatten)]
    pub(crate) tokens: TokenGrant,
    #[serde(alias = "userInfo")]
    pub(crate) user: UserProfile,
}
