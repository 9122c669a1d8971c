//! Login, registration, logout and profile loading on top of [`ApiClient`].

use std::sync::Arc;

use serde_json::Value;

use crate::client::{ApiClient, ApiRequest};
use crate::error::{ApiError, ErrorKind};
use crate::store::{CredentialStore, SessionSnapshot};
use crate::types::{LoginCredentials, LoginGrant, RegisterCredentials, UserProfile};

/// Session operations for the UI layer.
///
/// The only component that writes whole sessions into the
/// [`CredentialStore`]; everything else reads it.
#[derive(Clone)]
pub struct SessionManager {
    client: ApiClient,
}

impl SessionManager {
    #[must_use]
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    #[must_use]
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    #[must_use]
    pub fn store(&self) -> &Arc<CredentialStore> {
        self.client.store()
    }

    #[must_use]
    pub fn current(&self) -> SessionSnapshot {
        self.store().snapshot()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.current().is_authenticated()
    }

    /// Log in and store tokens and profile together.
    ///
    /// # Errors
    ///
    /// Returns the classified error; the store is untouched on failure.
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<UserProfile, ApiError> {
        let request = ApiRequest::post(self.client.config().endpoints().login.clone())
            .with_body(encode(credentials)?)
            .anonymous();
        let grant: LoginGrant = self.client.call(&request).await?;

        let user = grant.user;
        let generation = self
            .store()
            .set(grant.tokens.into_pair(), Some(user.clone()))
            .await;

        tracing::info!(user_id = %user.id, %generation, "Logged in");
        Ok(user)
    }

    /// Create an account. Does not log in.
    ///
    /// # Errors
    ///
    /// Returns the classified error, e.g. `Validation` for a taken email.
    pub async fn register(&self, credentials: &RegisterCredentials) -> Result<(), ApiError> {
        let request = ApiRequest::post(self.client.config().endpoints().register.clone())
            .with_body(encode(credentials)?)
            .anonymous();
        let _: Value = self.client.call(&request).await?;

        tracing::info!(email = %credentials.email, "Registered");
        Ok(())
    }

    /// Tell the server, then clear the local session whatever it answered.
    pub async fn logout(&self) {
        if self.is_authenticated() {
            let request =
                ApiRequest::post(self.client.config().endpoints().logout.clone()).without_refresh();
            if let Err(e) = self.client.call::<Value>(&request).await {
                tracing::warn!(error = %e, "Server logout failed; clearing local session anyway");
            }
        }

        let generation = self.store().clear().await;
        tracing::info!(%generation, "Logged out");
    }

    /// Load the profile and replace the cached one. Tokens are left alone.
    ///
    /// # Errors
    ///
    /// Returns the classified error; `AuthInvalid` means the session is gone.
    pub async fn fetch_profile(&self) -> Result<UserProfile, ApiError> {
        let user: UserProfile = self
            .client
            .get(&self.client.config().endpoints().profile)
            .await?;
        self.store().update_profile(user.clone()).await;
        Ok(user)
    }

    /// Restore a persisted session and confirm it with a profile fetch.
    ///
    /// Returns whether a session is active afterwards. A network failure
    /// keeps the restored session.
    pub async fn initialize(&self) -> bool {
        if !self.store().restore().await {
            return false;
        }

        match self.fetch_profile().await {
            Ok(_) => true,
            Err(e) if matches!(e.kind(), ErrorKind::AuthExpired | ErrorKind::AuthInvalid) => {
                tracing::info!(error = %e, "Restored session rejected");
                if self.is_authenticated() {
                    self.store().clear().await;
                }
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Profile check failed; keeping restored session");
                self.is_authenticated()
            }
        }
    }
}

fn encode(value: &impl serde::Serialize) -> Result<Value, ApiError> {
    serde_json::to_value(value)
        .map_err(|e| ApiError::from_kind(ErrorKind::Unknown, 0, format!("failed to encode request: {e}")))
}
