use std::sync::Arc;

use tokio::sync::{Mutex, watch};

use super::traits::{KeyValueStore, KeyValueStoreDyn};
use crate::refresh::RefreshSlot;
use crate::types::{AccessToken, CredentialPair, Generation, RefreshToken, UserProfile};

/// Storage entry names for a persisted session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    pub access_token: String,
    pub refresh_token: String,
    pub profile: String,
}

impl StorageKeys {
    #[must_use]
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            access_token: format!("{prefix}access_token"),
            refresh_token: format!("{prefix}refresh_token"),
            profile: format!("{prefix}user_profile"),
        }
    }
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self::with_prefix("")
    }
}

/// Read-only view of the session at one generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub credentials: CredentialPair,
    pub profile: Option<UserProfile>,
    pub generation: Generation,
}

impl SessionSnapshot {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        !self.credentials.is_empty()
    }
}

/// Owner of the current session.
///
/// Mutations are serialized and published as a whole, so observers never see
/// a new access token next to an old refresh token, or a profile without the
/// tokens it belongs to. Each credential mutation bumps the generation.
///
/// Persistence is best-effort: a failing storage port is logged and the
/// in-memory session stays authoritative for the running process.
pub struct CredentialStore {
    storage: Arc<dyn KeyValueStoreDyn>,
    keys: StorageKeys,
    state: watch::Sender<SessionSnapshot>,
    write_lock: Mutex<()>,
    refresh: RefreshSlot,
}

impl CredentialStore {
    /// Create an empty store backed by `storage`. Call [`restore`](Self::restore)
    /// to hydrate from previously persisted entries.
    #[must_use]
    pub fn new<S: KeyValueStore>(storage: S) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self {
            storage: Arc::new(storage),
            keys: StorageKeys::default(),
            state,
            write_lock: Mutex::new(()),
            refresh: RefreshSlot::default(),
        }
    }

    /// Namespace the storage entries, e.g. to keep several sessions in one port.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.keys = StorageKeys::with_prefix(prefix);
        self
    }

    #[must_use]
    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    /// Current token pair.
    #[must_use]
    pub fn get(&self) -> CredentialPair {
        self.state.borrow().credentials.clone()
    }

    #[must_use]
    pub fn profile(&self) -> Option<UserProfile> {
        self.state.borrow().profile.clone()
    }

    #[must_use]
    pub fn generation(&self) -> Generation {
        self.state.borrow().generation
    }

    /// Tokens, profile and generation read together.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub(crate) fn refresh_slot(&self) -> &RefreshSlot {
        &self.refresh
    }

    /// Reactive view, notified on every mutation.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    /// Replace the session. `profile: None` keeps the cached profile.
    ///
    /// An empty pair is a [`clear`](Self::clear).
    pub async fn set(&self, pair: CredentialPair, profile: Option<UserProfile>) -> Generation {
        let _guard = self.write_lock.lock().await;
        self.replace(pair, profile).await
    }

    /// Wipe the session.
    pub async fn clear(&self) -> Generation {
        let _guard = self.write_lock.lock().await;
        self.replace(CredentialPair::empty(), None).await
    }

    /// Replace the session only if it is still at `expected`.
    ///
    /// Returns `None` when the session moved on in the meantime (another
    /// refresh, a login or a logout), leaving the fresher state untouched.
    pub(crate) async fn set_if(
        &self,
        expected: Generation,
        pair: CredentialPair,
    ) -> Option<Generation> {
        let _guard = self.write_lock.lock().await;
        if self.generation() != expected {
            return None;
        }
        Some(self.replace(pair, None).await)
    }

    /// Wipe the session only if it is still at `expected`.
    pub(crate) async fn clear_if(&self, expected: Generation) -> Option<Generation> {
        let _guard = self.write_lock.lock().await;
        if self.generation() != expected {
            return None;
        }
        Some(self.replace(CredentialPair::empty(), None).await)
    }

    /// Replace only the cached profile. Tokens and generation are untouched.
    ///
    /// Ignored (returns `false`) when no session is held, so a late profile
    /// response cannot resurrect a logged-out session.
    pub async fn update_profile(&self, profile: UserProfile) -> bool {
        let _guard = self.write_lock.lock().await;
        if self.get().is_empty() {
            tracing::debug!("Profile update ignored: no active session");
            return false;
        }

        match serde_json::to_string(&profile) {
            Ok(json) => self.write(&self.keys.profile, Some(&json)).await,
            Err(e) => tracing::warn!(error = %e, "Failed to serialize profile (non-fatal)"),
        }
        self.state.send_modify(|s| s.profile = Some(profile));
        true
    }

    /// Hydrate from the storage port.
    ///
    /// A session is restored when the access token entry is present. The
    /// refresh token and profile entries are optional, matching what
    /// [`set`](Self::set) writes. Entries without an access token, or a
    /// profile that does not parse, are wiped instead of half-loaded.
    ///
    /// Returns whether a session was restored.
    pub async fn restore(&self) -> bool {
        let _guard = self.write_lock.lock().await;

        let (access, refresh, profile) = match self.read_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read persisted session; starting signed out");
                return false;
            }
        };

        if access.is_none() && refresh.is_none() && profile.is_none() {
            return false;
        }

        let parsed = profile
            .as_deref()
            .map(|json| serde_json::from_str::<UserProfile>(json))
            .transpose();

        match (access, parsed) {
            (Some(access), Ok(profile)) => {
                let pair = CredentialPair::issued(
                    AccessToken::new(access),
                    refresh.map(RefreshToken::new),
                );
                self.publish(pair, profile);
                tracing::debug!(generation = %self.generation(), "Session restored");
                true
            }
            (_, Err(e)) => {
                tracing::warn!(error = %e, "Persisted profile is malformed; discarding session");
                self.replace(CredentialPair::empty(), None).await;
                false
            }
            (None, Ok(_)) => {
                tracing::warn!("Persisted session has no access token; discarding it");
                self.replace(CredentialPair::empty(), None).await;
                false
            }
        }
    }

    async fn read_entries(
        &self,
    ) -> Result<(Option<String>, Option<String>, Option<String>), super::StoreError> {
        let access = self.storage.get_dyn(&self.keys.access_token).await?;
        let refresh = self.storage.get_dyn(&self.keys.refresh_token).await?;
        let profile = self.storage.get_dyn(&self.keys.profile).await?;
        Ok((access, refresh, profile))
    }

    /// Persist then publish. Caller holds the write lock.
    async fn replace(&self, pair: CredentialPair, profile: Option<UserProfile>) -> Generation {
        let profile = if pair.is_empty() {
            None
        } else {
            profile.or_else(|| self.profile())
        };

        let profile_json = profile.as_ref().and_then(|p| {
            serde_json::to_string(p)
                .inspect_err(|e| tracing::warn!(error = %e, "Failed to serialize profile (non-fatal)"))
                .ok()
        });

        self.write(
            &self.keys.access_token,
            pair.access_token().map(AccessToken::as_str),
        )
        .await;
        self.write(
            &self.keys.refresh_token,
            pair.refresh_token().map(RefreshToken::as_str),
        )
        .await;
        self.write(&self.keys.profile, profile_json.as_deref()).await;

        self.publish(pair, profile)
    }

    fn publish(&self, pair: CredentialPair, profile: Option<UserProfile>) -> Generation {
        let mut generation = Generation::default();
        self.state.send_modify(|s| {
            s.credentials = pair;
            s.profile = profile;
            s.generation = s.generation.next();
            generation = s.generation;
        });
        generation
    }

    async fn write(&self, key: &str, value: Option<&str>) {
        let result = match value {
            Some(v) => self.storage.set_dyn(key, v).await,
            None => self.storage.remove_dyn(key).await,
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, key, "Failed to persist session entry (non-fatal)");
        }
    }
}
