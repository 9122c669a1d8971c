//! Single-flight access token refresh.
//!
//! Many requests can observe an expired access token at once. The
//! [`RefreshCoordinator`] guarantees at most one refresh call per credential
//! [`Generation`]: the first caller starts it, later callers for the same
//! generation await the same ticket, and callers holding an older generation
//! are told to re-read the credentials without any network call.
//!
//! The refresh runs on its own task, so it completes (and updates the store)
//! even if every caller waiting on it goes away.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture, Shared};

use crate::error::{ApiError, ErrorKind};
use crate::notice::Navigator;
use crate::store::CredentialStore;
use crate::types::{CredentialPair, Generation, RefreshToken};

/// Result of asking the coordinator for a refresh.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// New credentials were stored at this generation.
    Refreshed(Generation),
    /// The session already moved past the caller's generation; re-read the
    /// credentials and retry.
    Stale(Generation),
    /// The refresh failed. `AuthInvalid` means the session was cleared.
    Failed(ApiError),
}

struct Ticket {
    id: u64,
    generation: Generation,
    outcome: Shared<BoxFuture<'static, RefreshOutcome>>,
}

/// In-flight refresh of one [`CredentialStore`].
///
/// Owned by the store, so every coordinator over the same store shares it.
#[derive(Default)]
pub(crate) struct RefreshSlot {
    ticket: Mutex<Option<Ticket>>,
    next_id: AtomicU64,
}

impl RefreshSlot {
    fn lock(&self) -> MutexGuard<'_, Option<Ticket>> {
        self.ticket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Coordinates refreshes against a [`CredentialStore`].
///
/// The in-flight slot lives in the store: coordinators (and clients) built
/// over the same store never refresh the same generation twice. A rejection
/// is reported to the navigator of the coordinator that started the refresh.
#[derive(Clone)]
pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    navigator: Arc<dyn Navigator>,
}

impl RefreshCoordinator {
    #[must_use]
    pub fn new(store: Arc<CredentialStore>, navigator: Arc<dyn Navigator>) -> Self {
        Self { store, navigator }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Refresh the credentials observed at `observed`.
    ///
    /// `refresh` is invoked with the current refresh token only if this call
    /// starts a new refresh. It must not go through the coordinator itself.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn refresh<F, Fut>(&self, observed: Generation, refresh: F) -> RefreshOutcome
    where
        F: FnOnce(RefreshToken) -> Fut,
        Fut: Future<Output = Result<CredentialPair, ApiError>> + Send + 'static,
    {
        let outcome = {
            let mut slot = self.store.refresh_slot().lock();

            let live = self.store.generation();
            if live != observed {
                tracing::debug!(%observed, %live, "Refresh skipped: credentials already replaced");
                return RefreshOutcome::Stale(live);
            }

            match slot.as_ref() {
                Some(ticket) if ticket.generation == observed => {
                    tracing::debug!(generation = %observed, "Joining in-flight refresh");
                    ticket.outcome.clone()
                }
                _ => {
                    let ticket = self.start(observed, refresh);
                    let outcome = ticket.outcome.clone();
                    *slot = Some(ticket);
                    outcome
                }
            }
        };

        outcome.await
    }

    /// Clear the session if it is still at `observed` and route to login.
    ///
    /// Used when a request made with freshly refreshed credentials is still
    /// rejected. Only the first caller per generation clears and navigates.
    pub async fn invalidate(&self, observed: Generation, reason: &ApiError) -> bool {
        if self.store.clear_if(observed).await.is_some() {
            tracing::warn!(error = %reason, "Refreshed credentials rejected; signing out");
            self.navigator.login_required(reason);
            true
        } else {
            false
        }
    }

    fn start<F, Fut>(&self, generation: Generation, refresh: F) -> Ticket
    where
        F: FnOnce(RefreshToken) -> Fut,
        Fut: Future<Output = Result<CredentialPair, ApiError>> + Send + 'static,
    {
        let id = self.store.refresh_slot().next_id.fetch_add(1, Ordering::Relaxed);

        let call: BoxFuture<'static, Result<CredentialPair, ApiError>> =
            match self.store.get().refresh_token().cloned() {
                Some(token) => refresh(token).boxed(),
                None => future::ready(Err(ApiError::auth_invalid("no refresh token available")))
                    .boxed(),
            };

        tracing::debug!(%generation, "Starting token refresh");

        let this = self.clone();
        let task = tokio::spawn(async move {
            let result = call.await;
            this.settle(id, generation, result).await
        });

        let outcome = async move {
            task.await.unwrap_or_else(|e| {
                RefreshOutcome::Failed(ApiError::unknown(0, format!("refresh task failed: {e}")))
            })
        }
        .boxed()
        .shared();

        Ticket {
            id,
            generation,
            outcome,
        }
    }

    async fn settle(
        &self,
        id: u64,
        generation: Generation,
        result: Result<CredentialPair, ApiError>,
    ) -> RefreshOutcome {
        let outcome = match result {
            Ok(pair) => match self.store.set_if(generation, pair).await {
                Some(next) => {
                    tracing::info!(generation = %next, "Access token refreshed");
                    RefreshOutcome::Refreshed(next)
                }
                None => {
                    tracing::debug!("Session replaced during refresh; discarding refreshed tokens");
                    RefreshOutcome::Stale(self.store.generation())
                }
            },
            Err(e) if is_rejection(&e) => {
                let reason = ApiError::auth_invalid(e.message());
                if self.store.clear_if(generation).await.is_some() {
                    tracing::error!(error = %e, "Refresh token rejected; signing out");
                    self.navigator.login_required(&reason);
                    RefreshOutcome::Failed(reason)
                } else {
                    RefreshOutcome::Stale(self.store.generation())
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed; session kept");
                RefreshOutcome::Failed(e)
            }
        };

        self.release(id);
        outcome
    }

    fn release(&self, id: u64) {
        let mut slot = self.store.refresh_slot().lock();
        if slot.as_ref().is_some_and(|t| t.id == id) {
            *slot = None;
        }
    }
}

/// The refresh endpoint refused the refresh token itself, as opposed to a
/// transport or server failure that may succeed later.
fn is_rejection(e: &ApiError) -> bool {
    matches!(
        e.kind(),
        ErrorKind::AuthExpired
            | ErrorKind::AuthInvalid
            | ErrorKind::Forbidden
            | ErrorKind::NotFound
            | ErrorKind::Validation
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;
    use crate::notice::LogNavigator;
    use crate::store::MemoryStore;
    use crate::types::{AccessToken, UserProfile};

    fn pair(access: &str, refresh: Option<&str>) -> CredentialPair {
        CredentialPair::issued(AccessToken::new(access), refresh.map(RefreshToken::new))
    }

    struct Fixture {
        coordinator: RefreshCoordinator,
        store: Arc<CredentialStore>,
        calls: Arc<AtomicUsize>,
        logins: Arc<AtomicUsize>,
    }

    async fn fixture(initial: CredentialPair) -> Fixture {
        let store = Arc::new(CredentialStore::new(MemoryStore::new()));
        store.set(initial, Some(UserProfile::new("1", "Ann"))).await;

        let logins = Arc::new(AtomicUsize::new(0));
        let counter = logins.clone();
        let navigator: Arc<dyn Navigator> = Arc::new(move |_: &ApiError| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        Fixture {
            coordinator: RefreshCoordinator::new(store.clone(), navigator),
            store,
            calls: Arc::new(AtomicUsize::new(0)),
            logins,
        }
    }

    /// A refresher that waits for `gate` and then returns `result`.
    fn gated(
        calls: Arc<AtomicUsize>,
        gate: Arc<Notify>,
        result: Result<CredentialPair, ApiError>,
    ) -> impl FnOnce(RefreshToken) -> BoxFuture<'static, Result<CredentialPair, ApiError>> {
        move |_token| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                gate.notified().await;
                result
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let f = fixture(pair("a1", Some("r1"))).await;
        let observed = f.store.generation();
        let gate = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..10 {
            let coordinator = f.coordinator.clone();
            let refresher = gated(f.calls.clone(), gate.clone(), Ok(pair("a2", Some("r2"))));
            handles.push(tokio::spawn(async move {
                coordinator.refresh(observed, refresher).await
            }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_one();

        for handle in handles {
            let outcome = handle.await.unwrap();
            assert!(matches!(
                outcome,
                RefreshOutcome::Refreshed(_) | RefreshOutcome::Stale(_)
            ));
        }

        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.store.get(), pair("a2", Some("r2")));
        assert_eq!(f.store.profile().unwrap().display_name, "Ann");
        assert!(f.store.generation() > observed);
    }

    #[tokio::test]
    async fn coordinators_over_one_store_share_the_slot() {
        let f = fixture(pair("a1", Some("r1"))).await;
        let other = RefreshCoordinator::new(f.store.clone(), Arc::new(LogNavigator));
        let observed = f.store.generation();
        let gate = Arc::new(Notify::new());

        let first = tokio::spawn({
            let coordinator = f.coordinator.clone();
            let refresher = gated(f.calls.clone(), gate.clone(), Ok(pair("a2", Some("r2"))));
            async move { coordinator.refresh(observed, refresher).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = tokio::spawn({
            let refresher = gated(f.calls.clone(), gate.clone(), Err(ApiError::auth_invalid("reused")));
            async move { other.refresh(observed, refresher).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_one();

        assert!(matches!(first.await.unwrap(), RefreshOutcome::Refreshed(_)));
        assert!(matches!(second.await.unwrap(), RefreshOutcome::Refreshed(_)));
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.store.get(), pair("a2", Some("r2")));
        assert_eq!(f.logins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_generation_short_circuits() {
        let f = fixture(pair("a1", Some("r1"))).await;
        let old = f.store.generation();
        let current = f.store.set(pair("a2", Some("r2")), None).await;

        let calls = f.calls.clone();
        let outcome = f
            .coordinator
            .refresh(old, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(pair("never", None)) }
            })
            .await;

        assert!(matches!(outcome, RefreshOutcome::Stale(g) if g == current));
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_refresh_fans_out_and_signs_out_once() {
        let f = fixture(pair("a1", Some("r1"))).await;
        let observed = f.store.generation();
        let gate = Arc::new(Notify::new());
        let rejected = ApiError::from_kind(ErrorKind::AuthExpired, 401, "refresh token expired");

        let mut handles = Vec::new();
        for _ in 0..5 {
            let coordinator = f.coordinator.clone();
            let refresher = gated(f.calls.clone(), gate.clone(), Err(rejected.clone()));
            handles.push(tokio::spawn(async move {
                coordinator.refresh(observed, refresher).await
            }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_one();

        for handle in handles {
            match handle.await.unwrap() {
                RefreshOutcome::Failed(e) => assert_eq!(e.kind(), ErrorKind::AuthInvalid),
                RefreshOutcome::Stale(_) => {}
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.logins.load(Ordering::SeqCst), 1);
        assert!(f.store.get().is_empty());
        assert!(f.store.profile().is_none());
    }

    #[tokio::test]
    async fn transient_failure_keeps_session_and_allows_retry() {
        let f = fixture(pair("a1", Some("r1"))).await;
        let observed = f.store.generation();
        let down = ApiError::from_kind(ErrorKind::Server, 503, "maintenance");

        let calls = f.calls.clone();
        let outcome = f
            .coordinator
            .refresh(observed, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(down) }
            })
            .await;
        assert!(matches!(outcome, RefreshOutcome::Failed(ref e) if e.kind() == ErrorKind::Server));
        assert_eq!(f.store.get(), pair("a1", Some("r1")));
        assert_eq!(f.store.generation(), observed);
        assert_eq!(f.logins.load(Ordering::SeqCst), 0);

        let calls = f.calls.clone();
        let outcome = f
            .coordinator
            .refresh(observed, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(pair("a2", Some("r2"))) }
            })
            .await;
        assert!(matches!(outcome, RefreshOutcome::Refreshed(_)));
        assert_eq!(f.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_refresh_token_is_terminal_without_network() {
        let f = fixture(pair("a1", None)).await;
        let observed = f.store.generation();

        let calls = f.calls.clone();
        let outcome = f
            .coordinator
            .refresh(observed, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(pair("never", None)) }
            })
            .await;

        assert!(matches!(outcome, RefreshOutcome::Failed(ref e) if e.requires_relogin()));
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.logins.load(Ordering::SeqCst), 1);
        assert!(f.store.get().is_empty());
    }

    #[tokio::test]
    async fn refresh_does_not_overwrite_newer_login() {
        let f = fixture(pair("a1", Some("r1"))).await;
        let observed = f.store.generation();
        let gate = Arc::new(Notify::new());

        let coordinator = f.coordinator.clone();
        let refresher = gated(f.calls.clone(), gate.clone(), Ok(pair("refreshed", Some("r2"))));
        let pending = tokio::spawn(async move { coordinator.refresh(observed, refresher).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let login = f.store.set(pair("fresh-login", Some("r9")), None).await;
        gate.notify_one();

        let outcome = pending.await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Stale(g) if g == login));
        assert_eq!(f.store.get(), pair("fresh-login", Some("r9")));
    }

    #[tokio::test]
    async fn refresh_completes_after_callers_go_away() {
        let f = fixture(pair("a1", Some("r1"))).await;
        let observed = f.store.generation();
        let gate = Arc::new(Notify::new());

        let coordinator = f.coordinator.clone();
        let refresher = gated(f.calls.clone(), gate.clone(), Ok(pair("a2", Some("r2"))));
        let caller = tokio::spawn(async move { coordinator.refresh(observed, refresher).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        caller.abort();
        gate.notify_one();

        let mut rx = f.store.subscribe();
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|s| s.generation > observed))
            .await
            .expect("refresh should finish on its own")
            .unwrap();
        assert_eq!(f.store.get(), pair("a2", Some("r2")));
    }

    #[tokio::test]
    async fn invalidate_signs_out_once_per_generation() {
        let f = fixture(pair("a1", Some("r1"))).await;
        let observed = f.store.generation();
        let reason = ApiError::auth_invalid("still unauthorized");

        assert!(f.coordinator.invalidate(observed, &reason).await);
        assert!(!f.coordinator.invalidate(observed, &reason).await);
        assert_eq!(f.logins.load(Ordering::SeqCst), 1);
        assert!(f.store.get().is_empty());
    }
}
