use std::future::Future;

use futures_util::future::BoxFuture;

/// Error type returned by storage ports.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Consumer-provided string key-value persistence.
///
/// Backs the [`CredentialStore`](super::CredentialStore). Any durable map
/// works: browser-style local storage, a file, a keychain, a database row.
///
/// # Example
///
/// ```rust,ignore
/// impl KeyValueStore for Keychain {
///     async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
///         Ok(self.entry(key)?.password().ok())
///     }
///
///     async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
///         self.entry(key)?.set_password(value)?;
///         Ok(())
///     }
///
///     async fn remove(&self, key: &str) -> Result<(), StoreError> {
///         self.entry(key)?.delete_password()?;
///         Ok(())
///     }
/// }
/// ```
pub trait KeyValueStore: Send + Sync + 'static {
    /// Read an entry. `Ok(None)` when the key is absent.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Write an entry, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete an entry. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Object-safe wrapper for KeyValueStore (needed for Arc<dyn>).
pub(crate) trait KeyValueStoreDyn: Send + Sync {
    fn get_dyn<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StoreError>>;

    fn set_dyn<'a>(&'a self, key: &'a str, value: &'a str)
    -> BoxFuture<'a, Result<(), StoreError>>;

    fn remove_dyn<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;
}

impl<T: KeyValueStore> KeyValueStoreDyn for T {
    fn get_dyn<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StoreError>> {
        Box::pin(self.get(key))
    }

    fn set_dyn<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.set(key, value))
    }

    fn remove_dyn<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.remove(key))
    }
}
