//! Credential persistence.
//!
//! The [`CredentialStore`] owns the session (token pair, cached profile and
//! generation counter). It persists through a consumer-provided
//! [`KeyValueStore`], which the crate treats as an opaque port.

mod credentials;
mod memory;
mod traits;

pub use credentials::{CredentialStore, SessionSnapshot, StorageKeys};
pub use memory::MemoryStore;
pub use traits::{KeyValueStore, StoreError};
