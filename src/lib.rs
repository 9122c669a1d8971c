#![doc = include_str!("../README.md")]

pub mod classify;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod notice;
pub mod refresh;
pub mod session;
pub mod store;
pub mod types;

// Re-exports for convenient access
pub use classify::Classifier;
pub use client::{ApiClient, ApiRequest, Interceptor};
pub use config::{ClientConfig, Endpoints};
pub use envelope::{Envelope, EnvelopeMode};
pub use error::{ApiError, Error, ErrorKind};
pub use notice::{LogNavigator, Navigator, Notice, NoticeAdapter, NoticeLevel, Notifier};
pub use refresh::{RefreshCoordinator, RefreshOutcome};
pub use session::SessionManager;
pub use store::{CredentialStore, KeyValueStore, MemoryStore, SessionSnapshot, StorageKeys, StoreError};
pub use types::{
    AccessToken, CredentialPair, Generation, LoginCredentials, RefreshToken, RegisterCredentials,
    UserId, UserProfile,
};
