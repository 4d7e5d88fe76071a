//! Authentication module for managing secrets and session state.
//!
//! This module provides:
//! - `CredentialStore`: Secure OS-level storage for the access token,
//!   refresh token and login id via keyring
//! - `SessionState` / `SessionTracker`: The observable login status
//!
//! A session is never stored on its own; it exists while a non-empty
//! access token is stored.

pub mod credentials;
pub mod session;

pub use credentials::{
    BackendError, CredentialStore, KeyringBackend, MemoryBackend, SecretBackend, SecretName,
    StorageError,
};
pub use session::{SessionState, SessionTracker, TokenPair};
