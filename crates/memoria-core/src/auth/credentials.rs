use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use keyring::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Keychain service used when no namespace is configured
pub const DEFAULT_SERVICE_NAME: &str = "memoria";

/// Error type returned by secure-storage backends
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// The three secrets the app keeps outside ordinary storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SecretName {
    AccessToken,
    RefreshToken,
    LoginId,
}

impl SecretName {
    pub const ALL: [SecretName; 3] = [
        SecretName::AccessToken,
        SecretName::RefreshToken,
        SecretName::LoginId,
    ];

    /// Logical name, used both as the storage key and as the keychain account
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretName::AccessToken => "ACCESS_TOKEN",
            SecretName::RefreshToken => "REFRESH_TOKEN",
            SecretName::LoginId => "LOGIN_ID",
        }
    }
}

impl fmt::Display for SecretName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Secure storage access failed for {name}: {source}")]
    Access {
        name: SecretName,
        #[source]
        source: BackendError,
    },

    #[error("Secure storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A secure-storage facility keyed by account identifier.
///
/// Implementations are blocking; `CredentialStore` moves every call onto the
/// blocking pool. Reading a missing key is `Ok(None)` and removing a missing
/// key is `Ok(())`.
pub trait SecretBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError>;
    fn set(&self, key: &str, value: &str) -> Result<(), BackendError>;
    fn remove(&self, key: &str) -> Result<(), BackendError>;
}

/// OS keychain backend (macOS Keychain, Windows Credential Manager,
/// Secret Service on Linux).
///
/// One `Entry` is built per key and reused, so every call for a key goes
/// through the same credential.
pub struct KeyringBackend {
    service: String,
    entries: Mutex<HashMap<String, Arc<Entry>>>,
}

impl KeyringBackend {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, key: &str) -> Result<Arc<Entry>, BackendError> {
        let mut entries = self.entries.lock().map_err(|_| "keyring entry cache poisoned")?;
        if let Some(entry) = entries.get(key) {
            return Ok(Arc::clone(entry));
        }
        let entry = Arc::new(Entry::new(&self.service, key)?);
        entries.insert(key.to_string(), Arc::clone(&entry));
        Ok(entry)
    }
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_NAME)
    }
}

impl SecretBackend for KeyringBackend {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.entry(key)?.set_password(value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), BackendError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local backend. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryBackend {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let values = self.values.lock().map_err(|_| "memory backend lock poisoned")?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let mut values = self.values.lock().map_err(|_| "memory backend lock poisoned")?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), BackendError> {
        let mut values = self.values.lock().map_err(|_| "memory backend lock poisoned")?;
        values.remove(key);
        Ok(())
    }
}

/// Confidential storage for the access token, refresh token and login id.
/// Clone is cheap - the backend is shared.
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn SecretBackend>,
}

impl CredentialStore {
    pub fn new(backend: impl SecretBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn with_backend(backend: Arc<dyn SecretBackend>) -> Self {
        Self { backend }
    }

    /// Store backed by the OS keychain under the given service namespace
    pub fn keyring(service: &str) -> Self {
        Self::new(KeyringBackend::new(service))
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    async fn run<T, F>(&self, name: SecretName, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SecretBackend, &str) -> Result<T, BackendError> + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        let result =
            tokio::task::spawn_blocking(move || op(backend.as_ref(), name.as_str())).await?;
        result.map_err(|source| {
            warn!(secret = %name, error = %source, "Secure storage access failed");
            StorageError::Access { name, source }
        })
    }

    /// Store `value` under `name`, replacing any previous value
    pub async fn set(&self, name: SecretName, value: &str) -> Result<(), StorageError> {
        let value = value.to_string();
        self.run(name, move |backend, key| backend.set(key, &value)).await?;
        debug!(secret = %name, "Secret stored");
        Ok(())
    }

    /// Read a secret. Missing secrets read as an empty string.
    pub async fn get(&self, name: SecretName) -> Result<String, StorageError> {
        let value = self.run(name, |backend, key| backend.get(key)).await?;
        Ok(value.unwrap_or_default())
    }

    /// Delete a secret. Deleting a missing secret is not an error.
    pub async fn remove(&self, name: SecretName) -> Result<(), StorageError> {
        self.run(name, |backend, key| backend.remove(key)).await?;
        debug!(secret = %name, "Secret removed");
        Ok(())
    }

    /// Remove all three secrets. Every secret is attempted even if an
    /// earlier removal fails; the first failure is returned.
    pub async fn clear_all(&self) -> Result<(), StorageError> {
        let mut first_error = None;
        for name in SecretName::ALL {
            if let Err(e) = self.remove(name).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// True when a non-empty access token is stored
    pub async fn has_session(&self) -> Result<bool, StorageError> {
        Ok(!self.access_token().await?.is_empty())
    }

    pub async fn access_token(&self) -> Result<String, StorageError> {
        self.get(SecretName::AccessToken).await
    }

    pub async fn set_access_token(&self, token: &str) -> Result<(), StorageError> {
        self.set(SecretName::AccessToken, token).await
    }

    pub async fn remove_access_token(&self) -> Result<(), StorageError> {
        self.remove(SecretName::AccessToken).await
    }

    pub async fn refresh_token(&self) -> Result<String, StorageError> {
        self.get(SecretName::RefreshToken).await
    }

    pub async fn set_refresh_token(&self, token: &str) -> Result<(), StorageError> {
        self.set(SecretName::RefreshToken, token).await
    }

    pub async fn remove_refresh_token(&self) -> Result<(), StorageError> {
        self.remove(SecretName::RefreshToken).await
    }

    pub async fn login_id(&self) -> Result<String, StorageError> {
        self.get(SecretName::LoginId).await
    }

    pub async fn set_login_id(&self, id: &str) -> Result<(), StorageError> {
        self.set(SecretName::LoginId, id).await
    }

    pub async fn remove_login_id(&self) -> Result<(), StorageError> {
        self.remove(SecretName::LoginId).await
    }
}
