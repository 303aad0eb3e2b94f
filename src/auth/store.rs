// Credential store abstraction and in-memory implementation

use dashmap::DashMap;
use std::sync::Arc;

use super::types::CredentialPair;
use crate::config::AuthConfig;
use crate::error::StoreError;

/// Key/value storage for the opaque token strings
pub trait CredentialStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

impl<S: CredentialStore + ?Sized> CredentialStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key)
    }
}

/// Process-local store, lost on exit
#[derive(Clone, Default)]
pub struct MemoryCredentialStore {
    values: Arc<DashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with a token pair under the default keys
    pub fn with_tokens(access_token: &str, refresh_token: &str) -> Self {
        let store = Self::new();
        let config = AuthConfig::default();
        store
            .values
            .insert(config.access_token_key, access_token.to_string());
        store
            .values
            .insert(config.refresh_token_key, refresh_token.to_string());
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.remove(key);
        Ok(())
    }
}

/// Read both tokens
pub(crate) fn read_pair<S: CredentialStore + ?Sized>(
    store: &S,
    config: &AuthConfig,
) -> Result<CredentialPair, StoreError> {
    Ok(CredentialPair {
        access_token: store.get(&config.access_token_key)?,
        refresh_token: store.get(&config.refresh_token_key)?,
    })
}

/// Write the access token and, when given, the refresh token
pub(crate) fn write_pair<S: CredentialStore + ?Sized>(
    store: &S,
    config: &AuthConfig,
    access_token: &str,
    refresh_token: Option<&str>,
) -> Result<(), StoreError> {
    store.set(&config.access_token_key, access_token)?;
    if let Some(refresh_token) = refresh_token {
        store.set(&config.refresh_token_key, refresh_token)?;
    }
    Ok(())
}

/// Remove both tokens
pub(crate) fn clear_pair<S: CredentialStore + ?Sized>(
    store: &S,
    config: &AuthConfig,
) -> Result<(), StoreError> {
    store.remove(&config.access_token_key)?;
    store.remove(&config.refresh_token_key)
}
