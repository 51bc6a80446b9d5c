use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{AuthError, Result};
use crate::session::TokenPair;

/// Microsoft credential kept between runs
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredCredential {
    /// Build the record to store after an exchange.
    ///
    /// An exchange that returned no refresh token keeps the previous one.
    pub fn from_exchange(tokens: &TokenPair, previous: Option<&StoredCredential>) -> Self {
        let refresh_token = if tokens.refresh_token.is_empty() {
            previous
                .map(|p| p.refresh_token.clone())
                .unwrap_or_default()
        } else {
            tokens.refresh_token.clone()
        };

        Self {
            refresh_token,
            access_token: tokens.access_token.clone(),
            expires_at: tokens.expires_at(),
            updated_at: Utc::now(),
        }
    }

    pub fn can_refresh(&self) -> bool {
        !self.refresh_token.trim().is_empty()
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

impl std::fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredCredential")
            .field("refresh_token", &"[REDACTED]")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Trait for loading and persisting the Microsoft refresh credential
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    /// A non-empty refresh token is stored
    async fn can_refresh(&self) -> bool {
        matches!(self.load().await, Ok(Some(credential)) if credential.can_refresh())
    }

    /// Load the stored credential, if any
    async fn load(&self) -> Result<Option<StoredCredential>>;

    /// Persist the result of a successful token exchange
    async fn persist(&self, tokens: &TokenPair) -> Result<()>;

    /// Forget the stored credential
    async fn clear(&self) -> Result<()>;
}

/// In-memory credential store for testing and embedding
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    credential: Arc<RwLock<Option<StoredCredential>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with a refresh token, as if a previous run had logged in
    pub fn with_refresh_token(refresh_token: impl Into<String>) -> Self {
        let tokens = TokenPair::new(String::new(), refresh_token.into(), 0);
        Self {
            credential: Arc::new(RwLock::new(Some(StoredCredential::from_exchange(
                &tokens, None,
            )))),
        }
    }
}

#[async_trait::async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<StoredCredential>> {
        Ok(self
            .credential
            .read()
            .map_err(|_| AuthError::Store("Lock poisoned".to_string()))?
            .clone())
    }

    async fn persist(&self, tokens: &TokenPair) -> Result<()> {
        let mut slot = self
            .credential
            .write()
            .map_err(|_| AuthError::Store("Lock poisoned".to_string()))?;
        let next = StoredCredential::from_exchange(tokens, slot.as_ref());
        *slot = Some(next);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.credential
            .write()
            .map_err(|_| AuthError::Store("Lock poisoned".to_string()))?
            .take();
        Ok(())
    }
}
