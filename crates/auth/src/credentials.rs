//! Credential Verifier: username + password to [`Identity`].

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

use userdir_core::UserId;

use crate::password::{verify_blocking, PasswordHasher};
use crate::Identity;

/// What the verifier needs to know about an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredential {
    pub user_id: UserId,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub active: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Unknown user, wrong password and inactive account all map here.
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("credential store failure: {0}")]
    Store(String),
}

/// Read-only lookup of stored credentials by username.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_credential(&self, username: &str) -> Result<Option<StoredCredential>, CredentialError>;
}

#[async_trait]
impl<S: CredentialStore + ?Sized> CredentialStore for Arc<S> {
    async fn find_credential(&self, username: &str) -> Result<Option<StoredCredential>, CredentialError> {
        (**self).find_credential(username).await
    }
}

pub struct CredentialVerifier<S> {
    store: S,
    hasher: Arc<dyn PasswordHasher>,
    // Verified against when the user is unknown so both paths cost one hash.
    dummy_hash: Option<String>,
}

impl<S: CredentialStore> CredentialVerifier<S> {
    pub fn new(store: S, hasher: Arc<dyn PasswordHasher>) -> Self {
        let dummy_hash = hasher.hash("userdir-timing-equaliser").ok();
        Self {
            store,
            hasher,
            dummy_hash,
        }
    }

    /// Side-effect free; never reveals which check failed.
    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Identity, CredentialError> {
        let found = self.store.find_credential(username).await?;

        let Some(credential) = found else {
            if let Some(dummy) = &self.dummy_hash {
                let _ = verify_blocking(self.hasher.clone(), password.to_owned(), dummy.clone()).await;
            }
            debug!("authentication rejected");
            return Err(CredentialError::InvalidCredentials);
        };

        let matches = verify_blocking(
            self.hasher.clone(),
            password.to_owned(),
            credential.password_hash.clone(),
        )
        .await;

        if !matches || !credential.active {
            debug!("authentication rejected");
            return Err(CredentialError::InvalidCredentials);
        }

        Ok(Identity::new(credential.user_id, credential.username, credential.role))
    }
}
