//! Password hashing collaborator (Argon2id, salted, PHC string format).

use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("password hashing failed: {0}")]
pub struct PasswordHashError(pub String);

/// One-way, salted, deliberately slow password hashing.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, plaintext: &str) -> Result<String, PasswordHashError>;

    /// `false` for a mismatch and for an unparsable stored hash alike.
    fn verify(&self, plaintext: &str, hash: &str) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Custom cost parameters (memory in KiB, iterations, lanes).
    pub fn with_params(m_cost: u32, t_cost: u32, p_cost: u32) -> Result<Self, PasswordHashError> {
        let params = Params::new(m_cost, t_cost, p_cost, None)
            .map_err(|e| PasswordHashError(e.to_string()))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> Result<String, PasswordHashError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| PasswordHashError(e.to_string()))
    }

    fn verify(&self, plaintext: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        self.argon2()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }
}

/// Hash on the blocking pool; Argon2 is CPU-bound.
pub async fn hash_blocking(
    hasher: Arc<dyn PasswordHasher>,
    plaintext: String,
) -> Result<String, PasswordHashError> {
    tokio::task::spawn_blocking(move || hasher.hash(&plaintext))
        .await
        .map_err(|e| PasswordHashError(e.to_string()))?
}

/// Verify on the blocking pool. A panicked worker counts as a mismatch.
pub async fn verify_blocking(hasher: Arc<dyn PasswordHasher>, plaintext: String, hash: String) -> bool {
    tokio::task::spawn_blocking(move || hasher.verify(&plaintext, &hash))
        .await
        .unwrap_or(false)
}
