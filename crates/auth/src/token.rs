//! Token Service: issues and validates signed, stateless identity tokens.
//!
//! ## Signing key lifecycle
//!
//! The HS256 key is generated in memory when the process starts and is never
//! persisted. Restarting the service therefore invalidates every token issued
//! by the previous process; clients must log in again.
//!
//! ## Role claims
//!
//! The role claim is authoritative until the token expires. Renaming a role or
//! changing a user's role does not affect tokens that were already issued.
//! There is no revocation list; logout is client-side.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use thiserror::Error;

use userdir_core::Clock;

use crate::claims::{validate_claims, ClaimsError, TokenClaims};
use crate::Identity;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,

    /// Malformed, tampered with, or signed by another key.
    #[error("token is invalid")]
    Invalid,

    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<ClaimsError> for TokenError {
    fn from(err: ClaimsError) -> Self {
        match err {
            ClaimsError::Expired => TokenError::Expired,
            ClaimsError::NotYetValid | ClaimsError::InvalidTimeWindow => TokenError::Invalid,
        }
    }
}

/// Symmetric signing key held in process memory.
#[derive(Clone)]
pub struct SigningKey(Arc<[u8]>);

impl SigningKey {
    pub const LEN: usize = 32;

    /// Fresh random 256-bit key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; Self::LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(Arc::from(&bytes[..]))
    }

    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        Self(Arc::from(bytes.as_ref()))
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl core::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("SigningKey").field(&"<redacted>").finish()
    }
}

/// An issued token plus its validity window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
    validity: Duration,
}

impl TokenService {
    pub const DEFAULT_VALIDITY_DAYS: i64 = 30;

    pub fn new(key: &SigningKey, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock in `validate_claims`.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(key.as_bytes()),
            decoding: DecodingKey::from_secret(key.as_bytes()),
            validation,
            clock,
            validity: Duration::days(Self::DEFAULT_VALIDITY_DAYS),
        }
    }

    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    pub fn issue(&self, identity: &Identity) -> Result<IssuedToken, TokenError> {
        let now = self.clock.now();
        let exp = now
            .checked_add_signed(self.validity)
            .ok_or_else(|| TokenError::Signing(format!("expiry overflows: {now} + {}", self.validity)))?;
        let claims = TokenClaims {
            sub: identity.username.clone(),
            uid: identity.user_id,
            role: identity.role.clone(),
            iat: now,
            exp,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(IssuedToken {
            token,
            issued_at: claims.iat,
            expires_at: claims.exp,
        })
    }

    /// Verify signature, then the time window, then hand back the embedded
    /// identity. No storage round-trip.
    pub fn validate(&self, token: &str) -> Result<Identity, TokenError> {
        let data = decode::<TokenClaims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            }
        })?;

        validate_claims(&data.claims, self.clock.now())?;
        Ok(data.claims.into_identity())
    }
}

impl core::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenService")
            .field("validity", &self.validity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use userdir_core::{ManualClock, UserId};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn service(clock: Arc<ManualClock>) -> TokenService {
        TokenService::new(&SigningKey::from_bytes(b"0123456789abcdef0123456789abcdef"), clock)
    }

    fn john() -> Identity {
        Identity::new(UserId::new(7), "johndoe", "USER")
    }

    #[test]
    fn issue_then_validate_recovers_identity() {
        let clock = Arc::new(ManualClock::new(start()));
        let svc = service(clock);

        let issued = svc.issue(&john()).unwrap();
        assert_eq!(issued.expires_at - issued.issued_at, Duration::days(30));
        assert_eq!(svc.validate(&issued.token).unwrap(), john());
    }

    #[test]
    fn expires_after_validity_window() {
        let clock = Arc::new(ManualClock::new(start()));
        let svc = service(clock.clone());
        let issued = svc.issue(&john()).unwrap();

        clock.advance(Duration::days(30) - Duration::seconds(1));
        assert!(svc.validate(&issued.token).is_ok());

        clock.advance(Duration::seconds(1));
        assert_eq!(svc.validate(&issued.token), Err(TokenError::Expired));

        clock.advance(Duration::days(365));
        assert_eq!(svc.validate(&issued.token), Err(TokenError::Expired));
    }

    #[test]
    fn tampered_or_foreign_tokens_are_invalid() {
        let clock = Arc::new(ManualClock::new(start()));
        let svc = service(clock.clone());
        let issued = svc.issue(&john()).unwrap();

        let mut tampered = issued.token.clone();
        tampered.push('x');
        assert_eq!(svc.validate(&tampered), Err(TokenError::Invalid));
        assert_eq!(svc.validate("not-a-jwt"), Err(TokenError::Invalid));
        assert_eq!(svc.validate(""), Err(TokenError::Invalid));

        // A restarted process generates a new key.
        let restarted = TokenService::new(&SigningKey::generate(), clock);
        assert_eq!(restarted.validate(&issued.token), Err(TokenError::Invalid));
    }

    #[test]
    fn custom_validity_is_honoured() {
        let clock = Arc::new(ManualClock::new(start()));
        let svc = service(clock.clone()).with_validity(Duration::minutes(5));
        let issued = svc.issue(&john()).unwrap();

        clock.advance(Duration::minutes(5));
        assert_eq!(svc.validate(&issued.token), Err(TokenError::Expired));
    }

    #[test]
    fn unrepresentable_expiry_is_an_error_not_a_panic() {
        let clock = Arc::new(ManualClock::new(start()));
        let svc = service(clock).with_validity(Duration::days(1_000_000_000));
        assert!(matches!(svc.issue(&john()), Err(TokenError::Signing(_))));
    }

    #[test]
    fn role_claim_is_not_rechecked_after_issuance() {
        let clock = Arc::new(ManualClock::new(start()));
        let svc = service(clock);
        let admin = Identity::new(UserId::new(1), "admin", "ADMIN");
        let issued = svc.issue(&admin).unwrap();

        // Whatever happens to the user's role afterwards, the token still
        // carries the role it was issued with.
        let validated = svc.validate(&issued.token).unwrap();
        assert_eq!(validated.role, "ADMIN");
        assert_eq!(validated.known_role(), Some(crate::Role::Admin));
    }

    #[test]
    fn generated_keys_differ_and_debug_is_redacted() {
        let a = SigningKey::generate();
        let b = SigningKey::generate();
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.as_bytes().len(), SigningKey::LEN);
        assert!(!format!("{a:?}").contains(&format!("{:?}", a.as_bytes())));
    }
}
