//! `userdir-auth`: authentication/authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage: credential
//! lookups go through [`CredentialStore`], time through [`userdir_core::Clock`].

pub mod authorize;
pub mod claims;
pub mod credentials;
pub mod identity;
pub mod password;
pub mod roles;
pub mod token;

pub use authorize::{authorize, authorize_operation, AuthzError, Operation, Requirement};
pub use claims::{validate_claims, ClaimsError, TokenClaims};
pub use credentials::{CredentialError, CredentialStore, CredentialVerifier, StoredCredential};
pub use identity::Identity;
pub use password::{Argon2Hasher, PasswordHashError, PasswordHasher};
pub use roles::Role;
pub use token::{IssuedToken, SigningKey, TokenError, TokenService};
