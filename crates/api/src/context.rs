use userdir_auth::Identity;
use userdir_core::UserId;

/// Authenticated caller of the current request, taken from a validated token.
///
/// Only present on routes behind the bearer middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityContext {
    identity: Identity,
}

impl IdentityContext {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn user_id(&self) -> UserId {
        self.identity.user_id
    }

    pub fn username(&self) -> &str {
        &self.identity.username
    }

    pub fn role(&self) -> &str {
        &self.identity.role
    }
}
