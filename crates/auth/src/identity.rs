use serde::{Deserialize, Serialize};

use userdir_core::UserId;

use crate::Role;

/// Verified (user id, username, role) triple.
///
/// Produced by successful authentication or token validation; never built
/// from unverified input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
    /// Role name as it was when the identity was verified.
    pub role: String,
}

impl Identity {
    pub fn new(user_id: UserId, username: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            role: role.into(),
        }
    }

    /// The role claim, if it names a role the guard knows about.
    pub fn known_role(&self) -> Option<Role> {
        Role::from_name(&self.role)
    }
}
