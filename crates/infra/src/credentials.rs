//! [`CredentialStore`] backed by the directory stores.

use std::sync::Arc;

use async_trait::async_trait;

use userdir_auth::{CredentialError, CredentialStore, StoredCredential};

use crate::store::{RoleStore, StoreError, UserStore};

pub struct DirectoryCredentials {
    users: Arc<dyn UserStore>,
    roles: Arc<dyn RoleStore>,
}

impl DirectoryCredentials {
    pub fn new(users: Arc<dyn UserStore>, roles: Arc<dyn RoleStore>) -> Self {
        Self { users, roles }
    }
}

fn store_error(err: StoreError) -> CredentialError {
    CredentialError::Store(err.to_string())
}

#[async_trait]
impl CredentialStore for DirectoryCredentials {
    async fn find_credential(&self, username: &str) -> Result<Option<StoredCredential>, CredentialError> {
        let Some(user) = self.users.find_user_by_username(username).await.map_err(store_error)? else {
            return Ok(None);
        };
        // The foreign key guarantees the role exists while the user does.
        let role = self
            .roles
            .find_role(user.role_id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| CredentialError::Store(format!("role {} of user {} is missing", user.role_id, user.id)))?;

        Ok(Some(StoredCredential {
            user_id: user.id,
            active: user.is_active(),
            username: user.username,
            password_hash: user.password_hash,
            role: role.name,
        }))
    }
}
