//! Role Registry: sole owner of role records.

use std::sync::Arc;

use tracing::{info, instrument};

use userdir_auth::Role;
use userdir_core::{Clock, Page, PageRequest, RoleId, SortDirection};
use userdir_directory::{RoleDraft, RoleRecord, RoleSortField};

use crate::error::{DirectoryError, DirectoryResult};
use crate::store::{RoleStore, StoreError, UniqueField};

pub struct RoleRegistry {
    store: Arc<dyn RoleStore>,
    clock: Arc<dyn Clock>,
}

impl RoleRegistry {
    pub fn new(store: Arc<dyn RoleStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    #[instrument(skip(self), fields(name = %draft.name), err)]
    pub async fn create(&self, draft: RoleDraft) -> DirectoryResult<RoleRecord> {
        let role = self.store.insert_role(draft, self.clock.now()).await?;
        info!(role_id = %role.id, name = %role.name, "role created");
        Ok(role)
    }

    pub async fn get(&self, id: RoleId) -> DirectoryResult<RoleRecord> {
        self.store
            .find_role(id)
            .await?
            .ok_or_else(|| DirectoryError::RoleNotFound(id.to_string()))
    }

    pub async fn get_by_name(&self, name: &str) -> DirectoryResult<RoleRecord> {
        self.store
            .find_role_by_name(name)
            .await?
            .ok_or_else(|| DirectoryError::RoleNotFound(name.to_owned()))
    }

    pub async fn exists(&self, name: &str) -> DirectoryResult<bool> {
        Ok(self.store.find_role_by_name(name).await?.is_some())
    }

    /// All roles, id ascending.
    pub async fn list(&self) -> DirectoryResult<Vec<RoleRecord>> {
        Ok(self.store.list_roles().await?)
    }

    pub async fn page(
        &self,
        request: PageRequest,
        sort: RoleSortField,
        direction: SortDirection,
    ) -> DirectoryResult<Page<RoleRecord>> {
        Ok(self.store.page_roles(request, sort, direction).await?)
    }

    /// Rename and/or redescribe a role. Tokens already issued keep the old
    /// name until they expire.
    #[instrument(skip(self, draft), err)]
    pub async fn update(&self, id: RoleId, draft: RoleDraft) -> DirectoryResult<RoleRecord> {
        let mut role = self.get(id).await?;
        role.apply(draft, self.clock.now());
        match self.store.update_role(&role).await {
            Ok(()) => Ok(role),
            Err(StoreError::NotFound) => Err(DirectoryError::RoleNotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a role nobody references.
    #[instrument(skip(self), err)]
    pub async fn delete(&self, id: RoleId) -> DirectoryResult<()> {
        match self.store.delete_role(id).await {
            Ok(()) => {
                info!(role_id = %id, "role deleted");
                Ok(())
            }
            Err(StoreError::NotFound) => Err(DirectoryError::RoleNotFound(id.to_string())),
            Err(StoreError::ForeignKeyViolation(_)) => Err(DirectoryError::RoleInUse(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Seed the built-in roles. Safe to run on every start, and against
    /// another instance seeding at the same time.
    pub async fn ensure_defaults(&self) -> DirectoryResult<()> {
        for role in Role::ALL {
            if self.store.find_role_by_name(role.as_str()).await?.is_some() {
                continue;
            }
            let draft = RoleDraft::new(role.as_str(), Some(role.description()))?;
            match self.store.insert_role(draft, self.clock.now()).await {
                Ok(record) => info!(role_id = %record.id, name = %record.name, "default role seeded"),
                Err(StoreError::UniqueViolation(UniqueField::RoleName)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
