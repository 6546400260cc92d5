//! In-memory directory store for tests/dev.
//!
//! Both tables sit behind one lock, so every uniqueness and reference check
//! happens atomically with the write it guards.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use userdir_core::{Page, PageRequest, RoleId, SortDirection, UserId};
use userdir_directory::{AssetReference, NewUser, RoleDraft, RoleRecord, RoleSortField, User, UserSortField, UserStatus};

use super::{swap_avatar, RoleStore, StoreError, UniqueField, UserStore};

#[derive(Debug, Default)]
struct Tables {
    roles: BTreeMap<RoleId, RoleRecord>,
    users: BTreeMap<UserId, User>,
    last_role_id: i64,
    last_user_id: i64,
}

impl Tables {
    fn role_name_taken(&self, name: &str, except: Option<RoleId>) -> bool {
        self.roles
            .values()
            .any(|r| r.name == name && Some(r.id) != except)
    }

    fn user_conflict(&self, username: &str, email: &str, except: Option<UserId>) -> Option<UniqueField> {
        let others = self.users.values().filter(|u| Some(u.id) != except);
        for other in others {
            if other.username == username {
                return Some(UniqueField::Username);
            }
            if other.email == email {
                return Some(UniqueField::Email);
            }
        }
        None
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDirectoryStore {
    inner: RwLock<Tables>,
}

impl InMemoryDirectoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RoleStore for InMemoryDirectoryStore {
    async fn insert_role(&self, draft: RoleDraft, now: DateTime<Utc>) -> Result<RoleRecord, StoreError> {
        let mut tables = self.write();
        if tables.role_name_taken(&draft.name, None) {
            return Err(StoreError::UniqueViolation(UniqueField::RoleName));
        }
        tables.last_role_id += 1;
        let role = RoleRecord {
            id: RoleId::new(tables.last_role_id),
            name: draft.name,
            description: draft.description,
            created_at: now,
            updated_at: now,
        };
        tables.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn update_role(&self, role: &RoleRecord) -> Result<(), StoreError> {
        let mut tables = self.write();
        if !tables.roles.contains_key(&role.id) {
            return Err(StoreError::NotFound);
        }
        if tables.role_name_taken(&role.name, Some(role.id)) {
            return Err(StoreError::UniqueViolation(UniqueField::RoleName));
        }
        tables.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn delete_role(&self, id: RoleId) -> Result<(), StoreError> {
        let mut tables = self.write();
        if !tables.roles.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        if tables.users.values().any(|u| u.role_id == id) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "role {id} is still referenced by users"
            )));
        }
        tables.roles.remove(&id);
        Ok(())
    }

    async fn find_role(&self, id: RoleId) -> Result<Option<RoleRecord>, StoreError> {
        Ok(self.read().roles.get(&id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<RoleRecord>, StoreError> {
        Ok(self.read().roles.values().find(|r| r.name == name).cloned())
    }

    async fn list_roles(&self) -> Result<Vec<RoleRecord>, StoreError> {
        Ok(self.read().roles.values().cloned().collect())
    }

    async fn page_roles(
        &self,
        request: PageRequest,
        sort: RoleSortField,
        direction: SortDirection,
    ) -> Result<Page<RoleRecord>, StoreError> {
        let mut roles: Vec<RoleRecord> = self.read().roles.values().cloned().collect();
        roles.sort_by(|a, b| sort.compare(a, b, direction));
        Ok(Page::from_sorted(roles, request))
    }
}

#[async_trait]
impl UserStore for InMemoryDirectoryStore {
    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut tables = self.write();
        if let Some(field) = tables.user_conflict(&user.username, &user.email, None) {
            return Err(StoreError::UniqueViolation(field));
        }
        if !tables.roles.contains_key(&user.role_id) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "role {} does not exist",
                user.role_id
            )));
        }
        tables.last_user_id += 1;
        let user = user.into_user(UserId::new(tables.last_user_id));
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user(
        &self,
        user: &User,
        avatar: Option<&AssetReference>,
    ) -> Result<Option<AssetReference>, StoreError> {
        let mut tables = self.write();
        if let Some(field) = tables.user_conflict(&user.username, &user.email, Some(user.id)) {
            return Err(StoreError::UniqueViolation(field));
        }
        if !tables.roles.contains_key(&user.role_id) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "role {} does not exist",
                user.role_id
            )));
        }
        let stored = tables.users.get_mut(&user.id).ok_or(StoreError::NotFound)?;
        let (status, is_deleted, deleted_at) = (stored.status, stored.is_deleted, stored.deleted_at);
        let (kept, displaced) = swap_avatar(stored.avatar.take(), avatar);
        *stored = User {
            status,
            is_deleted,
            deleted_at,
            avatar: kept,
            created_at: stored.created_at,
            password_hash: stored.password_hash.clone(),
            ..user.clone()
        };
        Ok(displaced)
    }

    async fn transition_user(
        &self,
        id: UserId,
        status: UserStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, StoreError> {
        let mut tables = self.write();
        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(None);
        };
        match status {
            UserStatus::Active => user.activate(now),
            UserStatus::Inactive => user.deactivate(now),
        }
        Ok(Some(user.clone()))
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.read().users.get(&id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.read().users.values().find(|u| u.username == username).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.read().users.values().find(|u| u.email == email).cloned())
    }

    async fn search_users(
        &self,
        keyword: Option<&str>,
        request: PageRequest,
        sort: UserSortField,
        direction: SortDirection,
    ) -> Result<Page<User>, StoreError> {
        let mut users: Vec<User> = self
            .read()
            .users
            .values()
            .filter(|u| keyword.is_none_or(|k| u.matches_keyword(k)))
            .cloned()
            .collect();
        users.sort_by(|a, b| sort.compare(a, b, direction));
        Ok(Page::from_sorted(users, request))
    }
}
