//! Postgres-backed directory store.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | Constraint | StoreError |
//! |-----------------------|------------|------------|
//! | `23505` | `users_username_key` | `UniqueViolation(Username)` |
//! | `23505` | `users_email_key` | `UniqueViolation(Email)` |
//! | `23505` | `roles_name_key` | `UniqueViolation(RoleName)` |
//! | `23503` | `users_role_id_fkey` | `ForeignKeyViolation` (missing role on write, referenced role on delete) |
//! | Any other | N/A | `Backend` |
//!
//! Sort columns are interpolated from the closed `UserSortField` /
//! `RoleSortField` enums; everything user-supplied is bound.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::instrument;

use userdir_core::{Page, PageRequest, RoleId, SortDirection, UserId};
use userdir_directory::{
    AssetReference, NewUser, RoleDraft, RoleRecord, RoleSortField, User, UserSortField, UserStatus,
};

use super::{swap_avatar, RoleStore, StoreError, UniqueField, UserStore};

const MIGRATION: &str = include_str!("../../migrations/0001_directory.sql");

const USER_COLUMNS: &str = r#"
    u.id, u.name, u.username, u.email, u.password_hash, u.phone, u.status, u.is_deleted,
    u.avatar_key, u.avatar_url, u.role_id, u.created_at, u.updated_at, u.deleted_at,
    ARRAY(SELECT s.skill FROM user_skills s WHERE s.user_id = u.id ORDER BY s.skill) AS skills
"#;

const ROLE_COLUMNS: &str = "id, name, description, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresDirectoryStore {
    pool: PgPool,
}

impl PostgresDirectoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and constraints if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn fetch_user_where(&self, operation: &str, clause: &str, value: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE {clause}");
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        row.as_ref().map(user_from_row).transpose()
    }
}

#[async_trait]
impl RoleStore for PostgresDirectoryStore {
    #[instrument(skip(self, draft), fields(name = %draft.name), err)]
    async fn insert_role(&self, draft: RoleDraft, now: DateTime<Utc>) -> Result<RoleRecord, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO roles (name, description, created_at, updated_at) \
             VALUES ($1, $2, $3, $3) RETURNING {ROLE_COLUMNS}"
        ))
        .bind(&draft.name)
        .bind(&draft.description)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_role", e))?;
        role_from_row(&row)
    }

    #[instrument(skip(self, role), fields(role_id = %role.id), err)]
    async fn update_role(&self, role: &RoleRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE roles SET name = $2, description = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(role.id.get())
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_role", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(role_id = %id), err)]
    async fn delete_role(&self, id: RoleId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn find_role(&self, id: RoleId) -> Result<Option<RoleRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_role", e))?;
        row.as_ref().map(role_from_row).transpose()
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<RoleRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE name = $1"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_role_by_name", e))?;
        row.as_ref().map(role_from_row).transpose()
    }

    async fn list_roles(&self) -> Result<Vec<RoleRecord>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY id ASC"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_roles", e))?;
        rows.iter().map(role_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn page_roles(
        &self,
        request: PageRequest,
        sort: RoleSortField,
        direction: SortDirection,
    ) -> Result<Page<RoleRecord>, StoreError> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM roles")
            .fetch_one(&self.pool)
            .await
            .and_then(|row| row.try_get("total"))
            .map_err(|e| map_sqlx_error("count_roles", e))?;

        let sql = format!(
            "SELECT {ROLE_COLUMNS} FROM roles {} LIMIT $1 OFFSET $2",
            order_by("", sort.column(), direction)
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(request.size()))
            .bind(offset(request))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("page_roles", e))?;

        let items = rows.iter().map(role_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, request, total.max(0) as u64))
    }
}

#[async_trait]
impl UserStore for PostgresDirectoryStore {
    #[instrument(skip(self, user), fields(username = %user.username), err)]
    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("insert_user", e))?;

        let (avatar_key, avatar_url) = avatar_columns(user.avatar.as_ref());
        let id: i64 = sqlx::query(
            r#"
            INSERT INTO users (
                name, username, email, password_hash, phone, status, is_deleted,
                avatar_key, avatar_url, role_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, 'ACTIVE', FALSE, $6, $7, $8, $9, $9)
            RETURNING id
            "#,
        )
        .bind(&user.name)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.phone)
        .bind(avatar_key)
        .bind(avatar_url)
        .bind(user.role_id.get())
        .bind(user.created_at)
        .fetch_one(&mut *tx)
        .await
        .and_then(|row| row.try_get("id"))
        .map_err(|e| map_sqlx_error("insert_user", e))?;

        let skills: Vec<String> = user.skills.iter().cloned().collect();
        replace_skills(&mut tx, id, &skills).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("insert_user", e))?;

        Ok(user.into_user(UserId::new(id)))
    }

    #[instrument(skip(self, user, avatar), fields(user_id = %user.id), err)]
    async fn update_user(
        &self,
        user: &User,
        avatar: Option<&AssetReference>,
    ) -> Result<Option<AssetReference>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("update_user", e))?;

        // Row lock: concurrent updates of one user swap the avatar in turn.
        let locked = sqlx::query("SELECT avatar_key, avatar_url FROM users WHERE id = $1 FOR UPDATE")
            .bind(user.id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_user", e))?
            .ok_or(StoreError::NotFound)?;
        let (kept, displaced) = swap_avatar(avatar_from_row(&locked)?, avatar);

        let (avatar_key, avatar_url) = avatar_columns(kept.as_ref());
        let result = sqlx::query(
            r#"
            UPDATE users
            SET name = $2, username = $3, email = $4, phone = $5,
                avatar_key = $6, avatar_url = $7, role_id = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(user.id.get())
        .bind(&user.name)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(avatar_key)
        .bind(avatar_url)
        .bind(user.role_id.get())
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_user", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        sqlx::query("DELETE FROM user_skills WHERE user_id = $1")
            .bind(user.id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_user", e))?;
        let skills: Vec<String> = user.skills.iter().cloned().collect();
        replace_skills(&mut tx, user.id.get(), &skills).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("update_user", e))?;
        Ok(displaced)
    }

    #[instrument(skip(self), fields(user_id = %id, status = %status), err)]
    async fn transition_user(
        &self,
        id: UserId,
        status: UserStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, StoreError> {
        // Right-hand side column references see the pre-update row, so a
        // repeated transition leaves the timestamps untouched.
        let updated = sqlx::query(
            r#"
            UPDATE users
            SET status = $2,
                is_deleted = ($2::text = 'INACTIVE'),
                deleted_at = CASE
                    WHEN status = $2::text THEN deleted_at
                    WHEN $2::text = 'INACTIVE' THEN $3
                    ELSE NULL
                END,
                updated_at = CASE WHEN status = $2::text THEN updated_at ELSE $3 END
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .bind(status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("transition_user", e))?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_user(id).await
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = $1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_user", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.fetch_user_where("find_user_by_username", "u.username = $1", username)
            .await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.fetch_user_where("find_user_by_email", "u.email = $1", email)
            .await
    }

    #[instrument(skip(self), err)]
    async fn search_users(
        &self,
        keyword: Option<&str>,
        request: PageRequest,
        sort: UserSortField,
        direction: SortDirection,
    ) -> Result<Page<User>, StoreError> {
        let pattern = keyword.map(like_pattern);
        let filter = r#"
            WHERE $1::text IS NULL
               OR LOWER(u.username) LIKE $1
               OR LOWER(u.email) LIKE $1
               OR LOWER(u.name) LIKE $1
        "#;

        let total: i64 = sqlx::query(&format!("SELECT COUNT(*) AS total FROM users u {filter}"))
            .bind(&pattern)
            .fetch_one(&self.pool)
            .await
            .and_then(|row| row.try_get("total"))
            .map_err(|e| map_sqlx_error("count_users", e))?;

        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users u {filter} {} LIMIT $2 OFFSET $3",
            order_by("u.", sort.column(), direction)
        );
        let rows = sqlx::query(&sql)
            .bind(&pattern)
            .bind(i64::from(request.size()))
            .bind(offset(request))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("search_users", e))?;

        let items = rows.iter().map(user_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, request, total.max(0) as u64))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

async fn replace_skills(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: i64,
    skills: &[String],
) -> Result<(), StoreError> {
    if skills.is_empty() {
        return Ok(());
    }
    sqlx::query("INSERT INTO user_skills (user_id, skill) SELECT $1, UNNEST($2::varchar[])")
        .bind(user_id)
        .bind(skills)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("replace_skills", e))?;
    Ok(())
}

fn order_by(prefix: &str, column: &str, direction: SortDirection) -> String {
    if column == "id" {
        format!("ORDER BY {prefix}id {}", direction.as_sql())
    } else {
        format!("ORDER BY {prefix}{column} {}, {prefix}id ASC", direction.as_sql())
    }
}

fn offset(request: PageRequest) -> i64 {
    i64::try_from(request.offset()).unwrap_or(i64::MAX)
}

/// `%keyword%` with LIKE metacharacters escaped (backslash is the default escape).
fn like_pattern(keyword: &str) -> String {
    let mut pattern = String::with_capacity(keyword.len() + 2);
    pattern.push('%');
    for c in keyword.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn avatar_columns(avatar: Option<&AssetReference>) -> (Option<&str>, Option<&str>) {
    match avatar {
        Some(a) => (Some(a.storage_key.as_str()), Some(a.public_url.as_str())),
        None => (None, None),
    }
}

fn avatar_from_row(row: &PgRow) -> Result<Option<AssetReference>, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Backend(format!("failed to decode avatar columns: {e}"));
    let key: Option<String> = row.try_get("avatar_key").map_err(decode)?;
    let url: Option<String> = row.try_get("avatar_url").map_err(decode)?;
    Ok(match (key, url) {
        (Some(storage_key), Some(public_url)) => Some(AssetReference {
            storage_key,
            public_url,
        }),
        _ => None,
    })
}

fn role_from_row(row: &PgRow) -> Result<RoleRecord, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Backend(format!("failed to decode role row: {e}"));
    Ok(RoleRecord {
        id: RoleId::new(row.try_get("id").map_err(decode)?),
        name: row.try_get("name").map_err(decode)?,
        description: row.try_get("description").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Backend(format!("failed to decode user row: {e}"));

    let status: String = row.try_get("status").map_err(decode)?;
    let status = UserStatus::from_str(&status).map_err(|e| StoreError::Backend(e.to_string()))?;

    let avatar = avatar_from_row(row)?;

    let skills: Vec<String> = row.try_get("skills").map_err(decode)?;

    Ok(User {
        id: UserId::new(row.try_get("id").map_err(decode)?),
        name: row.try_get("name").map_err(decode)?,
        username: row.try_get("username").map_err(decode)?,
        email: row.try_get("email").map_err(decode)?,
        password_hash: row.try_get("password_hash").map_err(decode)?,
        phone: row.try_get("phone").map_err(decode)?,
        status,
        is_deleted: row.try_get("is_deleted").map_err(decode)?,
        avatar,
        role_id: RoleId::new(row.try_get("role_id").map_err(decode)?),
        skills: skills.into_iter().collect(),
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
        deleted_at: row.try_get("deleted_at").map_err(decode)?,
    })
}

fn unique_field(constraint: Option<&str>) -> Option<UniqueField> {
    match constraint? {
        "users_username_key" => Some(UniqueField::Username),
        "users_email_key" => Some(UniqueField::Email),
        "roles_name_key" => Some(UniqueField::RoleName),
        _ => None,
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => match unique_field(db_err.constraint()) {
                    Some(field) => StoreError::UniqueViolation(field),
                    None => StoreError::Backend(msg),
                },
                Some("23503") => StoreError::ForeignKeyViolation(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern("john"), "%john%");
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }

    #[test]
    fn order_by_always_breaks_ties_on_id() {
        assert_eq!(order_by("u.", "id", SortDirection::Desc), "ORDER BY u.id DESC");
        assert_eq!(
            order_by("u.", "name", SortDirection::Desc),
            "ORDER BY u.name DESC, u.id ASC"
        );
    }

    #[test]
    fn constraint_names_map_to_fields() {
        assert_eq!(unique_field(Some("users_email_key")), Some(UniqueField::Email));
        assert_eq!(unique_field(Some("roles_name_key")), Some(UniqueField::RoleName));
        assert_eq!(unique_field(Some("something_else")), None);
        assert_eq!(unique_field(None), None);
    }
}
