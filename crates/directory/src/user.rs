use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use userdir_core::{DomainError, DomainResult, RoleId, UserId};

use crate::validate::{bounded, email, phone, username};
use crate::AssetReference;

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

/// Account status. `Active` on creation; `activate`/`deactivate` move between
/// the two states and are idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserStatus {
    Active,
    Inactive,
}

impl UserStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            UserStatus::Active => "ACTIVE",
            UserStatus::Inactive => "INACTIVE",
        }
    }
}

impl core::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for UserStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(UserStatus::Active),
            "INACTIVE" => Ok(UserStatus::Inactive),
            other => Err(DomainError::corrupt(format!("unknown user status '{other}'"))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Record
// ─────────────────────────────────────────────────────────────────────────────

/// Persisted user. The password hash never leaves the service boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub phone: Option<String>,
    pub status: UserStatus,
    pub is_deleted: bool,
    pub avatar: Option<AssetReference>,
    pub role_id: RoleId,
    pub skills: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Soft delete. Repeating it changes nothing, not even `deleted_at`.
    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        if self.status == UserStatus::Inactive {
            return;
        }
        self.status = UserStatus::Inactive;
        self.is_deleted = true;
        self.deleted_at = Some(now);
        self.updated_at = now;
    }

    pub fn activate(&mut self, now: DateTime<Utc>) {
        if self.status == UserStatus::Active {
            return;
        }
        self.status = UserStatus::Active;
        self.is_deleted = false;
        self.deleted_at = None;
        self.updated_at = now;
    }

    /// Overwrite the mutable profile fields.
    pub fn apply_profile(&mut self, profile: ProfileDraft, now: DateTime<Utc>) {
        self.name = profile.name;
        self.username = profile.username;
        self.email = profile.email;
        self.phone = profile.phone;
        if let Some(skills) = profile.skills {
            self.skills = skills;
        }
        self.updated_at = now;
    }

    /// Case-insensitive substring match on username, email or name.
    /// `keyword` must already be lower-cased.
    pub fn matches_keyword(&self, keyword: &str) -> bool {
        self.username.to_lowercase().contains(keyword)
            || self.email.contains(keyword)
            || self.name.to_lowercase().contains(keyword)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Drafts
// ─────────────────────────────────────────────────────────────────────────────

/// Validated profile fields for create and update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileDraft {
    pub name: String,
    pub username: String,
    pub email: String,
    pub phone: Option<String>,
    /// `None` on update leaves the existing skills untouched.
    pub skills: Option<BTreeSet<String>>,
}

impl ProfileDraft {
    pub fn new(
        name: &str,
        username_raw: &str,
        email_raw: &str,
        phone_raw: Option<&str>,
        skills: Option<Vec<String>>,
    ) -> DomainResult<Self> {
        Ok(Self {
            name: bounded("name", name, 2, 100)?,
            username: username(username_raw)?,
            email: email(email_raw)?,
            phone: phone(phone_raw)?,
            skills: skills.map(|labels| {
                labels
                    .iter()
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            }),
        })
    }
}

/// Everything storage needs to insert a user; the id is assigned on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub phone: Option<String>,
    pub avatar: Option<AssetReference>,
    pub role_id: RoleId,
    pub skills: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl NewUser {
    pub fn new(
        profile: ProfileDraft,
        password_hash: String,
        role_id: RoleId,
        avatar: Option<AssetReference>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name: profile.name,
            username: profile.username,
            email: profile.email,
            password_hash,
            phone: profile.phone,
            avatar,
            role_id,
            skills: profile.skills.unwrap_or_default(),
            created_at: now,
        }
    }

    /// Materialise the stored record once storage has assigned an id.
    pub fn into_user(self, id: UserId) -> User {
        User {
            id,
            name: self.name,
            username: self.username,
            email: self.email,
            password_hash: self.password_hash,
            phone: self.phone,
            status: UserStatus::Active,
            is_deleted: false,
            avatar: self.avatar,
            role_id: self.role_id,
            skills: self.skills,
            created_at: self.created_at,
            updated_at: self.created_at,
            deleted_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn john() -> User {
        let profile = ProfileDraft::new(
            "John Doe",
            "johndoe",
            "John.Doe@Example.com",
            Some("1234567890"),
            Some(vec!["rust".into(), " ".into(), "sql".into()]),
        )
        .unwrap();
        NewUser::new(profile, "$argon2id$stub".into(), RoleId::new(2), None, t0())
            .into_user(UserId::new(1))
    }

    #[test]
    fn new_users_start_active() {
        let user = john();
        assert_eq!(user.status, UserStatus::Active);
        assert!(!user.is_deleted);
        assert_eq!(user.email, "john.doe@example.com");
        assert_eq!(user.skills.len(), 2);
    }

    #[test]
    fn deactivate_is_idempotent() {
        let mut user = john();
        user.deactivate(t0() + Duration::hours(1));
        let first = user.clone();

        user.deactivate(t0() + Duration::hours(2));
        assert_eq!(user, first);
        assert_eq!(user.status, UserStatus::Inactive);
        assert!(user.is_deleted);
        assert_eq!(user.deleted_at, Some(t0() + Duration::hours(1)));
    }

    #[test]
    fn activate_clears_soft_delete() {
        let mut user = john();
        user.activate(t0() + Duration::hours(1));
        assert_eq!(user.updated_at, t0());

        user.deactivate(t0() + Duration::hours(1));
        user.activate(t0() + Duration::hours(2));
        assert!(user.is_active());
        assert!(!user.is_deleted);
        assert_eq!(user.deleted_at, None);
    }

    #[test]
    fn keyword_matches_any_of_three_fields() {
        let user = john();
        assert!(user.matches_keyword("john"));
        assert!(user.matches_keyword("example.com"));
        assert!(user.matches_keyword("n d"));
        assert!(!user.matches_keyword("jane"));
    }

    #[test]
    fn status_serializes_upper_case() {
        assert_eq!(serde_json::to_value(UserStatus::Inactive).unwrap(), "INACTIVE");
        assert_eq!("ACTIVE".parse::<UserStatus>().unwrap(), UserStatus::Active);
    }

    #[test]
    fn update_without_skills_keeps_existing() {
        let mut user = john();
        let profile = ProfileDraft::new("Johnny", "johnny", "j@example.com", None, None).unwrap();
        user.apply_profile(profile, t0() + Duration::minutes(1));
        assert_eq!(user.username, "johnny");
        assert_eq!(user.phone, None);
        assert_eq!(user.skills.len(), 2);
    }
}
