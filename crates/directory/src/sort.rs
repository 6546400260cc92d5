//! Sortable fields for paged listings.
//!
//! Ordering is always total: ties on the chosen field fall back to id
//! ascending, whatever the requested direction.

use core::cmp::Ordering;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use userdir_core::{DomainError, SortDirection};

use crate::{RoleRecord, User};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserSortField {
    #[default]
    Id,
    Name,
    Username,
    Email,
    CreatedAt,
    UpdatedAt,
}

impl UserSortField {
    pub fn column(self) -> &'static str {
        match self {
            UserSortField::Id => "id",
            UserSortField::Name => "name",
            UserSortField::Username => "username",
            UserSortField::Email => "email",
            UserSortField::CreatedAt => "created_at",
            UserSortField::UpdatedAt => "updated_at",
        }
    }

    pub fn compare(self, a: &User, b: &User, direction: SortDirection) -> Ordering {
        let primary = match self {
            UserSortField::Id => return direction.apply(a.id.cmp(&b.id)),
            UserSortField::Name => a.name.cmp(&b.name),
            UserSortField::Username => a.username.cmp(&b.username),
            UserSortField::Email => a.email.cmp(&b.email),
            UserSortField::CreatedAt => a.created_at.cmp(&b.created_at),
            UserSortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        };
        direction.apply(primary).then_with(|| a.id.cmp(&b.id))
    }
}

impl FromStr for UserSortField {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(UserSortField::Id),
            "name" => Ok(UserSortField::Name),
            "username" => Ok(UserSortField::Username),
            "email" => Ok(UserSortField::Email),
            "createdAt" | "created_at" => Ok(UserSortField::CreatedAt),
            "updatedAt" | "updated_at" => Ok(UserSortField::UpdatedAt),
            other => Err(DomainError::validation(format!("cannot sort users by '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSortField {
    #[default]
    Id,
    Name,
    CreatedAt,
}

impl RoleSortField {
    pub fn column(self) -> &'static str {
        match self {
            RoleSortField::Id => "id",
            RoleSortField::Name => "name",
            RoleSortField::CreatedAt => "created_at",
        }
    }

    pub fn compare(self, a: &RoleRecord, b: &RoleRecord, direction: SortDirection) -> Ordering {
        match self {
            RoleSortField::Id => direction.apply(a.id.cmp(&b.id)),
            RoleSortField::Name => direction.apply(a.name.cmp(&b.name)).then_with(|| a.id.cmp(&b.id)),
            RoleSortField::CreatedAt => direction
                .apply(a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id)),
        }
    }
}

impl FromStr for RoleSortField {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(RoleSortField::Id),
            "name" => Ok(RoleSortField::Name),
            "createdAt" | "created_at" => Ok(RoleSortField::CreatedAt),
            other => Err(DomainError::validation(format!("cannot sort roles by '{other}'"))),
        }
    }
}
