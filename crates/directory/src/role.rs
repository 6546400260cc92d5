use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use userdir_core::{DomainError, DomainResult, RoleId};

use crate::validate::bounded;

pub const ROLE_DESCRIPTION_MAX_LEN: usize = 255;

/// Persisted role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub id: RoleId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated role input for create and update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDraft {
    pub name: String,
    pub description: Option<String>,
}

impl RoleDraft {
    pub fn new(name: &str, description: Option<&str>) -> DomainResult<Self> {
        let name = bounded("role name", name, 2, 50)?;
        let description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_owned);
        if description
            .as_deref()
            .is_some_and(|d| d.chars().count() > ROLE_DESCRIPTION_MAX_LEN)
        {
            return Err(DomainError::validation(format!(
                "role description must be at most {ROLE_DESCRIPTION_MAX_LEN} characters"
            )));
        }
        Ok(Self { name, description })
    }
}

impl RoleRecord {
    pub fn apply(&mut self, draft: RoleDraft, now: DateTime<Utc>) {
        self.name = draft.name;
        self.description = draft.description;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_bounds() {
        assert!(RoleDraft::new("A", None).is_err());
        assert!(RoleDraft::new(&"X".repeat(51), None).is_err());
        assert!(RoleDraft::new("EDITOR", Some(&"d".repeat(256))).is_err());

        let draft = RoleDraft::new("  EDITOR ", Some("  ")).unwrap();
        assert_eq!(draft.name, "EDITOR");
        assert_eq!(draft.description, None);
    }
}
