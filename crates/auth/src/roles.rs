use serde::{Deserialize, Serialize};

/// Roles that carry authorization meaning.
///
/// The Role Registry may hold additional role records, but only these names
/// are recognised by the authorization guard. `Admin` satisfies every role
/// requirement; any other role satisfies only itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Moderator,
    User,
    Guest,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::User, Role::Moderator, Role::Guest];

    /// Canonical (stored) role name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Moderator => "MODERATOR",
            Role::User => "USER",
            Role::Guest => "GUEST",
        }
    }

    /// Description used when seeding the registry.
    pub const fn description(self) -> &'static str {
        match self {
            Role::Admin => "Administrator with full access",
            Role::Moderator => "Moderator with limited admin access",
            Role::User => "Regular user",
            Role::Guest => "Guest user with limited access",
        }
    }

    /// Look up a role by its exact stored name. Role names are unique
    /// case-sensitively, so a separate record named `admin` is not ADMIN.
    pub fn from_name(name: &str) -> Option<Role> {
        Role::ALL.into_iter().find(|r| r.as_str() == name)
    }

    pub fn satisfies(self, required: Role) -> bool {
        self == Role::Admin || self == required
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
