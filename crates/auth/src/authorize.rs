//! Authorization Guard.
//!
//! Every inbound operation declares its requirement in [`Operation::requirement`];
//! the match is exhaustive, so adding an operation without deciding who may
//! call it does not compile.

use serde::Serialize;
use thiserror::Error;

use userdir_core::UserId;

use crate::{Identity, Role};

/// Who may perform an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "role")]
pub enum Requirement {
    /// No identity needed.
    Public,
    /// Any valid identity.
    Authenticated,
    /// Identity whose role satisfies the given role.
    Role(Role),
    /// The resource owner, or an identity whose role satisfies the given role.
    OwnerOr(Role),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("insufficient role: requires {required}")]
    InsufficientRole { required: Role },

    #[error("not the owner of this resource")]
    NotOwner,
}

/// Inbound operations of the directory service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Login,
    Register,
    Logout,
    CreateUser,
    GetUser,
    GetUserAvatar,
    ListUsers,
    SearchUsers,
    UpdateUser,
    ActivateUser,
    DeactivateUser,
    CreateRole,
    ReadRoles,
    UpdateRole,
    DeleteRole,
    UploadFile,
    FetchFile,
}

impl Operation {
    pub const fn requirement(self) -> Requirement {
        match self {
            Operation::Login | Operation::Register | Operation::FetchFile => Requirement::Public,
            Operation::Logout
            | Operation::ReadRoles
            | Operation::UploadFile
            | Operation::GetUserAvatar => Requirement::Authenticated,
            Operation::GetUser | Operation::UpdateUser => Requirement::OwnerOr(Role::Admin),
            Operation::CreateUser
            | Operation::ListUsers
            | Operation::SearchUsers
            | Operation::ActivateUser
            | Operation::DeactivateUser
            | Operation::CreateRole
            | Operation::UpdateRole
            | Operation::DeleteRole => Requirement::Role(Role::Admin),
        }
    }
}

/// Check an identity against a requirement.
///
/// - No IO
/// - No panics
/// - Runs before any resource lookup: `owner` is the owner id named by the
///   request, not one loaded from storage
pub fn authorize(
    identity: Option<&Identity>,
    requirement: Requirement,
    owner: Option<UserId>,
) -> Result<(), AuthzError> {
    if requirement == Requirement::Public {
        return Ok(());
    }

    let identity = identity.ok_or(AuthzError::Unauthenticated)?;
    let has_role = |required: Role| {
        identity
            .known_role()
            .is_some_and(|role| role.satisfies(required))
    };

    match requirement {
        Requirement::Public | Requirement::Authenticated => Ok(()),
        Requirement::Role(required) if has_role(required) => Ok(()),
        Requirement::Role(required) => Err(AuthzError::InsufficientRole { required }),
        Requirement::OwnerOr(required) if has_role(required) => Ok(()),
        Requirement::OwnerOr(_) if owner == Some(identity.user_id) => Ok(()),
        Requirement::OwnerOr(_) => Err(AuthzError::NotOwner),
    }
}

pub fn authorize_operation(
    identity: Option<&Identity>,
    operation: Operation,
    owner: Option<UserId>,
) -> Result<(), AuthzError> {
    authorize(identity, operation.requirement(), owner)
}
