//! API-side authorization guard.
//!
//! Every handler calls [`require`] first, before loading anything, so the
//! outcome never depends on whether the target resource exists.

use userdir_auth::{authorize, authorize_operation, AuthzError, Operation, Requirement, Role};
use userdir_core::UserId;

use crate::context::IdentityContext;

/// Check `operation` for the caller. `owner` is the user id named by the
/// request, for self-service operations.
pub fn require(caller: Option<&IdentityContext>, operation: Operation, owner: Option<UserId>) -> Result<(), AuthzError> {
    authorize_operation(caller.map(IdentityContext::identity), operation, owner)
}

/// Reassigning roles is an administrator action even on one's own account.
pub fn require_role_change(caller: &IdentityContext) -> Result<(), AuthzError> {
    authorize(Some(caller.identity()), Requirement::Role(Role::Admin), None)
}
