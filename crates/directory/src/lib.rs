//! `userdir-directory`: User and Role records, their validation rules and the
//! account state machine.
//!
//! Pure domain: no IO, no storage, no clock (timestamps are passed in).

pub mod avatar;
pub mod role;
pub mod sort;
pub mod user;
pub mod validate;

pub use avatar::{storage_key, AssetReference};
pub use role::{RoleDraft, RoleRecord};
pub use sort::{RoleSortField, UserSortField};
pub use user::{NewUser, ProfileDraft, User, UserStatus};
pub use validate::{normalize_keyword, validate_password};
