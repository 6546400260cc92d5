//! Infrastructure layer: persistence and file collaborators, background asset
//! jobs, and the directory services built on top of them.

pub mod avatar;
pub mod config;
pub mod credentials;
pub mod error;
pub mod files;
pub mod jobs;
pub mod roles;
pub mod store;
pub mod users;

pub use avatar::AvatarManager;
pub use config::{AppConfig, BootstrapAdmin};
pub use credentials::DirectoryCredentials;
pub use error::{DirectoryError, DirectoryResult};
pub use roles::RoleRegistry;
pub use users::{AvatarUpload, CreateUser, UpdateUser, UserDirectory};

#[cfg(test)]
mod integration_tests;
