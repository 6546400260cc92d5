//! `userdir-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod clock;
pub mod error;
pub mod id;
pub mod page;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{RoleId, UserId};
pub use page::{Page, PageRequest, SortDirection};
