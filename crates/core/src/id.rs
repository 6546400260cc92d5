//! Strongly-typed identifiers used across the domain.
//!
//! Records use storage-assigned surrogate keys, so identifiers wrap `i64`
//! rather than generating values themselves.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a user account.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

/// Identifier of a role.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(i64);

macro_rules! impl_surrogate_id {
    ($t:ty, $name:literal) => {
        impl $t {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = i64::from_str(s.trim())
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                if value <= 0 {
                    return Err(DomainError::invalid_id(format!("{}: must be positive", $name)));
                }
                Ok(Self(value))
            }
        }
    };
}

impl_surrogate_id!(UserId, "UserId");
impl_surrogate_id!(RoleId, "RoleId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positive_ids() {
        assert_eq!("42".parse::<UserId>().unwrap(), UserId::new(42));
        assert_eq!(" 7 ".parse::<RoleId>().unwrap().get(), 7);
    }

    #[test]
    fn rejects_non_positive_and_garbage() {
        assert!(matches!("0".parse::<UserId>(), Err(DomainError::InvalidId(_))));
        assert!(matches!("-3".parse::<UserId>(), Err(DomainError::InvalidId(_))));
        assert!(matches!("abc".parse::<RoleId>(), Err(DomainError::InvalidId(_))));
    }
}
