use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use userdir_core::UserId;

use crate::Identity;

/// Signed token claims.
///
/// Timestamps travel as unix seconds (`iat`/`exp`), so sub-second precision is
/// dropped at issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the username.
    pub sub: String,

    /// Surrogate user id, so ownership checks need no lookup.
    pub uid: UserId,

    /// Role name at issuance.
    pub role: String,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub iat: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub exp: DateTime<Utc>,
}

impl TokenClaims {
    pub fn into_identity(self) -> Identity {
        Identity::new(self.uid, self.sub, self.role)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimsError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (iat is in the future)")]
    NotYetValid,

    #[error("invalid token time window (exp <= iat)")]
    InvalidTimeWindow,
}

/// Deterministically validate the time window of decoded claims.
///
/// Signature verification happens before this, in [`crate::TokenService`].
pub fn validate_claims(claims: &TokenClaims, now: DateTime<Utc>) -> Result<(), ClaimsError> {
    if claims.exp <= claims.iat {
        return Err(ClaimsError::InvalidTimeWindow);
    }
    if now < claims.iat {
        return Err(ClaimsError::NotYetValid);
    }
    if now >= claims.exp {
        return Err(ClaimsError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn claims(iat: DateTime<Utc>, exp: DateTime<Utc>) -> TokenClaims {
        TokenClaims {
            sub: "johndoe".into(),
            uid: UserId::new(1),
            role: "USER".into(),
            iat,
            exp,
        }
    }

    #[test]
    fn window_boundaries() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let c = claims(t0, t0 + Duration::days(30));

        assert_eq!(validate_claims(&c, t0), Ok(()));
        assert_eq!(validate_claims(&c, t0 + Duration::days(30) - Duration::seconds(1)), Ok(()));
        assert_eq!(validate_claims(&c, t0 + Duration::days(30)), Err(ClaimsError::Expired));
        assert_eq!(validate_claims(&c, t0 - Duration::seconds(1)), Err(ClaimsError::NotYetValid));
        assert_eq!(validate_claims(&claims(t0, t0), t0), Err(ClaimsError::InvalidTimeWindow));
    }

    #[test]
    fn timestamps_serialize_as_unix_seconds() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let json = serde_json::to_value(claims(t0, t0 + Duration::seconds(60))).unwrap();
        assert_eq!(json["iat"], t0.timestamp());
        assert_eq!(json["exp"], t0.timestamp() + 60);
        assert_eq!(json["uid"], 1);
    }
}
