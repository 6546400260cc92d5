//! Field-level validation shared by user and role drafts.

use userdir_core::{DomainError, DomainResult};

pub const PASSWORD_MIN_LEN: usize = 6;
pub const PASSWORD_MAX_LEN: usize = 128;

/// Trim and check a text field's character length.
pub(crate) fn bounded(field: &str, value: &str, min: usize, max: usize) -> DomainResult<String> {
    let value = value.trim();
    let len = value.chars().count();
    if len < min || len > max {
        return Err(DomainError::validation(format!(
            "{field} must be between {min} and {max} characters"
        )));
    }
    Ok(value.to_owned())
}

pub(crate) fn username(value: &str) -> DomainResult<String> {
    let value = bounded("username", value, 3, 50)?;
    if value.chars().any(char::is_whitespace) {
        return Err(DomainError::validation("username must not contain whitespace"));
    }
    Ok(value)
}

/// Email shape check; the stored form is lower-cased.
pub(crate) fn email(value: &str) -> DomainResult<String> {
    let value = value.trim().to_lowercase();
    let invalid = || DomainError::validation("email must be a valid address");

    if value.len() > 254 || value.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = value.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return Err(invalid());
    }
    Ok(value)
}

pub(crate) fn phone(value: Option<&str>) -> DomainResult<Option<String>> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let digits = value.strip_prefix('+').unwrap_or(value);
    let len = digits.chars().count();
    if !(10..=15).contains(&len) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(DomainError::validation("phone must be 10 to 15 digits"));
    }
    Ok(Some(value.to_owned()))
}

pub fn validate_password(plaintext: &str) -> DomainResult<()> {
    let len = plaintext.chars().count();
    if len < PASSWORD_MIN_LEN {
        return Err(DomainError::validation(format!(
            "password must be at least {PASSWORD_MIN_LEN} characters"
        )));
    }
    if len > PASSWORD_MAX_LEN {
        return Err(DomainError::validation(format!(
            "password must be at most {PASSWORD_MAX_LEN} characters"
        )));
    }
    Ok(())
}

/// Search keyword: `None` (match everything) when absent or blank.
pub fn normalize_keyword(keyword: Option<&str>) -> Option<String> {
    keyword
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_lowercase)
}
