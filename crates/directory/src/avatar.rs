//! Asset references and storage-key derivation for avatars.

use serde::{Deserialize, Serialize};

use userdir_core::{DomainError, DomainResult};

/// Location of an externally stored avatar: the key in the file store plus the
/// URL clients fetch it from. A user has both or neither.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetReference {
    pub storage_key: String,
    pub public_url: String,
}

impl AssetReference {
    /// Reference served by the file routes under `base_url`.
    pub fn served_from(base_url: &str, storage_key: impl Into<String>) -> Self {
        let storage_key = storage_key.into();
        let public_url = format!("{}/api/files/{}", base_url.trim_end_matches('/'), storage_key);
        Self {
            storage_key,
            public_url,
        }
    }
}

/// Derive the storage key for an upload: `{storage_path}/{sanitized name}`.
///
/// Deterministic, so a second upload with the same name collides instead of
/// overwriting.
pub fn storage_key(storage_path: &str, original_name: &str) -> DomainResult<String> {
    let mut segments = Vec::new();
    for segment in storage_path.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." {
            return Err(DomainError::validation("storage path must not traverse directories"));
        }
        segments.push(sanitize(segment, "assets"));
    }
    // Browsers may send a full client-side path.
    let base_name = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name);
    segments.push(sanitize(base_name, "avatar"));
    Ok(segments.join("/"))
}

fn sanitize(raw: &str, fallback: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        fallback.to_owned()
    } else {
        cleaned.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn derives_predictable_keys() {
        assert_eq!(storage_key("avatars", "me.png").unwrap(), "avatars/me.png");
        assert_eq!(storage_key("avatars/", "C:\\pics\\my face.jpg").unwrap(), "avatars/my_face.jpg");
        assert_eq!(storage_key("avatars", "").unwrap(), "avatars/avatar");
        assert_eq!(storage_key("avatars", "../../etc/passwd").unwrap(), "avatars/passwd");
        assert_eq!(storage_key("avatars", "...").unwrap(), "avatars/avatar");
        assert!(storage_key("../avatars", "me.png").is_err());
    }

    #[test]
    fn public_url_joins_base() {
        let r = AssetReference::served_from("http://localhost:8080/", "avatars/me.png");
        assert_eq!(r.public_url, "http://localhost:8080/api/files/avatars/me.png");
    }

    proptest! {
        #[test]
        fn keys_never_escape_the_storage_path(name in ".*") {
            let key = storage_key("avatars", &name).unwrap();
            prop_assert!(key.starts_with("avatars/"));
            let file = &key["avatars/".len()..];
            prop_assert!(!file.is_empty());
            prop_assert!(!file.contains('/'));
            prop_assert!(!file.starts_with('.'));
        }
    }
}
