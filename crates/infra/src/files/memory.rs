use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use super::{check_key, FileStore, FileStoreError};

/// In-memory file store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryFileStore {
    inner: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn exists(&self, key: &str) -> Result<bool, FileStoreError> {
        check_key(key)?;
        Ok(self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key))
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), FileStoreError> {
        check_key(key)?;
        match self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_owned())
        {
            Entry::Occupied(_) => Err(FileStoreError::AlreadyExists(key.to_owned())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::from(bytes));
                Ok(())
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), FileStoreError> {
        check_key(key)?;
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| FileStoreError::NotFound(key.to_owned()))
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, FileStoreError> {
        check_key(key)?;
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|b| b.to_vec())
            .ok_or_else(|| FileStoreError::NotFound(key.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_writer_of_a_key_is_refused() {
        let store = InMemoryFileStore::new();
        store.write("avatars/me.png", b"first").await.unwrap();

        assert_eq!(
            store.write("avatars/me.png", b"second").await,
            Err(FileStoreError::AlreadyExists("avatars/me.png".into()))
        );
        assert_eq!(store.read("avatars/me.png").await.unwrap(), b"first");
    }
}
