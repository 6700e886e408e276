//! Pointer database: an opaque ordered map from path to pointer.

use async_trait::async_trait;
use orbit_types::Pointer;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("pointer db backend error: {0}")]
    Backend(String),
}

/// Ordered key-value storage for pointers. Single writer per path is assumed.
#[async_trait]
pub trait PointerDb: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Pointer>, DbError>;

    async fn put(&self, path: &str, pointer: Pointer) -> Result<(), DbError>;

    /// Remove and return the pointer at `path`.
    async fn delete(&self, path: &str) -> Result<Option<Pointer>, DbError>;

    /// Keys with the given prefix, strictly after `after`, ascending.
    async fn range(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, Pointer)>, DbError>;
}

/// BTreeMap-backed pointer database.
#[derive(Default)]
pub struct MemoryPointerDb {
    entries: RwLock<BTreeMap<String, Pointer>>,
}

impl MemoryPointerDb {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PointerDb for MemoryPointerDb {
    async fn get(&self, path: &str) -> Result<Option<Pointer>, DbError> {
        Ok(self
            .entries
            .read()
            .expect("pointer db lock poisoned")
            .get(path)
            .cloned())
    }

    async fn put(&self, path: &str, pointer: Pointer) -> Result<(), DbError> {
        self.entries
            .write()
            .expect("pointer db lock poisoned")
            .insert(path.to_string(), pointer);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<Option<Pointer>, DbError> {
        Ok(self
            .entries
            .write()
            .expect("pointer db lock poisoned")
            .remove(path))
    }

    async fn range(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, Pointer)>, DbError> {
        let entries = self.entries.read().expect("pointer db lock poisoned");
        let start: Bound<String> = match after {
            Some(after) => Bound::Excluded(after.to_string()),
            None => Bound::Included(prefix.to_string()),
        };
        let items = entries
            .range((start, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(limit)
            .map(|(key, pointer)| (key.clone(), pointer.clone()))
            .collect();
        Ok(items)
    }
}
