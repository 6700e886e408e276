//! Pointer CRUD and listing over the pointer database.

use crate::db::{DbError, PointerDb};
use crate::{MetainfoError, Result};
use orbit_types::{ListItem, MetaFlags, Pointer};
use std::sync::Arc;

impl From<DbError> for MetainfoError {
    fn from(err: DbError) -> Self {
        MetainfoError::Internal(err.to_string())
    }
}

/// Validated pointer access shared by the endpoint and the repairer.
pub struct Service {
    db: Arc<dyn PointerDb>,
}

impl Service {
    pub fn new(db: Arc<dyn PointerDb>) -> Self {
        Self { db }
    }

    pub async fn get(&self, path: &str) -> Result<Pointer> {
        self.db
            .get(path)
            .await?
            .ok_or_else(|| MetainfoError::NotFound(format!("key not found: {}", path)))
    }

    pub async fn put(&self, path: &str, pointer: Pointer) -> Result<()> {
        self.db.put(path, pointer).await?;
        Ok(())
    }

    pub async fn delete(&self, path: &str) -> Result<Pointer> {
        self.db
            .delete(path)
            .await?
            .ok_or_else(|| MetainfoError::NotFound(format!("key not found: {}", path)))
    }

    /// List entries under `prefix`.
    ///
    /// Returned paths are relative to the prefix. With `recursive` off,
    /// deeper entries collapse into `is_prefix` records ending in `/`.
    pub async fn list(
        &self,
        prefix: &str,
        start_after: &str,
        end_before: &str,
        recursive: bool,
        limit: usize,
        meta_flags: MetaFlags,
    ) -> Result<(Vec<ListItem>, bool)> {
        let full_prefix = if prefix.is_empty() || prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{}/", prefix)
        };

        let entries = self.db.range(&full_prefix, None, usize::MAX).await?;

        let mut items: Vec<ListItem> = Vec::new();
        let mut more = false;
        for (key, pointer) in entries {
            let relative = &key[full_prefix.len()..];
            let (path, is_prefix) = if recursive {
                (relative.to_string(), false)
            } else {
                match relative.find('/') {
                    Some(index) => (relative[..index + 1].to_string(), true),
                    None => (relative.to_string(), false),
                }
            };

            if !start_after.is_empty() && path.as_str() <= start_after {
                continue;
            }
            if !end_before.is_empty() && path.as_str() >= end_before {
                break;
            }
            // collapsed prefixes arrive in runs; keep the first of each
            if is_prefix && items.last().map(|item| item.path == path).unwrap_or(false) {
                continue;
            }

            if items.len() == limit {
                more = true;
                break;
            }
            let pointer = if is_prefix || meta_flags == MetaFlags::NONE {
                None
            } else {
                Some(pointer)
            };
            items.push(ListItem {
                path,
                pointer,
                is_prefix,
            });
        }

        Ok((items, more))
    }
}
