use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::id::ResourceID;

use super::{ETag, PageToken, ResourceStore, StoreError, StoredObject};

/// In-process `ResourceStore`. Used for single-node dev/test, and as the
/// default `storage.provider: memory` backend (see `SPEC_FULL.md` §5.2).
pub struct MemoryStore {
    items: DashMap<String, StoredObject>,
    revision: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore {
            items: DashMap::new(),
            revision: AtomicU64::new(0),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, id: &ResourceID) -> Result<Option<StoredObject>, StoreError> {
        Ok(self.items.get(&id.normalize()).map(|e| e.value().clone()))
    }

    async fn list(
        &self,
        scope: &ResourceID,
        page: PageToken,
        limit: usize,
    ) -> Result<(Vec<StoredObject>, Option<PageToken>), StoreError> {
        let prefix = scope.normalize();
        let mut keys: Vec<String> = self
            .items
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(&prefix))
            .collect();
        keys.sort();

        let start = match &page.0 {
            Some(cursor) => keys.partition_point(|k| k <= cursor),
            None => 0,
        };
        let page_keys = &keys[start..];
        let take = page_keys.len().min(limit);
        let items: Vec<StoredObject> = page_keys[..take]
            .iter()
            .filter_map(|k| self.items.get(k).map(|e| e.value().clone()))
            .collect();

        let next = if take < page_keys.len() {
            items.last().map(|o| PageToken(Some(o.id.normalize())))
        } else {
            None
        };
        Ok((items, next))
    }

    async fn save(
        &self,
        id: &ResourceID,
        data: serde_json::Value,
        expected_etag: Option<&ETag>,
    ) -> Result<ETag, StoreError> {
        let key = id.normalize();
        if let Some(expected) = expected_etag {
            match self.items.get(&key) {
                Some(existing) if existing.etag != *expected => {
                    return Err(StoreError::PreconditionFailed {
                        expected: expected.to_string(),
                        actual: existing.etag.to_string(),
                    });
                }
                None if expected.as_str() != "*" => {
                    return Err(StoreError::PreconditionFailed {
                        expected: expected.to_string(),
                        actual: "<missing>".to_owned(),
                    });
                }
                _ => {}
            }
        }
        let revision = self.revision.fetch_add(1, Ordering::SeqCst);
        let bytes = serde_json::to_vec(&data).map_err(|e| StoreError::Backend(e.to_string()))?;
        let etag = ETag::new(revision, &bytes);
        self.items.insert(
            key,
            StoredObject {
                id: id.clone(),
                etag: etag.clone(),
                data,
            },
        );
        Ok(etag)
    }

    async fn delete(&self, id: &ResourceID, expected_etag: Option<&ETag>) -> Result<(), StoreError> {
        let key = id.normalize();
        if let Some(expected) = expected_etag {
            match self.items.get(&key) {
                Some(existing) if existing.etag != *expected => {
                    return Err(StoreError::PreconditionFailed {
                        expected: expected.to_string(),
                        actual: existing.etag.to_string(),
                    });
                }
                None => return Err(StoreError::NotFound(id.to_string())),
                _ => {}
            }
        }
        self.items
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}
