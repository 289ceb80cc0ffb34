pub mod etcd;
pub mod memory;

use async_trait::async_trait;
use std::fmt;

use crate::id::ResourceID;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("precondition failed: expected etag {expected}, stored etag is {actual}")]
    PreconditionFailed { expected: String, actual: String },

    #[error("backend error: {0}")]
    Backend(String),
}

/// Opaque, monotonically-changing concurrency token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ETag(String);

impl ETag {
    pub fn new(revision: u64, content: &[u8]) -> Self {
        // Cheap content-derived tag: revision counter disambiguates
        // same-content writes, a short content hash catches divergence
        // across stores that don't share a revision counter (e.g. memory
        // vs etcd in mixed tests).
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        content.hash(&mut hasher);
        ETag(format!("{revision}-{:x}", hasher.finish()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ETag {
    fn from(value: String) -> Self {
        ETag(value)
    }
}

/// Opaque continuation cursor for `list`. Backed here by the normalized id
/// of the last item returned, giving a stable lexicographic order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageToken(pub Option<String>);

impl Default for PageToken {
    fn default() -> Self {
        PageToken(None)
    }
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub id: ResourceID,
    pub etag: ETag,
    pub data: serde_json::Value,
}

/// Generic key-value store underlying tracked resources, operation status
/// records, and plane/resource-group registrations alike.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, id: &ResourceID) -> Result<Option<StoredObject>, StoreError>;

    async fn list(
        &self,
        scope: &ResourceID,
        page: PageToken,
        limit: usize,
    ) -> Result<(Vec<StoredObject>, Option<PageToken>), StoreError>;

    /// Creates or replaces. When `expected_etag` is `Some`, the write is
    /// rejected with `PreconditionFailed` unless the stored etag matches
    /// (or the object doesn't exist and the caller is attempting a create,
    /// recognized by the sentinel etag `"*"`, matching ARM's `If-Match: *`
    /// for create-must-not-exist semantics being handled by callers).
    async fn save(
        &self,
        id: &ResourceID,
        data: serde_json::Value,
        expected_etag: Option<&ETag>,
    ) -> Result<ETag, StoreError>;

    async fn delete(&self, id: &ResourceID, expected_etag: Option<&ETag>) -> Result<(), StoreError>;
}
