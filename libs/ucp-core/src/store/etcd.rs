use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, GetOptions, Txn, TxnOp};

use crate::id::ResourceID;

use super::{ETag, PageToken, ResourceStore, StoreError, StoredObject};

/// `ResourceStore` backed by a real etcd cluster, the corpus's closest
/// grounding for the spec's `databaseProvider: etcd` config option (see
/// `DESIGN.md` Open Question decisions — no raft/consensus crate appears
/// anywhere in the reference examples, so this talks etcd's own wire
/// protocol rather than embedding a raft node).
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    pub async fn connect(endpoints: &[String]) -> Result<Self, StoreError> {
        let client = Client::connect(endpoints, None)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(EtcdStore { client })
    }

    fn key_for(id: &ResourceID) -> String {
        id.normalize()
    }
}

#[async_trait]
impl ResourceStore for EtcdStore {
    async fn get(&self, id: &ResourceID) -> Result<Option<StoredObject>, StoreError> {
        let mut client = self.client.clone();
        let resp = client
            .get(Self::key_for(id), None)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let Some(kv) = resp.kvs().first() else {
            return Ok(None);
        };
        let data: serde_json::Value =
            serde_json::from_slice(kv.value()).map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Some(StoredObject {
            id: id.clone(),
            etag: ETag::new(kv.mod_revision() as u64, kv.value()),
            data,
        }))
    }

    async fn list(
        &self,
        scope: &ResourceID,
        page: PageToken,
        limit: usize,
    ) -> Result<(Vec<StoredObject>, Option<PageToken>), StoreError> {
        let mut client = self.client.clone();
        let prefix = scope.normalize();
        let resp = client
            .get(prefix.clone(), Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut kvs: Vec<_> = resp.kvs().to_vec();
        kvs.sort_by(|a, b| a.key().cmp(b.key()));

        let start = match &page.0 {
            Some(cursor) => kvs.partition_point(|kv| {
                String::from_utf8_lossy(kv.key()).as_ref() <= cursor.as_str()
            }),
            None => 0,
        };
        let page_kvs = &kvs[start..];
        let take = page_kvs.len().min(limit);

        let mut items = Vec::with_capacity(take);
        for kv in &page_kvs[..take] {
            let key = String::from_utf8_lossy(kv.key()).to_string();
            let id = ResourceID::try_parse(&key).map_err(|e| StoreError::Backend(e.to_string()))?;
            let data: serde_json::Value = serde_json::from_slice(kv.value())
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            items.push(StoredObject {
                id,
                etag: ETag::new(kv.mod_revision() as u64, kv.value()),
                data,
            });
        }
        let next = if take < page_kvs.len() {
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
        let mut client = self.client.clone();
        let key = Self::key_for(id);
        let bytes = serde_json::to_vec(&data).map_err(|e| StoreError::Backend(e.to_string()))?;

        if let Some(expected) = expected_etag {
            // The ETag encodes `{mod_revision}-{hash}`; compare on mod_revision.
            let expected_revision: i64 = expected
                .as_str()
                .split('-')
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or(-1);
            let cmp = if expected.as_str() == "*" {
                Compare::create_revision(key.clone(), CompareOp::Equal, 0)
            } else {
                Compare::mod_revision(key.clone(), CompareOp::Equal, expected_revision)
            };
            let txn = Txn::new()
                .when(vec![cmp])
                .and_then(vec![TxnOp::put(key.clone(), bytes.clone(), None)]);
            let resp = client
                .txn(txn)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            if !resp.succeeded() {
                let current = self.get(id).await?;
                return Err(StoreError::PreconditionFailed {
                    expected: expected.to_string(),
                    actual: current
                        .map(|o| o.etag.to_string())
                        .unwrap_or_else(|| "<missing>".to_owned()),
                });
            }
        } else {
            client
                .put(key.clone(), bytes.clone(), None)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }

        let after = self
            .get(id)
            .await?
            .ok_or_else(|| StoreError::Backend("write did not land".to_owned()))?;
        Ok(after.etag)
    }

    async fn delete(&self, id: &ResourceID, expected_etag: Option<&ETag>) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        let key = Self::key_for(id);

        if let Some(expected) = expected_etag {
            let current = self.get(id).await?;
            match current {
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
        let resp = client
            .delete(key, None)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        if resp.deleted() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}
