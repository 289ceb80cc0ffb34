use async_trait::async_trait;
use std::collections::HashSet;

use crate::id::ResourceID;
use crate::resource::{OutputResource, Properties};
use crate::store::ResourceStore;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("{0}")]
    Message(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("recipe execution failed: {0}")]
    Recipe(String),

    #[error("downstream resource operation failed: {0}")]
    Downstream(String),
}

/// Everything a `Processor` needs to reach the rest of the runtime:
/// the shared store (to read sibling resources, e.g. an environment a
/// container references) and the resource id currently being processed.
pub struct ProcessContext {
    pub resource_id: ResourceID,
    pub store: Arc<dyn ResourceStore>,
}

#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub output_resources: Vec<OutputResource>,
}

/// Per-resource-kind contract (C7). Every portable resource type registers
/// one implementation; the worker runtime (C5) invokes `process`/`delete`
/// once it dequeues a PUT/PATCH or DELETE operation for that type.
#[async_trait]
pub trait Processor<P: Properties>: Send + Sync {
    async fn validate(&self, properties: &P) -> Result<(), ValidationError>;

    async fn process(
        &self,
        ctx: &ProcessContext,
        properties: &mut P,
    ) -> Result<ProcessResult, ProcessorError>;

    async fn delete(&self, ctx: &ProcessContext, properties: &P) -> Result<(), ProcessorError>;
}

/// Diffs a new generation's output resources against the previous
/// generation, returning the `localID`s that must be torn down (invariant
/// I-P-1 in `SPEC_FULL.md`: no output resource from a prior generation
/// survives past a generation that no longer names its localID).
///
/// Grounded in the corpus's UID/label based orphan-tracking approach
/// (`stackabletech` `ClusterResources`), adapted from "owned Kubernetes
/// sub-objects" to "arbitrary-plane resources named by localID".
pub fn diff_generations(
    previous: &[OutputResource],
    current: &[OutputResource],
) -> Vec<OutputResource> {
    let current_ids: HashSet<&str> = current.iter().map(|o| o.local_id.as_str()).collect();
    previous
        .iter()
        .filter(|o| !current_ids.contains(o.local_id.as_str()))
        .cloned()
        .collect()
}
