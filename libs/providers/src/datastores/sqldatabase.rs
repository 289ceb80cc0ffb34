use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ucp_core::processor::{diff_generations, ProcessContext, ProcessResult, Processor, ProcessorError, ValidationError};
use ucp_core::resource::{OutputResource, Properties, ProvisioningState, Status};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeReference {
    pub name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlDatabaseProperties {
    pub recipe: RecipeReference,
}

impl Properties for SqlDatabaseProperties {
    fn resource_type() -> &'static str {
        "Applications.Datastores/sqlDatabases"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SqlDatabaseStatus {
    pub provisioning_state: ProvisioningState,
    #[serde(default)]
    pub recipe_job_id: Option<String>,
}

impl Default for SqlDatabaseStatus {
    fn default() -> Self {
        SqlDatabaseStatus {
            provisioning_state: ProvisioningState::Accepted,
            recipe_job_id: None,
        }
    }
}

impl Status for SqlDatabaseStatus {
    fn provisioning_state(&self) -> ProvisioningState {
        self.provisioning_state
    }

    fn set_provisioning_state(&mut self, state: ProvisioningState) {
        self.provisioning_state = state;
    }
}

/// A recipe execution handle: a deployment engine would return something
/// shaped like this from its "submit" endpoint. `RecipeEngine` is the seam a
/// real client plugs into; submission and polling both go through it rather
/// than hardcoding an HTTP client here.
#[derive(Debug, Clone)]
pub struct RecipeJob {
    pub job_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipeJobState {
    Running,
    Succeeded { output_resources: Vec<OutputResource> },
    Failed { message: String },
}

/// Submits and polls recipe executions against an external deployment
/// engine. Recipe-driven processors (unlike manual ones such as
/// `ContainerProcessor`) never build output resources themselves; they only
/// know how to ask this engine to do it and wait for an answer -- grounded
/// in the corpus's "submit a unit of work, then poll its status back onto
/// the owning resource" pattern, generalized from a Kubernetes Job id to an
/// opaque recipe execution id.
#[async_trait]
pub trait RecipeEngine: Send + Sync {
    async fn submit(&self, recipe: &RecipeReference) -> Result<RecipeJob, ProcessorError>;
    async fn poll(&self, job: &RecipeJob) -> Result<RecipeJobState, ProcessorError>;

    /// Tears down a single output resource from a prior generation that the
    /// current one no longer names (invariant I-P-1).
    async fn release(&self, resource: &OutputResource) -> Result<(), ProcessorError>;
}

pub struct SqlDatabaseProcessor<E: RecipeEngine> {
    engine: E,
    poll_interval: Duration,
}

impl<E: RecipeEngine> SqlDatabaseProcessor<E> {
    pub fn new(engine: E) -> Self {
        SqlDatabaseProcessor {
            engine,
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_poll_interval(engine: E, poll_interval: Duration) -> Self {
        SqlDatabaseProcessor { engine, poll_interval }
    }
}

#[async_trait]
impl<E: RecipeEngine + 'static> Processor<SqlDatabaseProperties> for SqlDatabaseProcessor<E> {
    async fn validate(&self, properties: &SqlDatabaseProperties) -> Result<(), ValidationError> {
        if properties.recipe.name.trim().is_empty() {
            return Err(ValidationError::Message("recipe.name must not be empty".to_owned()));
        }
        Ok(())
    }

    async fn process(
        &self,
        ctx: &ProcessContext,
        properties: &mut SqlDatabaseProperties,
    ) -> Result<ProcessResult, ProcessorError> {
        let job = self.engine.submit(&properties.recipe).await?;

        let outputs = loop {
            match self.engine.poll(&job).await? {
                RecipeJobState::Running => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                RecipeJobState::Succeeded { output_resources } => break output_resources,
                RecipeJobState::Failed { message } => return Err(ProcessorError::Recipe(message)),
            }
        };

        let previous_outputs: Vec<OutputResource> = ctx
            .store
            .get(&ctx.resource_id)
            .await
            .ok()
            .flatten()
            .and_then(|s| s.data.get("status").and_then(|v| v.get("outputResources")).cloned())
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        // I-P-1: tear down anything this generation no longer names.
        for orphan in diff_generations(&previous_outputs, &outputs) {
            self.engine.release(&orphan).await?;
        }

        Ok(ProcessResult {
            output_resources: outputs,
        })
    }

    async fn delete(&self, _ctx: &ProcessContext, properties: &SqlDatabaseProperties) -> Result<(), ProcessorError> {
        let job = self.engine.submit(&properties.recipe).await?;
        loop {
            match self.engine.poll(&job).await? {
                RecipeJobState::Running => tokio::time::sleep(self.poll_interval).await,
                RecipeJobState::Succeeded { .. } => return Ok(()),
                RecipeJobState::Failed { message } => return Err(ProcessorError::Recipe(message)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use ucp_core::store::memory::MemoryStore;

    struct FlakyEngine {
        polls: Arc<AtomicUsize>,
        released: Arc<std::sync::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl RecipeEngine for FlakyEngine {
        async fn submit(&self, _recipe: &RecipeReference) -> Result<RecipeJob, ProcessorError> {
            Ok(RecipeJob {
                job_id: "job-1".to_owned(),
            })
        }

        async fn poll(&self, _job: &RecipeJob) -> Result<RecipeJobState, ProcessorError> {
            let attempt = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt < 2 {
                return Ok(RecipeJobState::Running);
            }
            Ok(RecipeJobState::Succeeded {
                output_resources: vec![OutputResource {
                    local_id: "database".to_owned(),
                    id: "/planes/aws/aws/providers/AWS.RDS/DBInstance/db".to_owned(),
                    radius_managed: true,
                }],
            })
        }

        async fn release(&self, resource: &OutputResource) -> Result<(), ProcessorError> {
            self.released.lock().unwrap().push(resource.local_id.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn process_polls_until_the_recipe_job_succeeds() {
        let polls = Arc::new(AtomicUsize::new(0));
        let processor = SqlDatabaseProcessor::with_poll_interval(
            FlakyEngine {
                polls: polls.clone(),
                released: Arc::new(std::sync::Mutex::new(Vec::new())),
            },
            Duration::from_millis(1),
        );

        let resource_id = ucp_core::id::ResourceID::parse(
            "/planes/radius/local/resourceGroups/default/providers/Applications.Datastores/sqlDatabases/db",
        );
        let store: Arc<dyn ucp_core::store::ResourceStore> = Arc::new(MemoryStore::new());
        let ctx = ProcessContext {
            resource_id,
            store,
        };
        let mut properties = SqlDatabaseProperties {
            recipe: RecipeReference {
                name: "sql-azure".to_owned(),
                parameters: BTreeMap::new(),
            },
        };

        let result = processor.process(&ctx, &mut properties).await.unwrap();
        assert_eq!(result.output_resources.len(), 1);
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    /// I-P-1: an output resource from a prior generation that the new one no
    /// longer names gets released through the recipe engine.
    #[tokio::test]
    async fn process_releases_output_resources_orphaned_by_a_new_generation() {
        let released = Arc::new(std::sync::Mutex::new(Vec::new()));
        let processor = SqlDatabaseProcessor::with_poll_interval(
            FlakyEngine {
                polls: Arc::new(AtomicUsize::new(1)),
                released: released.clone(),
            },
            Duration::from_millis(1),
        );

        let resource_id = ucp_core::id::ResourceID::parse(
            "/planes/radius/local/resourceGroups/default/providers/Applications.Datastores/sqlDatabases/db",
        );
        let store: Arc<dyn ucp_core::store::ResourceStore> = Arc::new(MemoryStore::new());
        store
            .save(
                &resource_id,
                serde_json::json!({
                    "properties": {},
                    "status": {
                        "outputResources": [
                            {"local_id": "database", "id": "/planes/aws/aws/providers/AWS.RDS/DBInstance/db", "radius_managed": true},
                            {"local_id": "backup", "id": "/planes/aws/aws/providers/AWS.RDS/DBInstance/db-backup", "radius_managed": true},
                        ]
                    }
                }),
                None,
            )
            .await
            .unwrap();

        let ctx = ProcessContext { resource_id, store };
        let mut properties = SqlDatabaseProperties {
            recipe: RecipeReference {
                name: "sql-azure".to_owned(),
                parameters: BTreeMap::new(),
            },
        };

        processor.process(&ctx, &mut properties).await.unwrap();
        assert_eq!(released.lock().unwrap().as_slice(), ["backup"]);
    }
}
