use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ucp_core::dapr::{DaprComponentSpec, DaprMetadataEntry, DaprReconciler};
use ucp_core::processor::{ProcessContext, ProcessResult, Processor, ProcessorError, ValidationError};
use ucp_core::resource::{OutputResource, Properties, ProvisioningState, Status};

/// `Applications.Dapr/stateStores` properties. `type` and `version` map
/// straight onto the Dapr `Component` manifest's `spec.type`/`spec.version`;
/// `metadata` is whatever the chosen Dapr state store building block needs
/// (e.g. `redisHost`/`redisPassword` for `state.redis`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaprStateStoreProperties {
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_version() -> String {
    "v1".to_owned()
}

impl Properties for DaprStateStoreProperties {
    fn resource_type() -> &'static str {
        "Applications.Dapr/stateStores"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DaprStateStoreStatus {
    pub provisioning_state: ProvisioningState,
}

impl Default for DaprStateStoreStatus {
    fn default() -> Self {
        DaprStateStoreStatus {
            provisioning_state: ProvisioningState::Accepted,
        }
    }
}

impl Status for DaprStateStoreStatus {
    fn provisioning_state(&self) -> ProvisioningState {
        self.provisioning_state
    }

    fn set_provisioning_state(&mut self, state: ProvisioningState) {
        self.provisioning_state = state;
    }
}

/// Manual processor: a Dapr state store is entirely described by its own
/// properties, so there is nothing to submit to a recipe engine -- the
/// `Component` manifest itself is the only output resource.
pub struct DaprStateStoreProcessor {
    reconciler: DaprReconciler,
    namespace: String,
}

impl DaprStateStoreProcessor {
    pub fn new(reconciler: DaprReconciler, namespace: String) -> Self {
        DaprStateStoreProcessor { reconciler, namespace }
    }

    fn component_name(ctx: &ProcessContext) -> String {
        ctx.resource_id
            .name()
            .unwrap_or_default()
            .to_lowercase()
            .replace(['.', '_'], "-")
    }
}

#[async_trait]
impl Processor<DaprStateStoreProperties> for DaprStateStoreProcessor {
    async fn validate(&self, properties: &DaprStateStoreProperties) -> Result<(), ValidationError> {
        if properties.component_type.trim().is_empty() {
            return Err(ValidationError::Message("type must not be empty".to_owned()));
        }
        Ok(())
    }

    async fn process(
        &self,
        ctx: &ProcessContext,
        properties: &mut DaprStateStoreProperties,
    ) -> Result<ProcessResult, ProcessorError> {
        let name = Self::component_name(ctx);
        let spec = DaprComponentSpec {
            name: name.clone(),
            namespace: self.namespace.clone(),
            component_type: properties.component_type.clone(),
            version: properties.version.clone(),
            metadata: properties
                .metadata
                .iter()
                .map(|(k, v)| DaprMetadataEntry {
                    name: k.clone(),
                    value: v.clone(),
                })
                .collect(),
            owner: ctx.resource_id.normalize(),
        };

        self.reconciler
            .apply(&spec)
            .await
            .map_err(|e| ProcessorError::Downstream(e.to_string()))?;

        Ok(ProcessResult {
            output_resources: vec![OutputResource {
                local_id: "component".to_owned(),
                id: format!(
                    "/planes/kubernetes/local/namespaces/{}/providers/dapr.io/Component/{name}",
                    self.namespace
                ),
                radius_managed: true,
            }],
        })
    }

    async fn delete(&self, ctx: &ProcessContext, _properties: &DaprStateStoreProperties) -> Result<(), ProcessorError> {
        let name = Self::component_name(ctx);
        self.reconciler
            .delete(&self.namespace, &name)
            .await
            .map_err(|e| ProcessorError::Downstream(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_version_is_v1() {
        let properties: DaprStateStoreProperties = serde_json::from_value(serde_json::json!({
            "type": "state.redis",
            "metadata": {"redisHost": "redis:6379"},
        }))
        .unwrap();
        assert_eq!(properties.version, "v1");
    }
}
