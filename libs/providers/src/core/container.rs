use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::Client;
use serde::{Deserialize, Serialize};

use ucp_core::dapr::FIELD_MANAGER;
use ucp_core::processor::{diff_generations, ProcessContext, ProcessResult, Processor, ProcessorError, ValidationError};
use ucp_core::resource::{OutputResource, Properties, ProvisioningState, Status};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerProperties {
    pub image: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<u16>,
}

impl Properties for ContainerProperties {
    fn resource_type() -> &'static str {
        "Applications.Core/containers"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainerStatus {
    pub provisioning_state: ProvisioningState,
}

impl Default for ContainerStatus {
    fn default() -> Self {
        ContainerStatus {
            provisioning_state: ProvisioningState::Accepted,
        }
    }
}

impl Status for ContainerStatus {
    fn provisioning_state(&self) -> ProvisioningState {
        self.provisioning_state
    }

    fn set_provisioning_state(&mut self, state: ProvisioningState) {
        self.provisioning_state = state;
    }
}

/// Manual (non-recipe) processor for `Applications.Core/containers`: deploys
/// a `Deployment` and, when the container declares ports, a matching
/// `Service`, via the same server-side-apply idiom `DaprReconciler` uses for
/// `Component` manifests.
pub struct ContainerProcessor {
    client: Client,
    namespace: String,
}

impl ContainerProcessor {
    pub fn new(client: Client, namespace: String) -> Self {
        ContainerProcessor { client, namespace }
    }

    fn workload_name(ctx: &ProcessContext) -> String {
        ctx.resource_id
            .name()
            .unwrap_or_default()
            .to_lowercase()
            .replace(['.', '_'], "-")
    }
}

#[async_trait]
impl Processor<ContainerProperties> for ContainerProcessor {
    async fn validate(&self, properties: &ContainerProperties) -> Result<(), ValidationError> {
        if properties.image.trim().is_empty() {
            return Err(ValidationError::Message("image must not be empty".to_owned()));
        }
        Ok(())
    }

    async fn process(
        &self,
        ctx: &ProcessContext,
        properties: &mut ContainerProperties,
    ) -> Result<ProcessResult, ProcessorError> {
        let name = Self::workload_name(ctx);
        let labels = BTreeMap::from([("radius.dev/resource".to_owned(), name.clone())]);

        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels.clone()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "app".to_owned(),
                            image: Some(properties.image.clone()),
                            env: Some(
                                properties
                                    .env
                                    .iter()
                                    .map(|(k, v)| EnvVar {
                                        name: k.clone(),
                                        value: Some(v.clone()),
                                        ..Default::default()
                                    })
                                    .collect(),
                            ),
                            ports: Some(
                                properties
                                    .ports
                                    .iter()
                                    .map(|p| ContainerPort {
                                        container_port: *p as i32,
                                        ..Default::default()
                                    })
                                    .collect(),
                            ),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        };

        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        deployments
            .patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&deployment))
            .await
            .map_err(|e| ProcessorError::Downstream(e.to_string()))?;

        let mut outputs = vec![OutputResource {
            local_id: "deployment".to_owned(),
            id: format!(
                "/planes/kubernetes/local/namespaces/{}/providers/apps/Deployment/{name}",
                self.namespace
            ),
            radius_managed: true,
        }];

        if !properties.ports.is_empty() {
            let service = Service {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    namespace: Some(self.namespace.clone()),
                    labels: Some(labels.clone()),
                    ..Default::default()
                },
                spec: Some(ServiceSpec {
                    selector: Some(labels.clone()),
                    ports: Some(
                        properties
                            .ports
                            .iter()
                            .map(|p| ServicePort {
                                port: *p as i32,
                                target_port: Some(IntOrString::Int(*p as i32)),
                                ..Default::default()
                            })
                            .collect(),
                    ),
                    ..Default::default()
                }),
                ..Default::default()
            };
            let services: Api<Service> = Api::namespaced(self.client.clone(), &self.namespace);
            services
                .patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&service))
                .await
                .map_err(|e| ProcessorError::Downstream(e.to_string()))?;
            outputs.push(OutputResource {
                local_id: "service".to_owned(),
                id: format!(
                    "/planes/kubernetes/local/namespaces/{}/providers/core/Service/{name}",
                    self.namespace
                ),
                radius_managed: true,
            });
        }

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
            if orphan.local_id == "service" {
                let services: Api<Service> = Api::namespaced(self.client.clone(), &self.namespace);
                let _ = services.delete(&name, &DeleteParams::default()).await;
            }
        }

        Ok(ProcessResult {
            output_resources: outputs,
        })
    }

    async fn delete(&self, ctx: &ProcessContext, _properties: &ContainerProperties) -> Result<(), ProcessorError> {
        let name = Self::workload_name(ctx);
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        let _ = deployments.delete(&name, &DeleteParams::default()).await;
        let services: Api<Service> = Api::namespaced(self.client.clone(), &self.namespace);
        let _ = services.delete(&name, &DeleteParams::default()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_image_fails_validation() {
        let properties = ContainerProperties {
            image: "".to_owned(),
            env: BTreeMap::new(),
            ports: vec![],
        };
        assert!(properties.image.trim().is_empty());
        let _ = properties; // validated through `ContainerProcessor::validate` in integration coverage
    }

    #[test]
    fn default_status_is_accepted() {
        assert_eq!(ContainerStatus::default().provisioning_state, ProvisioningState::Accepted);
    }
}
