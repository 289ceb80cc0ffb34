use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::core::{DynamicObject, GroupVersionKind, TypeMeta};
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

pub const FIELD_MANAGER: &str = "radius-ucp";
const DAPR_GROUP: &str = "dapr.io";
const DAPR_VERSION: &str = "v1alpha1";
const DAPR_KIND: &str = "Component";

/// Annotation carrying the normalized id of the Radius resource that owns a
/// `Component` manifest. The Dapr CRD itself has no notion of ownership, so
/// uniqueness has to be tracked this way rather than through `OwnerReference`s
/// (these manifests aren't owned by a Kubernetes object, by a Radius one).
const OWNER_ANNOTATION: &str = "radius.dev/resource-id";

/// A single `spec.metadata` entry on a Dapr `Component` manifest.
#[derive(Debug, Clone)]
pub struct DaprMetadataEntry {
    pub name: String,
    pub value: String,
}

/// Enough information to build a `dapr.io/v1alpha1` `Component` manifest for
/// any of the Dapr-shaped portable resource types (state stores, pub/sub
/// brokers, secret stores, configuration stores, bindings) -- they all
/// compile down to the same manifest shape, differing only in `spec.type`.
#[derive(Debug, Clone)]
pub struct DaprComponentSpec {
    pub name: String,
    pub namespace: String,
    pub component_type: String,
    pub version: String,
    pub metadata: Vec<DaprMetadataEntry>,
    /// Normalized id of the Radius resource this manifest belongs to, e.g.
    /// `/planes/radius/local/resourcegroups/default/providers/applications.dapr/statestores/orders`.
    pub owner: String,
}

fn dapr_component_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(DAPR_GROUP, DAPR_VERSION, DAPR_KIND))
}

fn build_manifest(spec: &DaprComponentSpec) -> DynamicObject {
    let metadata: Vec<Value> = spec
        .metadata
        .iter()
        .map(|entry| json!({ "name": entry.name, "value": entry.value }))
        .collect();

    DynamicObject {
        types: Some(TypeMeta {
            api_version: format!("{DAPR_GROUP}/{DAPR_VERSION}"),
            kind: DAPR_KIND.to_owned(),
        }),
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(BTreeMap::from([(
                "app.kubernetes.io/managed-by".to_owned(),
                "radius".to_owned(),
            )])),
            annotations: Some(BTreeMap::from([(
                OWNER_ANNOTATION.to_owned(),
                spec.owner.clone(),
            )])),
            ..ObjectMeta::default()
        },
        data: json!({
            "spec": {
                "type": spec.component_type,
                "version": spec.version,
                "metadata": metadata,
            }
        }),
    }
}

/// Reconciles a single Dapr `Component` manifest for a portable Dapr
/// resource. Invariant I-D-1 (`SPEC_FULL.md` §3.8): Dapr component names are
/// global within a namespace across every Dapr resource type, so uniqueness
/// is checked against the full `Component` list before applying, not scoped
/// to "other state stores" alone.
pub struct DaprReconciler {
    client: Client,
}

impl DaprReconciler {
    pub fn new(client: Client) -> Self {
        DaprReconciler { client }
    }

    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &dapr_component_resource())
    }

    /// Returns `Err(Error::Conflict)` if another component with this name
    /// already exists in the namespace and it belongs to a different owning
    /// Radius resource than `spec.owner` -- comparing the blanket
    /// `managed-by: radius` label alone can't tell two different Dapr
    /// resource kinds wanting the same component name apart, since both
    /// would carry that same label.
    pub async fn check_name_unique(&self, spec: &DaprComponentSpec) -> Result<()> {
        let api = self.api(&spec.namespace);
        match api.get_opt(&spec.name).await.map_err(Error::Kube)? {
            Some(existing) => {
                let owner = existing
                    .metadata
                    .annotations
                    .as_ref()
                    .and_then(|a| a.get(OWNER_ANNOTATION));
                match owner {
                    Some(owner) if owner == &spec.owner => Ok(()),
                    _ => Err(Error::Conflict(format!(
                        "dapr component name '{}' in namespace '{}' is already in use by another resource",
                        spec.name, spec.namespace
                    ))),
                }
            }
            None => Ok(()),
        }
    }

    pub async fn apply(&self, spec: &DaprComponentSpec) -> Result<()> {
        self.check_name_unique(spec).await?;
        let manifest = build_manifest(spec);
        let api = self.api(&spec.namespace);
        api.patch(
            &spec.name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Apply(&manifest),
        )
        .await
        .map_err(Error::Kube)?;
        Ok(())
    }

    pub async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let api = self.api(namespace);
        api.delete(name, &Default::default())
            .await
            .map_err(Error::Kube)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use http::{Request, Response};
    use kube::client::Body;

    const OWNER: &str = "/planes/radius/local/resourcegroups/default/providers/applications.dapr/statestores/orders";

    fn test_spec() -> DaprComponentSpec {
        DaprComponentSpec {
            name: "statestore".to_owned(),
            namespace: "default".to_owned(),
            component_type: "state.redis".to_owned(),
            version: "v1".to_owned(),
            metadata: vec![],
            owner: OWNER.to_owned(),
        }
    }

    /// Invariant I-D-1: a component name already in use by something this
    /// runtime didn't create is a conflict, even though the Dapr component
    /// CRD itself has no notion of ownership.
    #[tokio::test]
    async fn name_collision_with_a_component_not_managed_by_radius_is_rejected() {
        let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");
        let reconciler = DaprReconciler::new(client);

        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::GET);
            let existing = json!({
                "apiVersion": "dapr.io/v1alpha1",
                "kind": "Component",
                "metadata": { "name": "statestore", "namespace": "default" },
                "spec": { "type": "state.redis", "version": "v1", "metadata": [] },
            });
            send.send_response(
                Response::builder()
                    .body(Body::from(serde_json::to_vec(&existing).unwrap()))
                    .unwrap(),
            );
        });

        let result = reconciler.check_name_unique(&test_spec()).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        tokio::time::timeout(std::time::Duration::from_secs(1), server)
            .await
            .expect("timeout on mock apiserver")
            .expect("scenario completed without errors");
    }

    /// A component already present but owned by this same portable resource
    /// (i.e. the one it wrote last time) is not a conflict.
    #[tokio::test]
    async fn name_collision_with_our_own_previously_applied_component_is_allowed() {
        let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");
        let reconciler = DaprReconciler::new(client);

        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::GET);
            let existing = json!({
                "apiVersion": "dapr.io/v1alpha1",
                "kind": "Component",
                "metadata": {
                    "name": "statestore",
                    "namespace": "default",
                    "labels": { "app.kubernetes.io/managed-by": "radius" },
                    "annotations": { OWNER_ANNOTATION: OWNER },
                },
                "spec": { "type": "state.redis", "version": "v1", "metadata": [] },
            });
            send.send_response(
                Response::builder()
                    .body(Body::from(serde_json::to_vec(&existing).unwrap()))
                    .unwrap(),
            );
        });

        let result = reconciler.check_name_unique(&test_spec()).await;
        assert!(result.is_ok());
        tokio::time::timeout(std::time::Duration::from_secs(1), server)
            .await
            .expect("timeout on mock apiserver")
            .expect("scenario completed without errors");
    }

    /// Scenario S2: two different Dapr resource kinds (a state store and a
    /// secret store) requesting the same component name both carry
    /// `managed-by: radius`, but only one owns the existing manifest.
    #[tokio::test]
    async fn name_collision_between_two_different_owning_resources_is_rejected() {
        let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");
        let reconciler = DaprReconciler::new(client);

        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::GET);
            let existing = json!({
                "apiVersion": "dapr.io/v1alpha1",
                "kind": "Component",
                "metadata": {
                    "name": "orders",
                    "namespace": "default",
                    "labels": { "app.kubernetes.io/managed-by": "radius" },
                    "annotations": { OWNER_ANNOTATION: OWNER },
                },
                "spec": { "type": "state.redis", "version": "v1", "metadata": [] },
            });
            send.send_response(
                Response::builder()
                    .body(Body::from(serde_json::to_vec(&existing).unwrap()))
                    .unwrap(),
            );
        });

        let secret_store_spec = DaprComponentSpec {
            name: "orders".to_owned(),
            namespace: "default".to_owned(),
            component_type: "secretstores.local.file".to_owned(),
            version: "v1".to_owned(),
            metadata: vec![],
            owner: "/planes/radius/local/resourcegroups/default/providers/applications.dapr/secretstores/orders"
                .to_owned(),
        };

        let result = reconciler.check_name_unique(&secret_store_spec).await;
        let err = result.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(err.to_string().contains("already in use by another resource"));
        tokio::time::timeout(std::time::Duration::from_secs(1), server)
            .await
            .expect("timeout on mock apiserver")
            .expect("scenario completed without errors");
    }

    #[test]
    fn manifest_carries_the_declared_component_type_and_metadata() {
        let spec = DaprComponentSpec {
            name: "statestore".to_owned(),
            namespace: "default".to_owned(),
            component_type: "state.redis".to_owned(),
            version: "v1".to_owned(),
            metadata: vec![DaprMetadataEntry {
                name: "redisHost".to_owned(),
                value: "redis:6379".to_owned(),
            }],
            owner: OWNER.to_owned(),
        };
        let manifest = build_manifest(&spec);
        assert_eq!(
            manifest.data["spec"]["type"].as_str(),
            Some("state.redis")
        );
        assert_eq!(
            manifest.data["spec"]["metadata"][0]["name"].as_str(),
            Some("redisHost")
        );
        assert_eq!(manifest.metadata.name.as_deref(), Some("statestore"));
        assert_eq!(
            manifest.metadata.annotations.unwrap().get(OWNER_ANNOTATION).map(String::as_str),
            Some(OWNER)
        );
    }
}
