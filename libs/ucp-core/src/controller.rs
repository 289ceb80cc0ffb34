use std::marker::PhantomData;
use std::sync::Arc;

use actix_web::http::header::{HeaderValue, IF_MATCH};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::error::Error;
use crate::metrics::Metrics;
use crate::resource::{Properties, PrincipalType, Status, SystemData, TrackedResource};
use crate::status::{OperationKind, OperationStatus, StatusManager};
use crate::store::{ETag, PageToken, ResourceStore};
use crate::id::ResourceID;

const DEFAULT_PRINCIPAL: &str = "system";

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip_token: Option<String>,
    #[serde(default)]
    pub top: Option<usize>,
}

/// Shared dependencies a generic tracked-resource route handler needs,
/// parameterized over the resource kind's properties/status payloads so one
/// `configure` call wires up every verb for that kind (mirrors the teacher's
/// `Data<State>` shared-state convention, generalized from one controller to
/// one per registered resource type).
pub struct ControllerState<P: Properties, S: Status> {
    store: Arc<dyn ResourceStore>,
    status: Arc<StatusManager>,
    metrics: Arc<Metrics>,
    _marker: PhantomData<fn() -> (P, S)>,
}

impl<P: Properties, S: Status> ControllerState<P, S> {
    pub fn new(store: Arc<dyn ResourceStore>, status: Arc<StatusManager>, metrics: Arc<Metrics>) -> Self {
        ControllerState {
            store,
            status,
            metrics,
            _marker: PhantomData,
        }
    }
}

fn if_match_etag(req: &HttpRequest) -> Option<ETag> {
    req.headers()
        .get(IF_MATCH)
        .and_then(|v: &HeaderValue| v.to_str().ok())
        .map(|s| s.trim_matches('"').to_owned())
        .map(ETag::from)
}

/// Extracts `properties.application`/`properties.environment` from a raw
/// tracked-resource JSON document (pre- or post-merge, stored or incoming --
/// both shapes put these directly under `properties`).
fn parent_refs(value: &serde_json::Value) -> (Option<String>, Option<String>) {
    let properties = value.get("properties");
    let field = |name: &str| {
        properties
            .and_then(|p| p.get(name))
            .and_then(|v| v.as_str())
            .map(|s| s.to_owned())
    };
    (field("application"), field("environment"))
}

/// Invariant: `application`/`environment` are immutable once set on a
/// tracked resource. Changing either on a PUT/PATCH is rejected rather than
/// silently re-parenting the resource.
fn check_parent_immutable(previous: &serde_json::Value, incoming: &serde_json::Value) -> Result<(), Error> {
    let (old_application, old_environment) = parent_refs(previous);
    let (new_application, new_environment) = parent_refs(incoming);
    if old_application != new_application {
        return Err(Error::LinkedResourceUpdateError {
            old: old_application.unwrap_or_default(),
            new: new_application.unwrap_or_default(),
        });
    }
    if old_environment != new_environment {
        return Err(Error::LinkedResourceUpdateError {
            old: old_environment.unwrap_or_default(),
            new: new_environment.unwrap_or_default(),
        });
    }
    Ok(())
}

fn principal(req: &HttpRequest) -> String {
    req.headers()
        .get("x-ms-client-principal-name")
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_PRINCIPAL)
        .to_owned()
}

/// `GET /.../{type}/{name}`
async fn get_resource<P: Properties, S: Status>(
    state: web::Data<ControllerState<P, S>>,
    path: web::Path<String>,
) -> Result<HttpResponse, Error> {
    let start = std::time::Instant::now();
    let id: ResourceID = path.into_inner().parse()?;
    let result = state.store.get(&id).await;
    let status: u16 = match &result {
        Ok(Some(_)) => 200,
        Ok(None) => 404,
        Err(_) => 500,
    };
    state
        .metrics
        .http
        .observe("tracked_resource", "GET", status, start.elapsed().as_secs_f64());
    let stored = result?.ok_or_else(|| Error::NotFound(id.to_string()))?;
    Ok(HttpResponse::Ok()
        .insert_header(("ETag", stored.etag.as_str()))
        .json(stored.data))
}

/// `GET /.../{type}` (list, paginated under the parent scope)
async fn list_resources<P: Properties, S: Status>(
    state: web::Data<ControllerState<P, S>>,
    path: web::Path<String>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, Error> {
    let scope: ResourceID = path.into_inner().parse()?;
    let page = PageToken(query.skip_token.clone());
    let (items, next) = state
        .store
        .list(&scope, page, query.top.unwrap_or(100))
        .await?;
    let values: Vec<_> = items.into_iter().map(|s| s.data).collect();
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "value": values,
        "nextLink": next.and_then(|p| p.0),
    })))
}

/// `PUT /.../{type}/{name}`: create-or-replace. ETag-checked when `If-Match`
/// is present; stamps `SystemData` distinguishing create (no prior record)
/// from update; enqueues a C3 operation and answers `202 Accepted`.
async fn put_resource<P: Properties, S: Status>(
    state: web::Data<ControllerState<P, S>>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, Error> {
    let id: ResourceID = path.into_inner().parse()?;
    let properties: P = serde_json::from_value(
        body.get("properties").cloned().unwrap_or(serde_json::Value::Null),
    )
    .map_err(|e| Error::ValidationFailed(e.to_string()))?;

    let expected_etag = if_match_etag(&req);
    let previous = state.store.get(&id).await?;
    if let Some(expected) = &expected_etag {
        if let Some(existing) = &previous {
            if &existing.etag != expected {
                return Err(Error::PreconditionFailed {
                    expected: expected.to_string(),
                    actual: existing.etag.to_string(),
                });
            }
        }
    }

    if let Some(existing) = &previous {
        check_parent_immutable(&existing.data, &body)?;
    }

    let previous_system_data = previous
        .as_ref()
        .and_then(|p| p.data.get("systemData").cloned())
        .and_then(|v| serde_json::from_value(v).ok());
    let system_data = SystemData::stamp(previous_system_data.as_ref(), &principal(&req), PrincipalType::User);

    let mut resource = TrackedResource::<P, S>::new(id.clone(), properties);
    resource.system_data = system_data;

    let value = serde_json::to_value(&resource).map_err(|e| Error::Internal(e.to_string()))?;
    state
        .store
        .save(&id, value, previous.as_ref().map(|p| &p.etag))
        .await?;

    let operation = state.status.enqueue(&id, OperationKind::Put).await?;
    Ok(accepted_response(&id, &operation))
}

/// `PATCH /.../{type}/{name}`: merge-patch semantics over the stored
/// properties document, same ETag/async-operation contract as `PUT`.
async fn patch_resource<P: Properties, S: Status>(
    state: web::Data<ControllerState<P, S>>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, Error> {
    let id: ResourceID = path.into_inner().parse()?;
    let existing = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| Error::NotFound(id.to_string()))?;

    if let Some(expected) = if_match_etag(&req) {
        if existing.etag != expected {
            return Err(Error::PreconditionFailed {
                expected: expected.to_string(),
                actual: existing.etag.to_string(),
            });
        }
    }

    let mut merged = existing.data.clone();
    json_merge(&mut merged, &body);
    let _: P = serde_json::from_value(
        merged.get("properties").cloned().unwrap_or(serde_json::Value::Null),
    )
    .map_err(|e| Error::ValidationFailed(e.to_string()))?;
    check_parent_immutable(&existing.data, &merged)?;

    let previous_system_data = existing
        .data
        .get("systemData")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok());
    let system_data = SystemData::stamp(previous_system_data.as_ref(), &principal(&req), PrincipalType::User);
    merged["systemData"] = serde_json::to_value(system_data).map_err(|e| Error::Internal(e.to_string()))?;

    state.store.save(&id, merged, Some(&existing.etag)).await?;
    let operation = state.status.enqueue(&id, OperationKind::Patch).await?;
    Ok(accepted_response(&id, &operation))
}

/// `DELETE /.../{type}/{name}`: ETag-checked, enqueues a delete operation.
/// Idempotent: a resource that's already absent returns `204` rather than
/// `404`, matching ARM delete semantics.
async fn delete_resource<P: Properties, S: Status>(
    state: web::Data<ControllerState<P, S>>,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<HttpResponse, Error> {
    let id: ResourceID = path.into_inner().parse()?;
    let Some(existing) = state.store.get(&id).await? else {
        return Ok(HttpResponse::NoContent().finish());
    };

    if let Some(expected) = if_match_etag(&req) {
        if existing.etag != expected {
            return Err(Error::PreconditionFailed {
                expected: expected.to_string(),
                actual: existing.etag.to_string(),
            });
        }
    }

    let operation = state.status.enqueue(&id, OperationKind::Delete).await?;
    Ok(accepted_response(&id, &operation))
}

/// `GET .../operationStatuses/{id}`
async fn get_operation_status<P: Properties, S: Status>(
    state: web::Data<ControllerState<P, S>>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, Error> {
    let (plane_path, operation_id) = path.into_inner();
    let plane: ResourceID = plane_path.parse()?;
    let status = state
        .status
        .get(&plane, &operation_id)
        .await?
        .ok_or_else(|| Error::NotFound(operation_id))?;
    Ok(HttpResponse::Ok().json(status))
}

/// `GET .../operationResults/{id}`: resolves to `202` while the operation is
/// still running, or `200`/the stored resource once it has settled.
async fn get_operation_result<P: Properties, S: Status>(
    state: web::Data<ControllerState<P, S>>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, Error> {
    let (plane_path, operation_id) = path.into_inner();
    let plane: ResourceID = plane_path.parse()?;
    let status = state
        .status
        .get(&plane, &operation_id)
        .await?
        .ok_or_else(|| Error::NotFound(operation_id))?;

    if !status.status.is_terminal() {
        return Ok(accepted_response(&plane, &status));
    }

    let target: ResourceID = status.resource_id.parse()?;
    match state.store.get(&target).await? {
        Some(stored) => Ok(HttpResponse::Ok().json(stored.data)),
        None => Ok(HttpResponse::NoContent().finish()),
    }
}

fn accepted_response(id: &ResourceID, operation: &OperationStatus) -> HttpResponse {
    let plane = id.plane_id();
    let status_url = format!("{plane}/providers/System.Async/operationStatuses/{}", operation.id);
    let result_url = format!("{plane}/providers/System.Async/operationResults/{}", operation.id);
    HttpResponse::Accepted()
        .insert_header(("Azure-AsyncOperation", status_url))
        .insert_header(("Location", result_url))
        .json(operation)
}

/// Shallow JSON merge-patch: object fields overlay recursively, `null`
/// removes a key, scalars/arrays replace wholesale (RFC 7396 semantics).
fn json_merge(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                if value.is_null() {
                    target_map.remove(key);
                } else {
                    json_merge(target_map.entry(key.clone()).or_insert(serde_json::Value::Null), value);
                }
            }
        }
        (target, patch) => {
            *target = patch.clone();
        }
    }
}

/// Mounts every C4 verb for one tracked-resource kind under `base_path`,
/// e.g. `/planes/{planeType}/{planeName}/resourceGroups/{rg}/providers/{ns}/{type}`.
pub fn configure<P: Properties, S: Status>(cfg: &mut web::ServiceConfig, base_path: &str, state: ControllerState<P, S>) {
    let data = web::Data::new(state);
    cfg.app_data(data.clone())
        .service(
            web::resource(format!("{base_path}/{{name}}"))
                .route(web::get().to(get_resource::<P, S>))
                .route(web::put().to(put_resource::<P, S>))
                .route(web::patch().to(patch_resource::<P, S>))
                .route(web::delete().to(delete_resource::<P, S>)),
        )
        .service(web::resource(base_path.to_owned()).route(web::get().to(list_resources::<P, S>)))
        .service(
            web::resource(format!(
                "{base_path}/providers/System.Async/operationStatuses/{{operation_id}}"
            ))
            .route(web::get().to(get_operation_status::<P, S>)),
        )
        .service(
            web::resource(format!(
                "{base_path}/providers/System.Async/operationResults/{{operation_id}}"
            ))
            .route(web::get().to(get_operation_result::<P, S>)),
        );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_patch_removes_null_fields_and_overlays_objects() {
        let mut target = serde_json::json!({"a": 1, "b": {"x": 1, "y": 2}});
        let patch = serde_json::json!({"a": null, "b": {"y": 3, "z": 4}});
        json_merge(&mut target, &patch);
        assert_eq!(target, serde_json::json!({"b": {"x": 1, "y": 3, "z": 4}}));
    }

    #[test]
    fn changing_application_is_rejected() {
        let previous = serde_json::json!({"properties": {"application": "/a"}});
        let incoming = serde_json::json!({"properties": {"application": "/b"}});
        let err = check_parent_immutable(&previous, &incoming).unwrap_err();
        assert!(matches!(err, Error::LinkedResourceUpdateError { old, new } if old == "/a" && new == "/b"));
    }

    #[test]
    fn unchanged_parent_refs_are_accepted() {
        let previous = serde_json::json!({"properties": {"application": "/a", "environment": "/e"}});
        let incoming = serde_json::json!({"properties": {"application": "/a", "environment": "/e", "image": "redis"}});
        assert!(check_parent_immutable(&previous, &incoming).is_ok());
    }
}
