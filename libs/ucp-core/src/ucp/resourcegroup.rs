use std::sync::Arc;

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::id::ResourceID;
use crate::store::ResourceStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tags: std::collections::BTreeMap<String, String>,
}

fn key(plane_type: &str, plane_name: &str, rg: &str) -> Result<ResourceID, Error> {
    format!("/planes/{plane_type}/{plane_name}/resourceGroups/{rg}").parse()
}

pub struct ResourceGroupRegistry {
    store: Arc<dyn ResourceStore>,
}

impl ResourceGroupRegistry {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        ResourceGroupRegistry { store }
    }

    pub async fn get(&self, plane_type: &str, plane_name: &str, rg: &str) -> Result<Option<ResourceGroup>, Error> {
        let id = key(plane_type, plane_name, rg)?;
        let Some(stored) = self.store.get(&id).await? else {
            return Ok(None);
        };
        let group = serde_json::from_value(stored.data).map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Some(group))
    }

    pub async fn put(
        &self,
        plane_type: &str,
        plane_name: &str,
        rg: &str,
        mut group: ResourceGroup,
    ) -> Result<ResourceGroup, Error> {
        let id = key(plane_type, plane_name, rg)?;
        group.id = id.to_string();
        group.name = rg.to_owned();
        let value = serde_json::to_value(&group).map_err(|e| Error::Internal(e.to_string()))?;
        self.store.save(&id, value, None).await?;
        Ok(group)
    }

    /// Deletes the resource group scope. Per invariant I-RT-1's sibling
    /// concern for scopes: callers are expected to have already torn down
    /// every tracked resource inside before calling this (C5's delete
    /// handlers run per-resource, not cascading).
    pub async fn delete(&self, plane_type: &str, plane_name: &str, rg: &str) -> Result<(), Error> {
        let id = key(plane_type, plane_name, rg)?;
        self.store.delete(&id, None).await?;
        Ok(())
    }
}

async fn get_resource_group(
    registry: web::Data<ResourceGroupRegistry>,
    path: web::Path<(String, String, String)>,
) -> Result<HttpResponse, Error> {
    let (plane_type, plane_name, rg) = path.into_inner();
    let group = registry
        .get(&plane_type, &plane_name, &rg)
        .await?
        .ok_or_else(|| Error::NotFound(format!("/planes/{plane_type}/{plane_name}/resourceGroups/{rg}")))?;
    Ok(HttpResponse::Ok().json(group))
}

async fn put_resource_group(
    registry: web::Data<ResourceGroupRegistry>,
    path: web::Path<(String, String, String)>,
    body: web::Json<ResourceGroup>,
) -> Result<HttpResponse, Error> {
    let (plane_type, plane_name, rg) = path.into_inner();
    let group = registry
        .put(&plane_type, &plane_name, &rg, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(group))
}

async fn delete_resource_group(
    registry: web::Data<ResourceGroupRegistry>,
    path: web::Path<(String, String, String)>,
) -> Result<HttpResponse, Error> {
    let (plane_type, plane_name, rg) = path.into_inner();
    registry.delete(&plane_type, &plane_name, &rg).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn configure(cfg: &mut web::ServiceConfig, registry: Arc<ResourceGroupRegistry>) {
    cfg.app_data(web::Data::from(registry)).service(
        web::resource("/planes/{planeType}/{planeName}/resourceGroups/{rg}")
            .route(web::get().to(get_resource_group))
            .route(web::put().to(put_resource_group))
            .route(web::delete().to(delete_resource_group)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let registry = ResourceGroupRegistry::new(Arc::new(MemoryStore::new()));
        registry
            .put(
                "radius",
                "local",
                "default",
                ResourceGroup {
                    id: String::new(),
                    name: String::new(),
                    tags: Default::default(),
                },
            )
            .await
            .unwrap();
        let fetched = registry.get("radius", "local", "default").await.unwrap().unwrap();
        assert_eq!(fetched.name, "default");
    }
}
