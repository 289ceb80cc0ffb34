use std::sync::Arc;

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::id::ResourceID;
use crate::store::ResourceStore;

/// A registered plane: `radius` (the default, handled entirely in-process)
/// or an external plane (`aws`, `azure`, `deployments`, ...) whose resource
/// operations are reverse-proxied to `url` by `proxy::ProxyRouter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plane {
    pub id: String,
    pub plane_type: String,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub is_radius_plane: bool,
}

impl Plane {
    fn key(plane_type: &str, name: &str) -> Result<ResourceID, Error> {
        format!("/planes/{plane_type}/{name}").parse()
    }
}

/// CRUD over registered planes, backed by the same `ResourceStore` as
/// tracked resources, keyed under the plane's own scope id.
pub struct PlaneRegistry {
    store: Arc<dyn ResourceStore>,
}

impl PlaneRegistry {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        PlaneRegistry { store }
    }

    pub async fn get(&self, plane_type: &str, name: &str) -> Result<Option<Plane>, Error> {
        let id = Plane::key(plane_type, name)?;
        let Some(stored) = self.store.get(&id).await? else {
            return Ok(None);
        };
        let plane = serde_json::from_value(stored.data).map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Some(plane))
    }

    pub async fn put(&self, plane_type: &str, name: &str, mut plane: Plane) -> Result<Plane, Error> {
        plane.plane_type = plane_type.to_owned();
        plane.name = name.to_owned();
        let id = Plane::key(plane_type, name)?;
        plane.id = id.to_string();
        let value = serde_json::to_value(&plane).map_err(|e| Error::Internal(e.to_string()))?;
        self.store.save(&id, value, None).await?;
        Ok(plane)
    }

    pub async fn delete(&self, plane_type: &str, name: &str) -> Result<(), Error> {
        let id = Plane::key(plane_type, name)?;
        self.store.delete(&id, None).await?;
        Ok(())
    }
}

async fn get_plane(
    registry: web::Data<PlaneRegistry>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, Error> {
    let (plane_type, name) = path.into_inner();
    let plane = registry
        .get(&plane_type, &name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("/planes/{plane_type}/{name}")))?;
    Ok(HttpResponse::Ok().json(plane))
}

async fn put_plane(
    registry: web::Data<PlaneRegistry>,
    path: web::Path<(String, String)>,
    body: web::Json<Plane>,
) -> Result<HttpResponse, Error> {
    let (plane_type, name) = path.into_inner();
    let plane = registry.put(&plane_type, &name, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(plane))
}

async fn delete_plane(
    registry: web::Data<PlaneRegistry>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, Error> {
    let (plane_type, name) = path.into_inner();
    registry.delete(&plane_type, &name).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn configure(cfg: &mut web::ServiceConfig, registry: Arc<PlaneRegistry>) {
    cfg.app_data(web::Data::from(registry)).service(
        web::resource("/planes/{planeType}/{name}")
            .route(web::get().to(get_plane))
            .route(web::put().to(put_plane))
            .route(web::delete().to(delete_plane)),
    );
}
