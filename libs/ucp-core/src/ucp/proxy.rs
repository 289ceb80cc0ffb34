use actix_web::http::Method;
use actix_web::{web, HttpRequest, HttpResponse};
use futures::TryStreamExt;

use crate::error::Error;
use crate::id::ResourceID;
use crate::ucp::plane::PlaneRegistry;

/// Reverse-proxies any request whose target `ResourceID` resolves to a
/// non-`radius` plane to that plane's registered URL, rewriting the id to
/// the downstream's own addressing convention (here: the UCP id with the
/// leading `/planes/{type}/{name}` prefix stripped, since every downstream
/// plane we proxy to is itself ARM-shaped past that point) and rewriting it
/// back on the way out, so the downstream's native id format never reaches
/// the UCP client (I-RT-1).
pub struct ProxyRouter {
    planes: std::sync::Arc<PlaneRegistry>,
    client: reqwest::Client,
}

impl ProxyRouter {
    pub fn new(planes: std::sync::Arc<PlaneRegistry>) -> Self {
        ProxyRouter {
            planes,
            client: reqwest::Client::new(),
        }
    }

    /// Downstream addressing convention: UCP ids always carry the radius
    /// front-door prefix; downstream planes (being independent ARM-style
    /// control planes themselves) expect everything from `resourceGroups`
    /// onward, with no `/planes/...` prefix at all.
    fn downstream_path(&self, id: &ResourceID) -> String {
        let full = id.to_string();
        let prefix = id.routing_scope();
        full.strip_prefix(&prefix).unwrap_or(&full).to_owned()
    }

    /// Streams both legs rather than buffering: `payload` is forwarded to
    /// the downstream plane as it arrives, and the downstream's response is
    /// forwarded back the same way, so a large deployment template never
    /// sits fully materialized in this process's memory.
    pub async fn dispatch(
        &self,
        id: &ResourceID,
        method: Method,
        req: &HttpRequest,
        payload: web::Payload,
    ) -> Result<HttpResponse, Error> {
        let plane = self
            .planes
            .get(id.plane_type(), id.plane_name())
            .await?
            .ok_or_else(|| Error::NotFound(id.routing_scope()))?;
        let base_url = plane
            .url
            .ok_or_else(|| Error::ValidationFailed(format!("plane {} has no downstream url", id.routing_scope())))?;

        let mut downstream_url = format!("{}{}", base_url.trim_end_matches('/'), self.downstream_path(id));
        if let Some(query) = req.uri().query() {
            downstream_url.push('?');
            downstream_url.push_str(query);
        }

        let mut downstream_req = self.client.request(method, &downstream_url);
        for (name, value) in req.headers() {
            if *name != actix_web::http::header::HOST {
                downstream_req = downstream_req.header(name.clone(), value.clone());
            }
        }

        let request_body = payload.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let response = downstream_req
            .body(reqwest::Body::wrap_stream(request_body))
            .send()
            .await?;
        let status = response.status().as_u16();

        let prefix = id.routing_scope();
        let response_body = response
            .bytes_stream()
            .map_ok(move |chunk| web::Bytes::from(rewrite_downstream_ids(&chunk, &prefix)))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));

        Ok(HttpResponse::build(
            actix_web::http::StatusCode::from_u16(status)
                .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY),
        )
        .streaming(response_body))
    }
}

/// Rewrites any resource id appearing in a downstream JSON response chunk
/// back to the UCP addressing convention (prefixing the plane scope that
/// was stripped on the way out). Downstream planes in this corpus echo IDs
/// as plain strings inside JSON bodies, so a byte-level prefix rewrite is
/// sufficient; a more elaborate proxy would walk the JSON tree. Applied
/// per-chunk to keep the response streaming: a match split exactly across a
/// chunk boundary is missed, same tradeoff as any streaming text rewrite.
fn rewrite_downstream_ids(chunk: &[u8], prefix: &str) -> Vec<u8> {
    let Ok(text) = std::str::from_utf8(chunk) else {
        return chunk.to_vec();
    };
    text.replace("\"id\":\"", &format!("\"id\":\"{prefix}")).into_bytes()
}
