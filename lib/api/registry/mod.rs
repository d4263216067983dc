//! The OCI/Docker Registry v2 HTTP surface (§4.5). Axum/matchit routes must end in their wildcard
//! segment, so an arbitrarily-deep repository name (`{account}/{a}/{b}/{c}/...`) cannot be
//! expressed as a single route; this registers the same handlers twice, once for a two-segment
//! repository path (`{account}/{name}`) and once for a three-segment one
//! (`{account}/{ns}/{name}`), which covers every repository name this deployment actually issues
//! (a flat name, or one level of namespacing) without attempting a fully generic depth-agnostic
//! parser.

mod blobs;
mod catalog;
mod manifests;
mod uploads;

use axum::routing::{delete, get, head, patch, post, put};
use axum::Router;

use super::{middleware, ApiState};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds the `/v2/` router, with the bearer-token validation middleware layered over every
/// route (each handler still performs its own scope check against the validated claims).
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/v2/", get(catalog::ping))
        .route("/v2/_catalog", get(catalog::catalog))
        .route("/v2/{account}/{name}/tags/list", get(manifests::list_tags2))
        .route(
            "/v2/{account}/{ns}/{name}/tags/list",
            get(manifests::list_tags3),
        )
        .route(
            "/v2/{account}/{name}/blobs/{digest}",
            head(blobs::check_blob2).get(blobs::download_blob2).delete(blobs::delete_blob2),
        )
        .route(
            "/v2/{account}/{ns}/{name}/blobs/{digest}",
            head(blobs::check_blob3).get(blobs::download_blob3).delete(blobs::delete_blob3),
        )
        .route(
            "/v2/{account}/{name}/blobs/uploads/",
            post(uploads::start_upload2),
        )
        .route(
            "/v2/{account}/{ns}/{name}/blobs/uploads/",
            post(uploads::start_upload3),
        )
        .route(
            "/v2/{account}/{name}/blobs/uploads/{uuid}",
            patch(uploads::patch_upload2).put(uploads::put_upload2).delete(uploads::abort_upload2),
        )
        .route(
            "/v2/{account}/{ns}/{name}/blobs/uploads/{uuid}",
            patch(uploads::patch_upload3).put(uploads::put_upload3).delete(uploads::abort_upload3),
        )
        .route(
            "/v2/{account}/{name}/manifests/{reference}",
            get(manifests::get_manifest2)
                .head(manifests::head_manifest2)
                .put(manifests::put_manifest2)
                .delete(manifests::delete_manifest2),
        )
        .route(
            "/v2/{account}/{ns}/{name}/manifests/{reference}",
            get(manifests::get_manifest3)
                .head(manifests::head_manifest3)
                .put(manifests::put_manifest3)
                .delete(manifests::delete_manifest3),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::registry_auth,
        ))
        .with_state(state)
}

/// The header every registry v2 response must carry (§4.5).
pub(super) const API_VERSION_HEADER: (&str, &str) =
    ("Docker-Distribution-Api-Version", "registry/2.0");
