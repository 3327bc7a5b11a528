//! Router construction and request handlers.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::ServerContext;
use crate::error::AppError;
use crate::streaming::serve_asset;

const INDEX_PAGE: &str = "index.html";

/// Build the complete axum router.
///
/// Every route is registered with `get`, which also answers `HEAD`; any
/// other method gets `405 Method Not Allowed`.
pub fn build_router(ctx: ServerContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/{*path}", get(asset))
        .layer(CatchPanicLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// GET /{*path}
///
/// The wildcard arrives percent-decoded, so `%2E%2E` is seen as `..` and
/// rejected by the resolver.
async fn asset(
    State(ctx): State<ServerContext>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let asset = ctx.assets.lookup(&path)?;
    Ok(serve_asset(&asset, &headers).await?)
}

/// GET /
///
/// A player page if one was placed in the root, otherwise the manifest.
async fn index(State(ctx): State<ServerContext>, headers: HeaderMap) -> Result<Response, AppError> {
    let asset = match ctx.assets.lookup(INDEX_PAGE) {
        Ok(page) => page,
        Err(vc_core::Error::NotFound { .. }) => ctx.assets.lookup(&ctx.manifest_name)?,
        Err(e) => return Err(e.into()),
    };
    Ok(serve_asset(&asset, &headers).await?)
}
