//! Axum server setup and router construction.

use std::net::SocketAddr;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::api::{self, ProxyState};
use crate::forward;

/// Build the full axum router.
///
/// Control endpoints live under `/_snip/`; every other request falls through
/// to the forwarder.
pub fn build_router(state: ProxyState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/_snip/tool", get(api::get_tool))
        .route("/_snip/sessions/{id}", get(api::get_session))
        .route("/_snip/sessions/{id}/idle", post(api::post_idle))
        .route("/_snip/sessions/{id}/prune", post(api::post_prune))
        .fallback(forward::forward)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Bind, serve in the background and return the bound address.
pub async fn start_server(router: Router, bind_addr: SocketAddr) -> std::io::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("Proxy server stopped: {e}");
        }
    });

    Ok(addr)
}
