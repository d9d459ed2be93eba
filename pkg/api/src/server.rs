use axum::{
    Router, middleware,
    routing::{delete, get, post, put},
};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use crate::AppState;
use crate::handlers::{ledger, nodes, quotas, subnamespaces, tenants, watch};
use crate::request_id::request_id_middleware;

/// Operator API routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Tenants and their ledgers
        .route(
            "/api/v1/tenants",
            post(tenants::create_tenant).get(tenants::list_tenants),
        )
        .route("/api/v1/tenants/{tenant}/enabled", put(tenants::set_enabled))
        .route("/api/v1/tenants/{tenant}/tune", post(tenants::tune_tenant))
        .route("/api/v1/tenants/{tenant}/ledger", get(ledger::get_ledger))
        .route("/api/v1/tenants/{tenant}/ledger/claims", post(ledger::put_claim))
        .route("/api/v1/tenants/{tenant}/ledger/drops", post(ledger::put_drop))
        .route(
            "/api/v1/tenants/{tenant}/ledger/claims/{name}",
            delete(ledger::delete_claim),
        )
        .route(
            "/api/v1/tenants/{tenant}/ledger/drops/{name}",
            delete(ledger::delete_drop),
        )
        // Sub-namespaces and quotas
        .route(
            "/api/v1/namespaces/{ns}/subnamespaces",
            post(subnamespaces::create_subnamespace).get(subnamespaces::list_subnamespaces),
        )
        .route(
            "/api/v1/namespaces/{ns}/subnamespaces/{name}",
            put(subnamespaces::update_subnamespace).delete(subnamespaces::delete_subnamespace_handler),
        )
        .route(
            "/api/v1/namespaces/{ns}/subnamespaces/{name}/admit",
            post(subnamespaces::admit_subnamespace),
        )
        .route("/api/v1/namespaces/{ns}/resourcequotas", get(quotas::list_quotas))
        // Nodes
        .route("/api/v1/nodes", get(nodes::list_nodes))
        .route("/api/v1/nodes/{name}", put(nodes::put_node))
        // Watch stream
        .route("/api/v1/watch", get(watch::watch_events))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Serve the API on `addr` until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);
    info!("Starting API server on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    info!("API server stopped");
    Ok(())
}
