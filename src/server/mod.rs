//! Read-only HTTP query API

use axum::{
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use crate::commands::CommandContext;
use crate::hub::HubRouter;

pub mod routes;

/// Server state
pub struct AppState {
    pub context: CommandContext,
    pub hub: HubRouter,
}

impl AppState {
    pub fn new(context: CommandContext, hub: HubRouter) -> Self {
        Self { context, hub }
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/commands", get(routes::list_commands))
        .route("/query/{name}", get(routes::query_get).post(routes::query_post))
        .route("/hub/status", get(routes::hub_status))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(port: u16, state: AppState) -> anyhow::Result<()> {
    let app = app(Arc::new(state));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!(%addr, "Starting HTTP query server");
    println!("🌍 Query API running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("HTTP query server stopped");
    Ok(())
}
