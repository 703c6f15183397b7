//! HTTP surface over the finder, for a presentation layer to call

mod routes;

use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::finder::Finder;

pub struct AppState {
    pub finder: Finder,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/establishments", get(routes::api_establishments))
        .route("/api/product-codes", get(routes::api_product_codes))
        .route("/api/clearances", get(routes::api_clearances))
        .route("/api/clearances/firm", get(routes::api_firm_clearances))
        .route("/api/events/monthly", get(routes::api_monthly_events))
        .route("/api/events/yearly", get(routes::api_yearly_events))
        .route("/healthz", get(routes::healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: &Config, finder: Finder) -> Result<()> {
    let state = Arc::new(AppState { finder });
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Web server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
