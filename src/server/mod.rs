mod handlers;
mod state;

use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub use state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/nearest", get(handlers::nearest))
        .route("/api/detect", get(handlers::detect))
        .route("/api/districts", get(handlers::district_list))
        .route("/api/items", get(handlers::items))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

pub async fn start(host: &str, port: u16, state: AppState) {
    let app = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            eprintln!("Error: Cannot bind to {}: {}", addr, e);
            std::process::exit(1);
        });

    tracing::info!("JiranLink server listening on http://{}", addr);
    eprintln!("  Press Ctrl+C to stop.");

    axum::serve(listener, app)
        .await
        .unwrap_or_else(|e| {
            eprintln!("Server error: {}", e);
            std::process::exit(1);
        });
}
