use axum::{routing::get, Router};

/// Liveness endpoint for the hosting platform's health probe. Not part of
/// the bot's logic.
pub async fn start_health_server() {
    let port = std::env::var("PORT")
        .ok()
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(10000);
    let app = Router::new().route("/healthz", get(|| async { "ok" }));
    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(err) => {
            log::error!("Failed to bind health endpoint on port {port}: {err}");
            return;
        }
    };
    log::info!("Health endpoint listening on port {port}");
    if let Err(err) = axum::serve(listener, app).await {
        log::error!("Health endpoint server error: {err}");
    }
}
