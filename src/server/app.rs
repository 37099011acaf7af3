//! HTTP server setup and configuration.

use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::config::{Config, RoutingConfig};
use crate::provider::OpenAiCompatibleClient;
use crate::router::Router as ConsensusRouter;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ConsensusRouter>,
    /// Applied to route requests that omit strategy, quorum or timeout.
    pub defaults: RoutingConfig,
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/route", post(handlers::route))
        .route("/v1/models", get(handlers::list_models))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Build the consensus router for a config: one registry seeded with
/// `[[models]]` and one OpenAI-compatible client per `[[providers]]` entry,
/// all sharing `http`.
pub fn build_router(config: &Config, http: Client) -> ConsensusRouter {
    let selector = Arc::new(config.build_selector());
    config
        .providers
        .iter()
        .fold(ConsensusRouter::new(selector), |router, provider| {
            router.with_provider(Arc::new(OpenAiCompatibleClient::new(
                provider,
                http.clone(),
            )))
        })
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    // Per-call timeouts come from the routed request, so only connect is bounded here
    let http_client = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let state = AppState {
        router: Arc::new(build_router(&config, http_client)),
        defaults: config.routing.clone(),
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(
        address = %listen_addr,
        models = config.models.len(),
        providers = config.providers.len(),
        "starting concord server"
    );

    axum::serve(listener, app).await?;

    Ok(())
}
