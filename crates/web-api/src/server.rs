use crate::{auth, handlers};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tradepilot_orchestrator::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub api_key: Option<String>,
}

pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    #[must_use]
    pub const fn new(orchestrator: Orchestrator, api_key: Option<String>) -> Self {
        Self {
            state: AppState {
                orchestrator,
                api_key,
            },
        }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let guarded = Router::new()
            .route("/run", post(handlers::run))
            .route("/status/:job_id", get(handlers::status))
            .route("/current", get(handlers::current))
            .route("/history", get(handlers::history))
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth::require_api_key,
            ));

        let orchestrator = guarded.route("/health", get(handlers::health));

        Router::new()
            .nest("/api/orchestrator", orchestrator)
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Starts the web server listening on the specified address.
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the address or serve requests.
    pub async fn serve(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Web API listening on {}", addr);

        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}
