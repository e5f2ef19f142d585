//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::llm::{LlmClient, OpenRouterClient};
use crate::solver::Solver;

use super::auth;
use super::types::*;

/// Shared application state.
pub struct AppState {
    pub config: Arc<Config>,
    /// Runs are spawned from this solver; it is shared by all of them
    pub solver: Arc<Solver>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn reject(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse::new(message)))
}

/// Build the router. Separate from [`serve`] so tests can mount it.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/solve", post(solve))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let llm: Arc<dyn LlmClient> = Arc::new(OpenRouterClient::new(&config.llm)?);
    let solver = Arc::new(Solver::new(Arc::clone(&config), llm));

    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        solver,
    });
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for SIGINT/SIGTERM. Runs in flight are abandoned with the process.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoints: vec!["POST /solve".to_string(), "GET /health".to_string()],
    })
}

/// Accept a quiz URL and start solving it in the background.
async fn solve(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SolveRequest>, JsonRejection>,
) -> Result<Json<SolveAccepted>, ApiError> {
    let Json(req) = payload.map_err(|e| {
        tracing::debug!("Rejected solve request: {}", e);
        reject(StatusCode::BAD_REQUEST, e.body_text())
    })?;

    if !auth::secret_matches(&req.secret, &state.config.secret) {
        tracing::warn!("Solve request with invalid secret");
        return Err(reject(StatusCode::FORBIDDEN, "Invalid secret"));
    }

    if req.email != state.config.email {
        tracing::debug!(
            "Caller email {} differs from configured {}; submitting as the latter",
            req.email,
            state.config.email
        );
    }

    let run_id = Uuid::new_v4();
    tracing::info!("Accepted run {} for {}", run_id, req.url);

    let solver = Arc::clone(&state.solver);
    tokio::spawn(async move {
        solver.run(run_id, &req.url).await;
    });

    Ok(Json(SolveAccepted {
        message: "Task accepted. Solver started.".to_string(),
        run_id,
    }))
}
