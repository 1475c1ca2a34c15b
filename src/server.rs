//! HTTP server for the interpolation pipeline.
//!
//! A thin JSON layer over the [`Orchestrator`]: request parsing and date
//! validation happen here, everything else is the pipeline's job. The
//! pipeline itself never errors past its boundary, so the only error
//! responses this layer produces are for malformed requests.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/interpolate` | Generate a diary passage for a date |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid date: 2025-13-01" } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser
//! clients.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::models::{InterpolationRequest, InterpolationResponse};
use crate::orchestrator::Orchestrator;

/// Shared application state passed to route handlers.
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

/// Start the HTTP server on `bind_addr`.
///
/// Runs until the process is terminated.
pub async fn run_server(bind_addr: &str, orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
    let state = AppState { orchestrator };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/interpolate", post(handle_interpolate))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("interpolation server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Handler for `GET /health`.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /interpolate ============

/// Handler for `POST /interpolate`.
///
/// Rejects dates that do not parse as `YYYY-MM-DD` with a 400; the
/// pipeline handles every other failure mode internally and always
/// returns a well-formed response.
async fn handle_interpolate(
    State(state): State<AppState>,
    Json(request): Json<InterpolationRequest>,
) -> Result<Json<InterpolationResponse>, AppError> {
    if NaiveDate::parse_from_str(&request.date, "%Y-%m-%d").is_err() {
        return Err(bad_request(format!("invalid date: {}", request.date)));
    }

    let response = state.orchestrator.interpolate(&request).await;
    Ok(Json(response))
}
