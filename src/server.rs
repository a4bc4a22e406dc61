//! Library server: answers retrieval requests from one configured backend.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/` | Retrieval request, see [`protocol`](crate::protocol) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Every error is `{ "error": "<message>" }` with:
//!
//! | Status | When |
//! |--------|------|
//! | 400 | malformed JSON, version/model mismatch, both or neither query mode, bad embedding |
//! | 502 | backend credentials missing or rejected |
//! | 500 | any other backend failure |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser clients can
//! query a library directly.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use polymath_core::backend::Backend;
use polymath_core::models::{LibraryFile, CURRENT_VERSION};
use polymath_core::query::query_library;
use polymath_core::{Library, PolymathError};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::backends;
use crate::config::Config;
use crate::protocol::{ErrorResponse, RetrievalRequest};

#[derive(Clone)]
struct AppState {
    backend: Arc<dyn Backend>,
    /// Empty library carrying the served embedding model and dimensions.
    template: Arc<Library>,
}

/// Serve the configured backend on `[server].bind` until the process ends.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let backend = backends::open_backend(config).await?.into_backend();
    let app = router(Arc::from(backend), config.library.empty_library());

    let bind_addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(
        backend = %config.library.backend,
        model = %config.library.embedding_model,
        "library server listening on http://{}",
        bind_addr
    );
    println!("Library server listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Routes for a library server over `backend`.
///
/// `template` is an empty [`Library`] whose embedding model requests must
/// match.
pub fn router(backend: Arc<dyn Backend>, template: Library) -> Router {
    let state = AppState {
        backend,
        template: Arc::new(template),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", post(handle_retrieval))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

impl From<PolymathError> for AppError {
    fn from(err: PolymathError) -> Self {
        let status = match &err {
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            PolymathError::BackendAuth(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<PolymathError>() {
            Some(e) => e.clone().into(),
            None => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: format!("{:#}", err),
            },
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: CURRENT_VERSION.to_string(),
    })
}

// ============ POST / ============

async fn handle_retrieval(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<LibraryFile>, AppError> {
    let request: RetrievalRequest = serde_json::from_slice(&body)
        .map_err(|e| bad_request(format!("invalid request body: {}", e)))?;
    let query = request.to_query(state.template.embedding_model())?;

    let result = query_library(state.backend.as_ref(), &query, (*state.template).clone()).await;
    let mut library = match result {
        Ok(library) => library,
        Err(e) => {
            warn!(error = %format!("{:#}", e), "retrieval failed");
            return Err(e.into());
        }
    };
    library.truncate_to_token_budget(request.count);

    info!(
        sort = ?query.sort,
        bits = library.len(),
        tokens = library.total_tokens(),
        "answered retrieval request"
    );
    Ok(Json(library.to_payload()))
}
