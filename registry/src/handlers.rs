use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common::{RegisteredElement, RegistrationResponse, TaskDescriptor};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::state::{AppState, Outcome, Rejection};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/v1/core-elements",
            post(register_element).get(list_elements),
        )
        .route("/api/v1/core-elements/:signature", get(get_element))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Rejection::Invalid(reason) => (StatusCode::UNPROCESSABLE_ENTITY, reason),
            Rejection::Conflict(reason) => (StatusCode::CONFLICT, reason),
            Rejection::Poisoned => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "estado interno envenenado".to_string(),
            ),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Alta de un descriptor: 201 si es nuevo, 200 si ya estaba igual
async fn register_element(
    State(state): State<AppState>,
    Json(descriptor): Json<TaskDescriptor>,
) -> Result<(StatusCode, Json<RegistrationResponse>), Rejection> {
    debug!("alta de {}", descriptor.canonical_signature());
    let (element, outcome) = state.register(descriptor)?;

    let status = match outcome {
        Outcome::Created => StatusCode::CREATED,
        Outcome::Unchanged => StatusCode::OK,
    };
    let response = RegistrationResponse {
        registration_id: element.registration_id,
        canonical_signature: element.descriptor.canonical_signature().to_string(),
        created: outcome == Outcome::Created,
    };
    Ok((status, Json(response)))
}

async fn list_elements(
    State(state): State<AppState>,
) -> Result<Json<Vec<RegisteredElement>>, Rejection> {
    Ok(Json(state.list()?))
}

async fn get_element(
    State(state): State<AppState>,
    Path(signature): Path<String>,
) -> Result<Json<RegisteredElement>, Response> {
    match state.get(&signature).map_err(IntoResponse::into_response)? {
        Some(element) => Ok(Json(element)),
        None => Err(StatusCode::NOT_FOUND.into_response()),
    }
}
