//! Object endpoint routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use ferry_engine::Record;
use serde_json::Value;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{
    handle_create, handle_delete, handle_retrieve, handle_update, CreateResponse, RetrieveQuery,
};
use crate::AppState;

/// Create object routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/objects/{entity_type}", post(create_handler))
        .route(
            "/objects/{entity_type}/{id}",
            get(retrieve_handler)
                .patch(update_handler)
                .delete(delete_handler),
        )
}

/// POST /objects/{type}
async fn create_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(entity_type): Path<String>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<CreateResponse>)> {
    tracing::debug!(anonymous = auth.is_anonymous(), %entity_type, "create");
    let response = handle_create(&state.objects, &entity_type, body)?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /objects/{type}/{id}
async fn retrieve_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((entity_type, id)): Path<(String, String)>,
    Query(query): Query<RetrieveQuery>,
) -> Result<Json<Record>> {
    let object = handle_retrieve(&state.objects, &entity_type, &id, &query)?;
    Ok(Json(object))
}

/// PATCH /objects/{type}/{id}
async fn update_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((entity_type, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<StatusCode> {
    handle_update(&state.objects, &entity_type, &id, body)?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /objects/{type}/{id}
async fn delete_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((entity_type, id)): Path<(String, String)>,
) -> Result<StatusCode> {
    handle_delete(&state.objects, &entity_type, &id)?;
    Ok(StatusCode::NO_CONTENT)
}
