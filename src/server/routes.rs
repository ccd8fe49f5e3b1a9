use axum::{
    extract::{Path, Query, State},
    Json,
    http::StatusCode,
};
use serde::Serialize;
use serde_json::{Map, Value};
use crate::commands::{self, COMMANDS};
use crate::server::AppState;
use crate::Error;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

type ApiResult = Result<Json<Value>, (StatusCode, Json<ErrorResponse>)>;

fn api_error(err: Error) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        Error::Validation(_) | Error::InvalidUri(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Locked { .. } | Error::Timeout(_) | Error::Ipc(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::warn!(kind = err.kind(), "Request failed: {}", err);
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            kind: err.kind().to_string(),
        }),
    )
}

pub async fn list_commands() -> ApiResult {
    Ok(Json(serde_json::to_value(COMMANDS).map_err(|e| api_error(e.into()))?))
}

/// Query-string parameters arrive as strings; the command schema coerces them
pub async fn query_get(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let args = params.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
    run(state, name, args).await
}

pub async fn query_post(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(args): Json<Map<String, Value>>,
) -> ApiResult {
    run(state, name, args).await
}

async fn run(state: Arc<AppState>, name: String, args: Map<String, Value>) -> ApiResult {
    let result = tokio::task::spawn_blocking(move || commands::execute(&name, &state.context, args))
        .await
        .unwrap_or_else(|e| Err(Error::Ipc(format!("query worker failed: {}", e))));
    result.map(Json).map_err(api_error)
}

pub async fn hub_status(State(state): State<Arc<AppState>>) -> ApiResult {
    let status = state.hub.status().await.map_err(api_error)?;
    let route = state.hub.route().map_err(api_error)?;
    Ok(Json(serde_json::json!({
        "route": route,
        "status": serde_json::to_value(status).map_err(|e| api_error(e.into()))?,
    })))
}
