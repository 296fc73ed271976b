//! Request handlers. GET and POST only differ in where parameters come from;
//! both hand a [`ParameterSet`] to the same bridge.

use axum::{
    body::Bytes,
    extract::{
        rejection::{PathRejection, QueryRejection},
        Extension, Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};
use tracing::error;

use super::{
    access::ClientAddr,
    error::{self, ApiError},
    AppState,
};
use crate::bridge::ParameterSet;
use crate::metrics;

/// `GET /backup-validator/{script_name}`: parameters from the query string.
pub async fn run_get(
    State(state): State<AppState>,
    script_name: Result<Path<String>, PathRejection>,
    Extension(ClientAddr(caller)): Extension<ClientAddr>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Response, ApiError> {
    let script_name = script_name_from(script_name)?;
    let Query(pairs) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let params: ParameterSet = pairs.into_iter().collect();
    run(&state, &script_name, params, caller).await
}

/// `POST /backup-validator/{script_name}`: parameters from a JSON object body.
pub async fn run_post(
    State(state): State<AppState>,
    script_name: Result<Path<String>, PathRejection>,
    Extension(ClientAddr(caller)): Extension<ClientAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let script_name = script_name_from(script_name)?;
    let params = params_from_json(&headers, &body)?;
    run(&state, &script_name, params, caller).await
}

fn script_name_from(path: Result<Path<String>, PathRejection>) -> Result<String, ApiError> {
    path.map(|Path(name)| name)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

async fn run(
    state: &AppState,
    script_name: &str,
    params: ParameterSet,
    caller: std::net::IpAddr,
) -> Result<Response, ApiError> {
    let message = state.bridge.execute(script_name, &params, caller).await?;
    Ok(error::success(message))
}

/// Decode a POST body into parameters.
///
/// String values pass through as-is, `null` becomes an empty string and any
/// other value is rendered as compact JSON.
pub fn params_from_json(headers: &HeaderMap, body: &[u8]) -> Result<ParameterSet, ApiError> {
    if !is_json_content_type(headers) {
        return Err(ApiError::UnsupportedMediaType(
            "Expected request with `Content-Type: application/json`".to_string(),
        ));
    }

    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?;

    let Value::Object(fields) = value else {
        return Err(ApiError::BadRequest(
            "Request body must be a JSON object".to_string(),
        ));
    };

    Ok(fields
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (name, value)
        })
        .collect())
}

fn is_json_content_type(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };

    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    essence == "application/json"
        || (essence.starts_with("application/") && essence.ends_with("+json"))
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Metrics endpoint handler
pub async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}
