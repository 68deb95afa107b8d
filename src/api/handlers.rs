//! API request handlers
//!
//! Formula work runs on the blocking pool: a calculator and its interpreter
//! are single-threaded, so each request builds its own inside the worker.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use crate::core::{translate as translate_text, FieldSurface, FormulaCalculator};
use crate::error::{FormulaError, FormulaResult};
use crate::parser::FormulaSession;
use crate::types::{EvaluationResult, FieldReference, FormulaText};

use super::server::AppState;

/// Standard API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            request_id: Uuid::new_v4().to_string(),
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            request_id: Uuid::new_v4().to_string(),
            data: None,
            error: Some(message.into()),
        }
    }
}

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

/// HTTP status for an engine error
fn status_for(err: &FormulaError) -> StatusCode {
    match err {
        FormulaError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        FormulaError::Validation(_) | FormulaError::Yaml(_) | FormulaError::Json(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn respond<T: Serialize>(result: FormulaResult<T>) -> ApiResult<T> {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::ok(data))),
        Err(e) => (status_for(&e), Json(ApiResponse::err(e.to_string()))),
    }
}

/// Run formula work on the blocking pool
async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    T: Serialize + Send + 'static,
    F: FnOnce() -> FormulaResult<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => respond(result),
        Err(e) => {
            error!("formula worker failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err("formula worker failed")),
            )
        }
    }
}

/// Root endpoint response
#[derive(Serialize)]
pub struct RootResponse {
    pub name: String,
    pub version: String,
    pub description: String,
    pub endpoints: Vec<EndpointInfo>,
}

#[derive(Serialize)]
pub struct EndpointInfo {
    pub path: String,
    pub method: String,
    pub description: String,
}

fn endpoint(method: &str, path: &str, description: &str) -> EndpointInfo {
    EndpointInfo {
        path: path.to_string(),
        method: method.to_string(),
        description: description.to_string(),
    }
}

/// GET / - Root info
pub async fn root(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = RootResponse {
        name: "calcframe API Server".to_string(),
        version: state.version.clone(),
        description: "HTTP API for evaluating custom-calculation formulas".to_string(),
        endpoints: vec![
            endpoint("GET", "/health", "Health check endpoint"),
            endpoint("GET", "/version", "Get server version"),
            endpoint("POST", "/api/v1/evaluate", "Evaluate a formula session"),
            endpoint("POST", "/api/v1/validate", "Check that a formula compiles"),
            endpoint(
                "POST",
                "/api/v1/translate",
                "Rewrite a formula between label, backend and execution form",
            ),
        ],
    };
    Json(ApiResponse::ok(response))
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_message: String,
}

/// GET /health - Health check
pub async fn health() -> impl IntoResponse {
    Json(ApiResponse::ok(HealthResponse {
        status: "healthy".to_string(),
        uptime_message: "Server is running".to_string(),
    }))
}

/// Version response
#[derive(Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub features: Vec<String>,
}

/// GET /version - Server version
pub async fn version(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ApiResponse::ok(VersionResponse {
        version: state.version.clone(),
        features: vec![
            "evaluate".to_string(),
            "validate".to_string(),
            "translate".to_string(),
        ],
    }))
}

/// Evaluate response
#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub results: EvaluationResult,
    pub execution_form: String,
    pub uses_dataframe: bool,
}

/// POST /api/v1/evaluate - Evaluate a formula session
pub async fn evaluate(
    State(state): State<Arc<AppState>>,
    Json(session): Json<FormulaSession>,
) -> impl IntoResponse {
    let defaults = state.options.clone();
    blocking(move || {
        session.validate()?;
        let options = session.options_or(&defaults);
        let formula_state = session.state();
        let frame = session.dataframe();

        let mut calculator = FormulaCalculator::with_options(options);
        let executable = calculator.validate(&formula_state)?;
        let results = calculator.evaluate(&formula_state, &frame)?;
        debug!(rows = results.len(), "evaluate request done");

        Ok(EvaluateResponse {
            results,
            execution_form: executable.text.clone(),
            uses_dataframe: executable.uses_dataframe,
        })
    })
    .await
}

/// Validate response
#[derive(Debug, Serialize, Default)]
pub struct ValidateResponse {
    pub valid: bool,
    pub message: String,
    pub referenced_fields: Vec<String>,
    pub unused_fields: Vec<String>,
}

/// POST /api/v1/validate - Check that a formula compiles
///
/// A formula that does not compile is a successful request with
/// `valid: false`; only a malformed session is an error.
pub async fn validate(Json(session): Json<FormulaSession>) -> impl IntoResponse {
    blocking(move || {
        session.validate()?;
        let state = session.state();
        let referenced = state.referenced_field_ids();
        let unused = state
            .fields()
            .iter()
            .filter(|field| !referenced.contains(&field.id))
            .map(|field| field.id.clone())
            .collect();

        let calculator = FormulaCalculator::new();
        Ok(match calculator.validate(&state) {
            Ok(_) => ValidateResponse {
                valid: true,
                message: "Formula is valid".to_string(),
                referenced_fields: referenced,
                unused_fields: unused,
            },
            Err(e) => ValidateResponse {
                valid: false,
                message: e.to_string(),
                referenced_fields: referenced,
                unused_fields: unused,
            },
        })
    })
    .await
}

fn default_surface() -> FieldSurface {
    FieldSurface::Label
}

/// Translate request
#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub formula: FormulaText,
    pub fields: Vec<FieldReference>,
    #[serde(default = "default_surface")]
    pub from: FieldSurface,
    pub to: FieldSurface,
}

/// Translate response
#[derive(Debug, Serialize)]
pub struct TranslateResponse {
    pub formula: String,
    pub from: FieldSurface,
    pub to: FieldSurface,
}

/// POST /api/v1/translate - Rewrite a formula between field spellings
pub async fn translate(Json(req): Json<TranslateRequest>) -> impl IntoResponse {
    let text = req.formula.to_source();
    respond(
        translate_text(&text, &req.fields, req.from, req.to).map(|formula| TranslateResponse {
            formula,
            from: req.from,
            to: req.to,
        }),
    )
}
