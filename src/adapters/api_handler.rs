//! REST API for capability discovery, registration and execution

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::domain::{
    AgentComposition, CapabilityInterface, CompositionSummary, ExecutionSnapshot, Payload,
    WorkflowDefinition, WorkflowSummary,
};
use crate::orchestration::{Engine, EngineError};

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Engine>,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            details: Vec::new(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            details: Vec::new(),
        }
    }
}

/// Engine errors mapped onto HTTP statuses
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::WorkflowNotFound(_)
            | EngineError::CompositionNotFound(_)
            | EngineError::ExecutionNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut body = ApiResponse::<()>::error(self.0.to_string());
        if let EngineError::Validation(errors) = &self.0 {
            body.error = Some("Validation failed".to_string());
            body.details = errors.iter().map(|e| e.to_string()).collect();
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

fn not_found<T>(what: &str) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::NOT_FOUND, Json(ApiResponse::error(format!("{} not found", what))))
}

/// Comma-separated query values, empty entries dropped
fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

// ============================================================================
// Capabilities
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CapabilityQuery {
    pub capability: Option<String>,
    pub tags: Option<String>,
}

/// GET /api/capabilities?capability=&tags=a,b
pub async fn list_capabilities(
    State(state): State<ApiState>,
    Query(query): Query<CapabilityQuery>,
) -> impl IntoResponse {
    let tags = split_list(query.tags.as_deref());
    let tags = (!tags.is_empty()).then_some(tags.as_slice());

    let interfaces = match &query.capability {
        Some(capability) => state.engine.directory.find_by_capability(capability, tags).await,
        None => {
            let all = state.engine.directory.list().await;
            match tags {
                Some(tags) => all.into_iter().filter(|i| i.shares_tag(tags)).collect(),
                None => all,
            }
        }
    };
    (StatusCode::OK, Json(ApiResponse::success(interfaces)))
}

/// POST /api/capabilities
pub async fn register_capability(
    State(state): State<ApiState>,
    Json(interface): Json<CapabilityInterface>,
) -> impl IntoResponse {
    if interface.agent_id.is_empty() || interface.capabilities.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("agent_id and at least one capability are required")),
        );
    }
    state.engine.register_capability(interface.clone()).await;
    (StatusCode::CREATED, Json(ApiResponse::success(interface)))
}

/// GET /api/capabilities/:agent_id
pub async fn get_capability(
    State(state): State<ApiState>,
    Path(agent_id): Path<String>,
) -> impl IntoResponse {
    match state.engine.directory.lookup(&agent_id).await {
        Some(interface) => (StatusCode::OK, Json(ApiResponse::success(interface))),
        None => not_found("Agent"),
    }
}

#[derive(Debug, Deserialize)]
pub struct CompatibleQuery {
    pub capabilities: Option<String>,
    pub tags: Option<String>,
}

/// GET /api/agents/compatible?capabilities=a,b&tags=c
pub async fn find_compatible_agents(
    State(state): State<ApiState>,
    Query(query): Query<CompatibleQuery>,
) -> impl IntoResponse {
    let capabilities = split_list(query.capabilities.as_deref());
    let tags = split_list(query.tags.as_deref());
    let tags = (!tags.is_empty()).then_some(tags.as_slice());
    let agents = state
        .engine
        .compositions
        .find_compatible_agents(&capabilities, tags)
        .await;
    (StatusCode::OK, Json(ApiResponse::success(agents)))
}

// ============================================================================
// Workflows and compositions
// ============================================================================

/// GET /api/workflows
pub async fn list_workflows(State(state): State<ApiState>) -> impl IntoResponse {
    let workflows: Vec<WorkflowSummary> = state.engine.orchestrator.list_workflows().await;
    (StatusCode::OK, Json(ApiResponse::success(workflows)))
}

/// POST /api/workflows
pub async fn register_workflow(
    State(state): State<ApiState>,
    Json(definition): Json<WorkflowDefinition>,
) -> ApiResult<WorkflowSummary> {
    let summary = WorkflowSummary::from(&definition);
    state.engine.orchestrator.register_workflow(definition).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(summary))))
}

/// GET /api/workflows/:id
pub async fn get_workflow(
    State(state): State<ApiState>,
    Path(workflow_id): Path<String>,
) -> impl IntoResponse {
    match state.engine.orchestrator.get_workflow(&workflow_id).await {
        Some(definition) => (StatusCode::OK, Json(ApiResponse::success(definition.as_ref().clone()))),
        None => not_found("Workflow"),
    }
}

/// GET /api/compositions
pub async fn list_compositions(State(state): State<ApiState>) -> impl IntoResponse {
    let compositions: Vec<CompositionSummary> = state.engine.compositions.list_compositions().await;
    (StatusCode::OK, Json(ApiResponse::success(compositions)))
}

/// POST /api/compositions
pub async fn register_composition(
    State(state): State<ApiState>,
    Json(composition): Json<AgentComposition>,
) -> ApiResult<CompositionSummary> {
    let summary = CompositionSummary::from(&composition);
    state.engine.compositions.register_composition(composition).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(summary))))
}

/// GET /api/compositions/:id
pub async fn get_composition(
    State(state): State<ApiState>,
    Path(composition_id): Path<String>,
) -> impl IntoResponse {
    match state.engine.compositions.get_composition(&composition_id).await {
        Some(composition) => (StatusCode::OK, Json(ApiResponse::success(composition.as_ref().clone()))),
        None => not_found("Composition"),
    }
}

// ============================================================================
// Execution
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub input: Payload,
    /// Caller context handed to every workflow step as `user_context`
    #[serde(default)]
    pub context: Option<Value>,
    /// Block until the execution settles; otherwise answer 202 with its id
    #[serde(default = "default_wait")]
    pub wait: bool,
}

fn default_wait() -> bool {
    true
}

/// POST /api/workflows/:id/execute
pub async fn execute_workflow(
    State(state): State<ApiState>,
    Path(workflow_id): Path<String>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Response, ApiError> {
    let orchestrator = &state.engine.orchestrator;
    if request.wait {
        let execution = orchestrator
            .execute_workflow(&workflow_id, request.input, request.context)
            .await?;
        let snapshot = ExecutionSnapshot::Workflow(execution);
        return Ok((StatusCode::OK, Json(ApiResponse::success(snapshot))).into_response());
    }

    let (execution_id, _) = orchestrator
        .spawn_workflow(&workflow_id, request.input, request.context)
        .await?;
    Ok(accepted(execution_id))
}

/// POST /api/compositions/:id/execute
pub async fn execute_composition(
    State(state): State<ApiState>,
    Path(composition_id): Path<String>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Response, ApiError> {
    let compositions = &state.engine.compositions;
    if request.wait {
        let execution = compositions
            .execute_composition(&composition_id, request.input)
            .await?;
        let snapshot = ExecutionSnapshot::Composition(execution);
        return Ok((StatusCode::OK, Json(ApiResponse::success(snapshot))).into_response());
    }

    let (execution_id, _) = compositions
        .spawn_composition(&composition_id, request.input)
        .await?;
    Ok(accepted(execution_id))
}

fn accepted(execution_id: String) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(json!({"execution_id": execution_id}))),
    )
        .into_response()
}

/// GET /api/executions/:id
pub async fn get_execution(
    State(state): State<ApiState>,
    Path(execution_id): Path<String>,
) -> impl IntoResponse {
    match state.engine.get_execution_status(&execution_id).await {
        Some(snapshot) => (StatusCode::OK, Json(ApiResponse::success(snapshot))),
        None => not_found("Execution"),
    }
}

/// POST /api/executions/:id/cancel
pub async fn cancel_execution(
    State(state): State<ApiState>,
    Path(execution_id): Path<String>,
) -> ApiResult<Value> {
    let cancelled = state.engine.cancel_execution(&execution_id).await?;
    Ok((
        StatusCode::OK,
        Json(ApiResponse::success(json!({"execution_id": execution_id, "cancelled": cancelled}))),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(Some("a, b,,c ")), vec!["a", "b", "c"]);
        assert!(split_list(None).is_empty());
    }

    #[test]
    fn test_validation_maps_to_bad_request() {
        let error = ApiError(EngineError::Validation(vec![
            crate::config::validator::ValidationError::Cycle(vec!["a".into(), "b".into(), "a".into()]),
        ]));
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);

        let error = ApiError(EngineError::ExecutionNotFound("x".into()));
        assert_eq!(error.into_response().status(), StatusCode::NOT_FOUND);
    }
}
