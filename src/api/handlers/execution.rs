use crate::api::dto::execution::{
    ExecutionResponse, ExecutionsListResponse, LogEntryResponse, LogsQuery, StartExecutionRequest,
};
use crate::api::routes::AppState;
use crate::error::{AppError, Result};
use crate::models::LogKind;
use crate::services::notification_hub::ConsoleOutput;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

pub async fn start_execution(
    State(state): State<AppState>,
    body: Option<Json<StartExecutionRequest>>,
) -> Result<(StatusCode, Json<ExecutionResponse>)> {
    let Json(req) = body.unwrap_or_default();

    let execution = state
        .execution_service
        .start_execution(req.script_name.as_deref(), req.parameters)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ExecutionResponse::from(execution))))
}

pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionResponse>> {
    let execution = state.execution_service.get_execution(&id).await?;
    Ok(Json(ExecutionResponse::from(execution)))
}

pub async fn list_executions(State(state): State<AppState>) -> Result<Json<ExecutionsListResponse>> {
    let executions = state.execution_service.list_executions().await?;
    let response = ExecutionsListResponse {
        data: executions
            .into_iter()
            .map(ExecutionResponse::from)
            .collect(),
    };
    Ok(Json(response))
}

pub async fn console_output(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ConsoleOutput>>> {
    let output = state.execution_service.console_output(&id).await?;
    Ok(Json(output))
}

pub async fn list_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<LogEntryResponse>>> {
    let kind = match query.kind.as_deref() {
        Some(raw) => Some(
            LogKind::parse(raw)
                .ok_or_else(|| AppError::Validation(format!("Unknown log kind: {}", raw)))?,
        ),
        None => None,
    };

    let logs = state.execution_service.logs(&id, kind).await?;
    Ok(Json(logs.into_iter().map(LogEntryResponse::from).collect()))
}
