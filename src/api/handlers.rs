//! Request handlers and error replies

use crate::agents::{AgentConfigPatch, NewAgentConfig};
use crate::api::routes::ListConfigsQuery;
use crate::api::AppState;
use crate::error::{sanitize_error_message, ErrorCode, ErrorDetails, ErrorMessage, PipelineError};
use crate::llm::provider::LlmProvider;
use crate::observability::metrics::metrics;
use crate::pipeline::GenerationRequest;
use serde::Serialize;
use std::convert::Infallible;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, warn};
use uuid::Uuid;
use warp::http::StatusCode;
use warp::reply::{json, with_status, Response};
use warp::{Rejection, Reply};

type HandlerResult = Result<Response, Infallible>;

/// Upper bound on the provider check behind `GET /health`
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub task_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub canceled: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy`, or `degraded` when the LLM provider check fails
    pub status: &'static str,
    pub service_id: String,
    pub llm: DependencyCheck,
    pub active_tasks: usize,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct DependencyCheck {
    pub name: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn reply_json<T: Serialize>(body: &T, status: StatusCode) -> Response {
    with_status(json(body), status).into_response()
}

/// JSON error envelope for a pipeline error
pub fn error_reply(err: &PipelineError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(error = %err, "Request failed");
    } else {
        debug!(error = %err, "Request rejected");
    }
    reply_json(&err.to_error_message(), status)
}

fn respond<T: Serialize>(result: Result<T, PipelineError>, status: StatusCode) -> HandlerResult {
    Ok(match result {
        Ok(body) => reply_json(&body, status),
        Err(e) => error_reply(&e),
    })
}

pub async fn create_config(state: AppState, body: NewAgentConfig) -> HandlerResult {
    respond(state.resolver.create(body).await, StatusCode::CREATED)
}

pub async fn list_configs(state: AppState, query: ListConfigsQuery) -> HandlerResult {
    respond(
        state
            .resolver
            .list(&query.workspace_id, query.agent_type)
            .await,
        StatusCode::OK,
    )
}

pub async fn get_config(id: Uuid, state: AppState) -> HandlerResult {
    respond(state.resolver.get(id).await, StatusCode::OK)
}

pub async fn update_config(id: Uuid, state: AppState, patch: AgentConfigPatch) -> HandlerResult {
    respond(state.resolver.update(id, patch).await, StatusCode::OK)
}

pub async fn delete_config(id: Uuid, state: AppState) -> HandlerResult {
    Ok(match state.resolver.delete(id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_reply(&e),
    })
}

pub async fn submit_generation(state: AppState, request: GenerationRequest) -> HandlerResult {
    respond(
        state
            .orchestrator
            .submit(request)
            .await
            .map(|task_id| SubmitResponse { task_id }),
        StatusCode::ACCEPTED,
    )
}

pub async fn generation_status(id: Uuid, state: AppState) -> HandlerResult {
    respond(state.poller.get_status(id).await, StatusCode::OK)
}

pub async fn cancel_generation(id: Uuid, state: AppState) -> HandlerResult {
    respond(
        state
            .orchestrator
            .cancel(id)
            .await
            .map(|canceled| CancelResponse { canceled }),
        StatusCode::ACCEPTED,
    )
}

pub async fn health(state: AppState) -> HandlerResult {
    let llm = check_llm(state.llm.as_ref()).await;
    let (status, code) = if llm.status == "healthy" {
        ("healthy", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };

    let response = HealthResponse {
        status,
        service_id: state.service_id.clone(),
        llm,
        active_tasks: state.orchestrator.active_tasks(),
        timestamp: current_timestamp(),
    };
    Ok(reply_json(&response, code))
}

async fn check_llm(provider: &dyn LlmProvider) -> DependencyCheck {
    let outcome = tokio::time::timeout(HEALTH_CHECK_TIMEOUT, provider.health_check()).await;
    let message = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(sanitize_error_message(&e.to_string())),
        Err(_) => Some(format!("no answer within {HEALTH_CHECK_TIMEOUT:?}")),
    };
    if let Some(message) = &message {
        warn!(provider = provider.name(), error = %message, "LLM health check failed");
    }

    DependencyCheck {
        name: provider.name().to_string(),
        status: if message.is_none() { "healthy" } else { "unhealthy" },
        message,
    }
}

pub async fn metrics_snapshot() -> HandlerResult {
    Ok(reply_json(&metrics().get_metrics(), StatusCode::OK))
}

/// Map warp rejections to the same error envelope as handler errors
pub async fn handle_rejection(err: Rejection) -> HandlerResult {
    let (status, code, message) = if err.is_not_found() {
        (
            StatusCode::NOT_FOUND,
            ErrorCode::NotFound,
            "route not found".to_string(),
        )
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (
            StatusCode::BAD_REQUEST,
            ErrorCode::ValidationError,
            format!("invalid request body: {e}"),
        )
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (
            StatusCode::BAD_REQUEST,
            ErrorCode::ValidationError,
            format!("{e}; workspace_id is required"),
        )
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::ValidationError,
            "request body too large".to_string(),
        )
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorCode::ValidationError,
            "expected application/json".to_string(),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            ErrorCode::ValidationError,
            "method not allowed".to_string(),
        )
    } else {
        error!(rejection = ?err, "Unhandled rejection");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InternalError,
            "internal server error".to_string(),
        )
    };

    let body = ErrorMessage {
        error: ErrorDetails { code, message },
    };
    Ok(reply_json(&body, status))
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
