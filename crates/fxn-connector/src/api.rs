//! REST API in front of the head node.
//!
//! All endpoints live under `/api/v1`. Request failures are answered with
//! an HTTP status derived from the response [`Code`] and a JSON body carrying
//! the code and the error text.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fxn_node::{HeadNode, NodeError};
use fxn_protocol::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct ApiState {
    /// Head node every request is served by.
    pub head: Arc<HeadNode>,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Node(#[from] NodeError),
}

impl ApiError {
    pub fn code(&self) -> Code {
        match self {
            Self::BadRequest(_) => Code::Invalid,
            Self::NotFound(_) => Code::NotFound,
            Self::Node(e) => e.code(),
        }
    }
}

impl From<ProtocolError> for ApiError {
    fn from(e: ProtocolError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        let body = serde_json::json!({
            "code": code,
            "error": self.to_string(),
        });
        (status_for(code), Json(body)).into_response()
    }
}

pub fn status_for(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Accepted => StatusCode::ACCEPTED,
        Code::Invalid => StatusCode::BAD_REQUEST,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::Timeout => StatusCode::GATEWAY_TIMEOUT,
        Code::NotAvailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::Unsupported => StatusCode::NOT_IMPLEMENTED,
        Code::Error => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ── Request and response bodies ──

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteBody {
    /// The execution request, inlined in the body.
    #[serde(flatten)]
    pub request: ExecutionRequest,
    /// Topic to publish the roll call on.
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallBody {
    /// Manifest location. Derived from the CID when empty.
    #[serde(default)]
    pub uri: String,
    /// Content ID to install the function under.
    pub cid: String,
    /// Topic to publish the install on.
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultBody {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlBody {
    /// Request ID of a detached execution.
    pub request_id: String,
    /// One of `stat`, `wait` or `kill`.
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlReply {
    pub request_id: String,
    pub action: String,
    /// Outcome of relaying the action.
    pub code: Code,
}

// ── Server ──

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/functions/execute", post(execute))
        .route("/api/v1/functions/install", post(install))
        .route("/api/v1/functions/requests/result", post(execution_result))
        .route("/api/v1/functions/control", post(control))
        .with_state(state)
}

/// Serve the API until `cancel` fires.
pub async fn serve(
    listen_addr: &str,
    state: ApiState,
    cancel: CancellationToken,
) -> Result<(), anyhow::Error> {
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(addr = %listen_addr, "REST API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    tracing::info!("REST API stopped");
    Ok(())
}

// ── Handlers ──

pub async fn health(State(api): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "code": Code::Ok,
        "peer": api.head.id(),
        "version": PROTOCOL_VERSION,
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn execute(
    State(api): State<ApiState>,
    Json(body): Json<ExecuteBody>,
) -> Result<Json<ExecuteResponse>, (StatusCode, Json<ExecuteResponse>)> {
    if let Err(e) = body.request.validate() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ExecuteResponse {
                request_id: String::new(),
                code: Code::Invalid,
                results: ResultMap::new(),
                cluster: Vec::new(),
                message: Some(e.to_string()),
            }),
        ));
    }

    let topic = body.topic.filter(|t| !t.is_empty());
    match api.head.execute_function(body.request, topic).await {
        Ok(outcome) => Ok(Json(ExecuteResponse {
            request_id: outcome.request_id,
            code: outcome.code,
            results: outcome.results,
            cluster: outcome.cluster,
            message: None,
        })),
        Err(failure) => {
            let code = failure.code();
            Err((
                status_for(code),
                Json(ExecuteResponse {
                    message: Some(failure.error.to_string()),
                    request_id: failure.request_id,
                    code,
                    results: ResultMap::new(),
                    cluster: Vec::new(),
                }),
            ))
        }
    }
}

pub async fn install(
    State(api): State<ApiState>,
    Json(body): Json<InstallBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.cid.is_empty() {
        return Err(ApiError::BadRequest("cid is empty".into()));
    }

    api.head
        .publish_function_install(&body.uri, &body.cid, body.topic.as_deref())
        .await?;
    Ok(Json(serde_json::json!({ "code": Code::Accepted })))
}

pub async fn execution_result(
    State(api): State<ApiState>,
    Json(body): Json<ResultBody>,
) -> Result<Json<ResultMap>, ApiError> {
    if body.id.is_empty() {
        return Err(ApiError::BadRequest("id is empty".into()));
    }
    api.head
        .execution_result(&body.id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no result for request {}", body.id)))
}

pub async fn control(
    State(api): State<ApiState>,
    Json(body): Json<ControlBody>,
) -> Result<Json<ControlReply>, ApiError> {
    let action: ExecAction = body.action.parse()?;
    api.head.execution_control(&body.request_id, action).await?;
    Ok(Json(ControlReply {
        request_id: body.request_id,
        action: action.to_string(),
        code: Code::Ok,
    }))
}
