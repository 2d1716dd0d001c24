//! HTTP Agent 服务端（feature = "server"）
//!
//! 把任意 Agent 暴露为 `POST /v1/execute`、`GET /v1/describe`、`GET /healthz`。
//! execute 返回本地工具信号时响应 `202 Accepted`，body 为待本地处理的任务。

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::protocol::{AgentTask, CapabilityMetadata};
use crate::rpc::Agent;

type AppState = Arc<dyn Agent>;

fn status_for(e: &AgentError) -> StatusCode {
    match e {
        AgentError::Decode(_) => StatusCode::BAD_REQUEST,
        AgentError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        AgentError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn execute(State(agent): State<AppState>, Json(task): Json<AgentTask>) -> Response {
    tracing::info!(task_id = %task.task_id, "execute request");
    match agent.execute(task).await {
        Ok(reply) => Json(reply).into_response(),
        Err(AgentError::LocalToolRequired(local)) => {
            (StatusCode::ACCEPTED, Json(*local)).into_response()
        }
        Err(e) => (status_for(&e), e.to_string()).into_response(),
    }
}

async fn describe(
    State(agent): State<AppState>,
) -> Result<Json<CapabilityMetadata>, (StatusCode, String)> {
    agent
        .describe()
        .await
        .map(Json)
        .map_err(|e| (status_for(&e), e.to_string()))
}

async fn healthz() -> &'static str {
    "ok"
}

pub fn router(agent: Arc<dyn Agent>) -> Router {
    Router::new()
        .route("/v1/execute", post(execute))
        .route("/v1/describe", get(describe))
        .route("/healthz", get(healthz))
        .with_state(agent)
}

/// 监听 addr 直到 cancel
pub async fn serve(
    agent: Arc<dyn Agent>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<(), AgentError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Agent server listening on http://{}", addr);
    axum::serve(listener, router(agent))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}
