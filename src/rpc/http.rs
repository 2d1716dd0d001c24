//! HTTP/JSON 远程 Agent 客户端
//!
//! `POST {base}/v1/execute`（body 为 AgentTask）与 `GET {base}/v1/describe`；非 2xx 响应体作为错误信息。
//! execute 的 `202 Accepted` 表示对端请求本地工具，body 中的任务以 [`AgentError::LocalToolRequired`] 返回。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::protocol::{AgentTask, CapabilityMetadata};
use crate::rpc::{Agent, AgentConnector};

pub struct HttpAgentClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAgentClient {
    pub fn new(http: reqwest::Client, address: &str) -> Self {
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, AgentError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AgentError::Rpc(format!("HTTP {}: {}", status, body)))
    }
}

fn map_send_error(base_url: &str, e: reqwest::Error) -> AgentError {
    if e.is_timeout() {
        AgentError::Timeout(base_url.to_string())
    } else if e.is_connect() {
        AgentError::Connect {
            endpoint: base_url.to_string(),
            reason: e.to_string(),
        }
    } else {
        AgentError::Rpc(e.to_string())
    }
}

#[async_trait]
impl Agent for HttpAgentClient {
    async fn execute(&self, task: AgentTask) -> Result<AgentTask, AgentError> {
        let response = self
            .http
            .post(format!("{}/v1/execute", self.base_url))
            .json(&task)
            .send()
            .await
            .map_err(|e| map_send_error(&self.base_url, e))?;
        let response = Self::check(response).await?;
        let local_tool = response.status() == reqwest::StatusCode::ACCEPTED;
        let task = response
            .json::<AgentTask>()
            .await
            .map_err(|e| AgentError::Decode(e.to_string()))?;
        if local_tool {
            return Err(AgentError::LocalToolRequired(Box::new(task)));
        }
        Ok(task)
    }

    async fn describe(&self) -> Result<CapabilityMetadata, AgentError> {
        let response = self
            .http
            .get(format!("{}/v1/describe", self.base_url))
            .send()
            .await
            .map_err(|e| map_send_error(&self.base_url, e))?;
        let response = Self::check(response).await?;
        response
            .json::<CapabilityMetadata>()
            .await
            .map_err(|e| AgentError::Decode(e.to_string()))
    }
}

/// 为每个地址创建 HttpAgentClient；底层 reqwest::Client 共享（自带 keep-alive 连接池）
pub struct HttpConnector {
    http: reqwest::Client,
}

impl HttpConnector {
    pub fn new(request_timeout_secs: u64) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs))
            .build()
            .map_err(|e| AgentError::ConfigError(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl AgentConnector for HttpConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Agent>, AgentError> {
        Ok(Arc::new(HttpAgentClient::new(self.http.clone(), address)))
    }
}
