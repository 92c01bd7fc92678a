//! 远程托管沙箱（E2B 风格 HTTP 接口）
//!
//! 每次执行：创建沙箱 -> 执行代码（响应为逐行 JSON 事件）-> 删除沙箱（无论成功与否都尝试）。
//! 调用之间不保留任何状态。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::core::RolloutError;
use crate::sandbox::CodeSandbox;

const API_KEY_ENV: &str = "E2B_API_KEY";
/// HTTP 超时在执行超时之外额外留出的余量
const HTTP_SLACK: Duration = Duration::from_secs(5);
/// 创建 / 删除沙箱请求的超时
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedSandbox {
    #[serde(alias = "sandbox_id", alias = "id")]
    sandbox_id: String,
}

/// 执行过程中的单个事件
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExecutionEvent {
    Stdout {
        #[serde(default)]
        text: String,
    },
    Stderr {
        #[serde(default)]
        text: String,
    },
    Result {
        #[serde(default)]
        text: String,
    },
    Error {
        #[serde(default)]
        name: String,
        #[serde(default)]
        value: String,
    },
}

/// 解析逐行 JSON；空行与无法识别的事件被跳过
pub fn parse_events(body: &str) -> Vec<ExecutionEvent> {
    body.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|l| match serde_json::from_str::<ExecutionEvent>(l) {
            Ok(ev) => Some(ev),
            Err(e) => {
                tracing::debug!(error = %e, line = %l, "skipping sandbox event");
                None
            }
        })
        .collect()
}

/// 归一化为文本：stdout/stderr 逐行加前缀，有错误时追加 "Error: name: value"，否则追加最后一个 Result
pub fn format_execution(events: &[ExecutionEvent]) -> String {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut error = None;
    let mut result = None;
    for ev in events {
        match ev {
            ExecutionEvent::Stdout { text } => stdout.extend(text.lines().map(|l| format!("stdout: {l}"))),
            ExecutionEvent::Stderr { text } => stderr.extend(text.lines().map(|l| format!("stderr: {l}"))),
            ExecutionEvent::Result { text } => result = Some(text.as_str()),
            ExecutionEvent::Error { name, value } => error = Some(format!("Error: {name}: {value}")),
        }
    }
    let mut lines = stdout;
    lines.extend(stderr);
    match (error, result) {
        (Some(e), _) => lines.push(e),
        (None, Some(r)) => lines.push(format!("Result: {r}")),
        (None, None) => {}
    }
    lines.join("\n").trim().to_string()
}

pub struct RemoteSandbox {
    http: Client,
    api_url: String,
    api_key: String,
    http_slack: Duration,
}

impl RemoteSandbox {
    /// api_key 为 None 时读取 E2B_API_KEY；两者都没有则构造失败
    pub fn new(api_url: &str, api_key: Option<String>) -> Result<Self, RolloutError> {
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()))
            .ok_or_else(|| {
                RolloutError::SandboxInit(format!("{API_KEY_ENV} environment variable is not set"))
            })?;
        let http = Client::builder()
            .connect_timeout(CONTROL_TIMEOUT)
            .build()
            .unwrap_or_default();
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            http_slack: HTTP_SLACK,
        })
    }

    async fn create(&self) -> Result<String, RolloutError> {
        let resp = self
            .http
            .post(format!("{}/sandboxes", self.api_url))
            .header("X-API-Key", &self.api_key)
            .timeout(CONTROL_TIMEOUT)
            .json(&json!({}))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(RolloutError::Sandbox(format!(
                "sandbox create returned {}",
                resp.status()
            )));
        }
        let created: CreatedSandbox = resp.json().await?;
        Ok(created.sandbox_id)
    }

    async fn run(&self, id: &str, code: &str, timeout: Duration) -> Result<String, RolloutError> {
        let sent = self
            .http
            .post(format!("{}/sandboxes/{id}/execute", self.api_url))
            .header("X-API-Key", &self.api_key)
            .timeout(timeout + self.http_slack)
            .json(&json!({ "code": code, "timeout": timeout.as_secs() }))
            .send()
            .await;
        let resp = match sent {
            Err(e) if e.is_timeout() => {
                return Ok(format!(
                    "Error: Code execution timed out after {} seconds",
                    timeout.as_secs()
                ))
            }
            other => other?,
        };
        if !resp.status().is_success() {
            return Err(RolloutError::Sandbox(format!(
                "sandbox execute returned {}",
                resp.status()
            )));
        }
        let body = resp.text().await?;
        Ok(format_execution(&parse_events(&body)))
    }

    async fn destroy(&self, id: &str) {
        let result = self
            .http
            .delete(format!("{}/sandboxes/{id}", self.api_url))
            .header("X-API-Key", &self.api_key)
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await;
        if let Err(e) = result {
            tracing::warn!(sandbox_id = %id, error = %e, "remote sandbox delete failed");
        }
    }
}

#[async_trait]
impl CodeSandbox for RemoteSandbox {
    fn kind(&self) -> &'static str {
        "remote"
    }

    async fn execute(&self, code: &str, timeout: Duration) -> Result<String, RolloutError> {
        let id = self.create().await?;
        tracing::debug!(sandbox_id = %id, "remote sandbox created");
        let result = self.run(&id, code, timeout).await;
        self.destroy(&id).await;
        result
    }

    async fn teardown(&self) -> Result<(), RolloutError> {
        Ok(())
    }
}
