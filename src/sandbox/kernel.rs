//! 内核会话沙箱：连接容器内的 Jupyter Kernel Gateway
//!
//! 构造时 `POST /api/kernels` 创建内核（期望 201 + `{"id"}`），再打开
//! `ws://host:port/api/kernels/{id}/channels`。每次执行发送一条 execute_request，
//! 只收集 parent_header.msg_id 与本次请求一致的回复，直到 status=idle。
//! 解释器全局状态在同一实例的多次调用间保留。

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::core::RolloutError;
use crate::sandbox::CodeSandbox;

type KernelChannel = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Deserialize)]
struct CreatedKernel {
    id: String,
}

/// 内核回复中我们关心的字段
#[derive(Debug, Default, Deserialize)]
struct KernelReply {
    #[serde(default)]
    msg_type: Option<String>,
    #[serde(default)]
    header: ReplyHeader,
    #[serde(default)]
    parent_header: ReplyHeader,
    #[serde(default)]
    content: Value,
}

#[derive(Debug, Default, Deserialize)]
struct ReplyHeader {
    #[serde(default)]
    msg_id: Option<String>,
    #[serde(default)]
    msg_type: Option<String>,
}

impl KernelReply {
    fn kind(&self) -> &str {
        self.msg_type
            .as_deref()
            .or(self.header.msg_type.as_deref())
            .unwrap_or_default()
    }
}

pub struct KernelSandbox {
    http: Client,
    base_url: String,
    kernel_id: String,
    session: String,
    channel: Mutex<Option<KernelChannel>>,
}

impl KernelSandbox {
    /// 创建内核并打开通道；任一步失败都会尽力删除已创建的内核后返回 SandboxInit
    pub async fn connect(host: &str, port: u16) -> Result<Self, RolloutError> {
        let http = Client::new();
        let base_url = format!("http://{host}:{port}");

        let resp = http
            .post(format!("{base_url}/api/kernels"))
            .send()
            .await
            .map_err(|e| RolloutError::SandboxInit(format!("kernel gateway unreachable: {e}")))?;
        let status = resp.status();
        if status != StatusCode::CREATED {
            let body = resp.text().await.unwrap_or_default();
            return Err(RolloutError::SandboxInit(format!(
                "Failed to create kernel: status {status}, body {body}"
            )));
        }
        let created: CreatedKernel = resp
            .json()
            .await
            .map_err(|e| RolloutError::SandboxInit(format!("invalid kernel response: {e}")))?;

        let ws_url = format!("ws://{host}:{port}/api/kernels/{}/channels", created.id);
        let channel = match tokio_tungstenite::connect_async(ws_url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                let _ = http
                    .delete(format!("{base_url}/api/kernels/{}", created.id))
                    .send()
                    .await;
                return Err(RolloutError::SandboxInit(format!(
                    "failed to open kernel channel: {e}"
                )));
            }
        };

        tracing::info!(kernel_id = %created.id, base_url = %base_url, "kernel session opened");
        Ok(Self {
            http,
            base_url,
            kernel_id: created.id,
            session: Uuid::new_v4().to_string(),
            channel: Mutex::new(Some(channel)),
        })
    }

    pub fn kernel_id(&self) -> &str {
        &self.kernel_id
    }

    fn execute_request(&self, msg_id: &str, code: &str) -> Value {
        json!({
            "header": {
                "msg_id": msg_id,
                "username": "rollout",
                "session": self.session,
                "msg_type": "execute_request",
                "version": "5.0",
            },
            "parent_header": {},
            "metadata": {},
            "channel": "shell",
            "content": {
                "code": code,
                "silent": false,
                "store_history": true,
                "user_expressions": {},
                "allow_stdin": false,
            },
        })
    }
}

#[async_trait]
impl CodeSandbox for KernelSandbox {
    fn kind(&self) -> &'static str {
        "kernel"
    }

    async fn execute(&self, code: &str, timeout: Duration) -> Result<String, RolloutError> {
        let mut guard = self.channel.lock().await;
        let channel = guard
            .as_mut()
            .ok_or_else(|| RolloutError::Sandbox("kernel session already closed".to_string()))?;

        let msg_id = Uuid::new_v4().to_string();
        let request = self.execute_request(&msg_id, code);
        channel.send(WsMessage::Text(request.to_string())).await?;

        let deadline = Instant::now() + timeout;
        let mut outputs: Vec<String> = Vec::new();
        loop {
            let frame = match tokio::time::timeout_at(deadline, channel.next()).await {
                Err(_) => {
                    return Ok(format!(
                        "Error: Code execution timed out after {} seconds",
                        timeout.as_secs()
                    ))
                }
                Ok(None) => {
                    return Err(RolloutError::Sandbox("kernel channel closed".to_string()))
                }
                Ok(Some(frame)) => frame?,
            };
            let text = match frame {
                WsMessage::Text(text) => text,
                WsMessage::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                WsMessage::Close(_) => {
                    return Err(RolloutError::Sandbox("kernel channel closed".to_string()))
                }
                _ => continue,
            };
            let reply: KernelReply = match serde_json::from_str(&text) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping undecodable kernel frame");
                    continue;
                }
            };
            if reply.parent_header.msg_id.as_deref() != Some(msg_id.as_str()) {
                continue;
            }

            match reply.kind() {
                "stream" => {
                    if let Some(t) = reply.content.get("text").and_then(Value::as_str) {
                        outputs.push(t.to_string());
                    }
                }
                "execute_result" => {
                    let plain = reply
                        .content
                        .pointer("/data/text~1plain")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    outputs.push(format!("{plain}\n"));
                }
                "error" => {
                    let name = reply.content.get("ename").and_then(Value::as_str).unwrap_or("Error");
                    let value = reply.content.get("evalue").and_then(Value::as_str).unwrap_or_default();
                    return Ok(format!("Error: {name}: {value}"));
                }
                "status" => {
                    let state = reply.content.get("execution_state").and_then(Value::as_str);
                    if state == Some("idle") {
                        break;
                    }
                }
                _ => {}
            }
        }
        Ok(outputs.concat())
    }

    /// 关闭通道并删除内核；重复调用只有第一次生效
    async fn teardown(&self) -> Result<(), RolloutError> {
        let Some(mut channel) = self.channel.lock().await.take() else {
            return Ok(());
        };
        if let Err(e) = channel.close(None).await {
            tracing::debug!(error = %e, "kernel channel close failed");
        }

        let resp = self
            .http
            .delete(format!("{}/api/kernels/{}", self.base_url, self.kernel_id))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(RolloutError::Sandbox(format!(
                "kernel delete returned {status}"
            )));
        }
        tracing::info!(kernel_id = %self.kernel_id, "kernel session closed");
        Ok(())
    }
}
