//! 工具调度器
//!
//! 把 `<tool>` 标签内的 JSON 动作解析为 {name, args}，按注册表绑定参数并在超时内执行。
//! 任何失败（JSON 无效、未知工具、参数错误、工具报错或 panic、超时）都转成 "Error: ..." 文本，
//! 从不向调用方抛错；每次调用输出结构化审计日志（JSON）。

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::conversation::RunContext;
use crate::observability::preview;
use crate::tools::{CallArgs, ToolRegistry, ToolSchema};

/// 默认单次工具调用超时
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 10;

/// 工具调度器：持有注册表与单次调用超时
pub struct ToolDispatcher {
    registry: ToolRegistry,
    timeout: Duration,
}

/// 解码后的工具动作
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub args: CallArgs,
}

impl ToolCall {
    /// 解码 `{"name": ..., "args": ...}`；失败时返回给模型看的错误文本
    pub fn decode(action: &str) -> Result<Self, String> {
        let command: Value = serde_json::from_str(action.trim())
            .map_err(|_| "Invalid JSON inside <tool> tags".to_string())?;
        let Value::Object(mut command) = command else {
            return Err("Tool command must be a JSON object".to_string());
        };
        let name = match command.get("name") {
            Some(Value::String(n)) if !n.is_empty() => n.clone(),
            _ => return Err("Tool command must specify 'name'".to_string()),
        };
        let args = match command.remove("args") {
            None => CallArgs::Keyword(Map::new()),
            Some(Value::Object(map)) => CallArgs::Keyword(map),
            Some(other) => CallArgs::Positional(other),
        };
        Ok(Self { name, args })
    }
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.registry.schemas()
    }

    /// 执行一次工具动作，结果总是文本（失败为 "Error: ..."）
    pub async fn dispatch(&self, action: &str, ctx: RunContext<'_>) -> String {
        let call = match ToolCall::decode(action) {
            Ok(call) => call,
            Err(e) => {
                tracing::warn!(error = %e, action = %preview(action), "tool action rejected");
                return format!("Error: {e}");
            }
        };
        if !self.registry.contains(&call.name) {
            tracing::warn!(tool = %call.name, "unknown tool");
            return format!("Error: Unknown tool '{}'", call.name);
        }

        let start = Instant::now();
        let args_preview = preview(&format!("{:?}", call.args));
        let fut = AssertUnwindSafe(self.registry.execute(&call.name, call.args, ctx)).catch_unwind();
        let result = timeout(self.timeout, fut).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(Ok(_))) => (true, "ok"),
            Ok(Ok(Err(_))) => (false, "error"),
            Ok(Err(_)) => (false, "panic"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(Ok(content))) => content,
            Ok(Ok(Err(e))) => format!("Error: {e}"),
            Ok(Err(_)) => format!("Error: Tool '{}' panicked", call.name),
            Err(_) => format!(
                "Error: Tool '{}' timed out after {}s",
                call.name,
                self.timeout.as_secs()
            ),
        }
    }
}
