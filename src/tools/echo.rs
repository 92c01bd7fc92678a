//! Echo 工具（测试用）

use async_trait::async_trait;

use crate::conversation::RunContext;
use crate::tools::{ArgSpec, Tool, ToolArgs, ToolSchema};

/// Echo 工具：回显文本
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("echo", "Echo text back (for testing).")
            .arg(ArgSpec::new("text", "str").describe("Text to echo"))
    }

    async fn execute(&self, args: ToolArgs, _ctx: RunContext<'_>) -> Result<String, String> {
        match args.get("text") {
            Some(serde_json::Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
            None => Ok(String::new()),
        }
    }
}
