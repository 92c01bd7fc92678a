//! 工具层：注册表、Schema、调度器与内置工具（calculator / search / echo）

pub mod calculator;
pub mod echo;
pub mod executor;
pub mod registry;
pub mod schema;
pub mod search;

pub use calculator::CalculatorTool;
pub use echo::EchoTool;
pub use executor::{ToolCall, ToolDispatcher, DEFAULT_TOOL_TIMEOUT_SECS};
pub use registry::{bind_args, CallArgs, Tool, ToolArgs, ToolRegistry};
pub use schema::{format_tool_descriptions, tool_call_schema_json, ArgSpec, ToolSchema};
pub use search::SearchTool;

use crate::config::ToolsSection;

/// 按配置注册内置工具：calculator、search（指向 [tools].search_url）、echo
pub fn builtin_registry(section: &ToolsSection) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(CalculatorTool);
    registry.register(SearchTool::new(
        section.search_url.as_str(),
        section.search_top_n,
        section.tool_timeout_secs,
    ));
    registry.register(EchoTool);
    registry
}
