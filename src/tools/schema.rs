//! 工具 Schema：注册时静态声明，渲染成 system prompt 中的工具说明
//!
//! 也支持从结构化说明文本（摘要 / Args: / Examples: 段落）拆出描述、逐参数说明与示例。

use std::sync::OnceLock;

use regex::Regex;
use schemars::{schema_for, JsonSchema};
use serde::Serialize;
use serde_json::Value;

/// 调度层保留的控制参数名，不出现在工具 schema 中
pub const RESERVED_PARAMS: &[&str] = &["run_context", "kwargs"];

/// 单个参数说明
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArgSpec {
    pub name: String,
    /// 类型提示（仅供展示，如 str / int / any）
    pub type_hint: String,
    pub description: String,
    pub default: Option<Value>,
}

impl ArgSpec {
    pub fn new(name: impl Into<String>, type_hint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_hint: type_hint.into(),
            description: String::new(),
            default: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// 工具 schema：名称、描述、有序参数、返回类型、示例
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub args: Vec<ArgSpec>,
    pub returns: String,
    pub examples: Vec<String>,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            args: Vec::new(),
            returns: "str".to_string(),
            examples: Vec::new(),
        }
    }

    /// 追加参数；保留控制参数会被忽略
    pub fn arg(mut self, spec: ArgSpec) -> Self {
        if !RESERVED_PARAMS.iter().any(|r| *r == spec.name) {
            self.args.push(spec);
        }
        self
    }

    pub fn example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    /// 由说明文本 + 参数声明构建 schema。
    ///
    /// 说明文本按空行分段：第一段为描述；以 `Args:` 开头的段落逐行给出 `name: 说明`
    /// 或 `name (type): 说明`；以 `Examples:` 开头的段落其余每行为一个示例。
    pub fn from_doc(name: impl Into<String>, doc: &str, params: Vec<ArgSpec>) -> Self {
        let parts: Vec<&str> = doc.split("\n\n").collect();
        let description = parts.first().map(|p| p.trim()).unwrap_or("").to_string();

        let mut arg_docs: Vec<(String, String)> = Vec::new();
        let mut examples = Vec::new();
        for part in &parts {
            let part = part.trim();
            if let Some(rest) = part.strip_prefix("Args:") {
                for line in rest.lines() {
                    if let Some(caps) = arg_line_regex().captures(line.trim()) {
                        arg_docs.push((caps[1].to_string(), caps[2].trim().to_string()));
                    }
                }
            } else if let Some(rest) = part.strip_prefix("Examples:") {
                examples.extend(
                    rest.lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string),
                );
            }
        }

        let mut schema = Self::new(name, description);
        schema.examples = examples;
        for mut spec in params {
            if spec.description.is_empty() {
                if let Some((_, d)) = arg_docs.iter().find(|(n, _)| *n == spec.name) {
                    spec.description = d.clone();
                }
            }
            schema = schema.arg(spec);
        }
        schema
    }
}

fn arg_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\w+)\s*(?:\([^)]*\))?\s*:\s*(.*)$").expect("static arg line pattern")
    })
}

/// 渲染工具说明，注入 system prompt 的 {tool_descriptions}
pub fn format_tool_descriptions(schemas: &[ToolSchema]) -> String {
    schemas
        .iter()
        .map(|schema| {
            let mut desc = vec![format!("{}: {}", schema.name, schema.description)];
            desc.push("\nArguments:".to_string());
            for arg in &schema.args {
                let default = arg
                    .default
                    .as_ref()
                    .map(|d| format!(" (default: {})", display_value(d)))
                    .unwrap_or_default();
                desc.push(format!("  - {}: {}{}", arg.name, arg.description, default));
            }
            if !schema.examples.is_empty() {
                desc.push("\nExamples:".to_string());
                for example in &schema.examples {
                    desc.push(format!("  {}", example));
                }
            }
            desc.join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n----\n")
}

fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 工具调用格式：`<tool>` 标签内的 JSON（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，如 calculator、search
    pub name: String,
    /// 参数对象（按参数名传参）或单个值（作为第一个参数）
    pub args: Value,
}

/// 返回工具调用的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
