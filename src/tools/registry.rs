//! 工具注册表
//!
//! 所有工具实现 Tool trait（schema / execute），注册时取一次 schema 固定下来；
//! 调用时按 schema 绑定参数（对象按名传参、标量作为第一个参数、缺省值补齐），再交给工具执行。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::conversation::RunContext;
use crate::tools::ToolSchema;

/// 绑定后的参数：参数名 -> 值
pub type ToolArgs = Map<String, Value>;

/// 工具 trait：静态 schema（供渲染说明与参数绑定）、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;

    /// 执行工具；Err 中的文本会被调度器渲染为 "Error: {msg}"
    async fn execute(&self, args: ToolArgs, ctx: RunContext<'_>) -> Result<String, String>;
}

/// 调用方在 `<tool>` JSON 中给出的原始参数
#[derive(Debug, Clone, PartialEq)]
pub enum CallArgs {
    /// `"args": {...}`：按名传参
    Keyword(Map<String, Value>),
    /// `"args": <标量或数组>`：整体作为第一个参数
    Positional(Value),
}

struct RegisteredTool {
    schema: ToolSchema,
    tool: Arc<dyn Tool>,
}

/// 工具注册表：保持注册顺序（决定说明渲染顺序），按名查找
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同名工具后注册者覆盖先注册者
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        let name = schema.name.clone();
        let entry = RegisteredTool { schema, tool };
        match self.index.get(&name) {
            Some(&i) => self.tools[i] = entry,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(entry);
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| self.tools[i].tool.clone())
    }

    pub fn schema(&self, name: &str) -> Option<&ToolSchema> {
        self.index.get(name).map(|&i| &self.tools[i].schema)
    }

    /// 按注册顺序返回全部 schema
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| t.schema.clone()).collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.schema.name.clone()).collect()
    }

    pub async fn execute(
        &self,
        name: &str,
        args: CallArgs,
        ctx: RunContext<'_>,
    ) -> Result<String, String> {
        let &i = self
            .index
            .get(name)
            .ok_or_else(|| format!("Unknown tool '{name}'"))?;
        let entry = &self.tools[i];
        let bound = bind_args(&entry.schema, args)?;
        entry.tool.execute(bound, ctx).await
    }
}

/// 按 schema 绑定参数：拒绝未声明的参数、补齐缺省值、检查必填参数
pub fn bind_args(schema: &ToolSchema, args: CallArgs) -> Result<ToolArgs, String> {
    let mut bound = match args {
        CallArgs::Keyword(map) => map,
        CallArgs::Positional(value) => {
            let first = schema
                .args
                .first()
                .ok_or_else(|| format!("{}() takes no arguments", schema.name))?;
            let mut map = Map::new();
            map.insert(first.name.clone(), value);
            map
        }
    };

    if let Some(unknown) = bound
        .keys()
        .find(|k| !schema.args.iter().any(|a| &a.name == *k))
    {
        return Err(format!(
            "{}() got an unexpected keyword argument '{}'",
            schema.name, unknown
        ));
    }

    for arg in &schema.args {
        if bound.contains_key(&arg.name) {
            continue;
        }
        match &arg.default {
            Some(default) => {
                bound.insert(arg.name.clone(), default.clone());
            }
            None => {
                return Err(format!(
                    "{}() missing required argument: '{}'",
                    schema.name, arg.name
                ))
            }
        }
    }
    Ok(bound)
}
