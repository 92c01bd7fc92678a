//! 消息与 Rollout 输入
//!
//! Message 一旦追加即不可变；RolloutInput 是调用方提供的初始对话（外加数据集附带字段），调度器从不修改它。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 消息角色（与推理引擎 chat 模板一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}

/// 一条轨迹的输入：初始 prompt + 数据集附带字段（参考答案、元数据等，原样透传给工具）
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RolloutInput {
    pub prompt: Vec<Message>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl RolloutInput {
    pub fn new(prompt: Vec<Message>) -> Self {
        Self {
            prompt,
            extra: Map::new(),
        }
    }

    /// 拼出 [system] ++ few_shot ++ [user question]
    pub fn from_question(system_prompt: &str, few_shot: &[Message], question: &str) -> Self {
        let mut prompt = Vec::with_capacity(few_shot.len() + 2);
        prompt.push(Message::system(system_prompt));
        prompt.extend(few_shot.iter().cloned());
        prompt.push(Message::user(question));
        Self::new(prompt)
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// 工具调用时附带的运行上下文：轨迹输入 + 到目前为止的消息历史
#[derive(Clone, Copy, Debug)]
pub struct RunContext<'a> {
    pub input: &'a RolloutInput,
    pub trajectory: &'a [Message],
}
