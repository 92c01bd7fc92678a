//! 多轮环境：决定一条轨迹何时结束、以及模型每次动作之后注入什么回复
//!
//! 调度器只面向 `Environment` 接口编写；ToolEnv（JSON 工具调用）与 CodeEnv（沙箱执行代码）
//! 是两种实现。环境回复中的任何失败都表现为 "Error: ..." 文本消息，供策略观察并自我纠正。

pub mod code_env;
pub mod prompts;
pub mod tool_env;

use async_trait::async_trait;

use crate::conversation::Message;
use crate::llm::{ChatCompletion, SamplingParams};
use crate::parser::XmlParser;
use crate::rollout::RolloutState;

pub use code_env::CodeEnv;
pub use prompts::{render_tool_prompt, CODE_PROMPT, DEFAULT_TOOL_PROMPT_TEMPLATE};
pub use tool_env::ToolEnv;

#[async_trait]
pub trait Environment: Send + Sync {
    /// 动作边界 stop 标记（如 `</tool>`、`</answer>`）
    fn stop_markers(&self) -> &[&'static str];

    /// 本环境实际使用的采样参数：调用方参数 + stop 标记
    fn sampling_params(&self, base: &SamplingParams) -> SamplingParams {
        base.for_environment(self.stop_markers(), &[])
    }

    /// 最新一条 assistant 消息追加之后调用
    fn is_completed(&self, state: &RolloutState, completion: &ChatCompletion) -> bool;

    /// 根据最后一条 assistant 消息生成环境回复
    async fn env_response(&self, state: &RolloutState) -> Message;

    /// 环境回复是否表示一次失败（计入 env_errors）
    fn is_error_response(&self, response: &Message) -> bool {
        response.content.starts_with("Error:")
    }
}

/// 回复本身是错误，或者包装块（`<result>` / `<output>`）里的内容是错误
pub(crate) fn error_in_block(parser: &XmlParser, tag: &str, response: &Message) -> bool {
    response.content.starts_with("Error:")
        || parser
            .parse(&response.content)
            .get(tag)
            .is_some_and(|body| body.trim_start().starts_with("Error:"))
}

/// 两种环境共用的结束判定：生成不是在动作标记处停下的（自然结束或被截断），
/// 或者最后一条 assistant 消息里给出了 answer
pub(crate) fn natural_stop_or_answered(
    parser: &XmlParser,
    stop_markers: &[&str],
    state: &RolloutState,
    completion: &ChatCompletion,
) -> bool {
    let at_action_boundary = completion
        .stop_reason
        .as_deref()
        .is_some_and(|reason| stop_markers.iter().any(|m| *m == reason));
    if !at_action_boundary {
        return true;
    }
    state
        .last_message()
        .filter(|m| m.is_assistant())
        .is_some_and(|m| parser.parse(&m.content).contains("answer"))
}
