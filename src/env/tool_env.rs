//! 工具环境
//!
//! 模型输出格式 `<think>..</think>` 后跟 `<tool>{json}</tool>` 或 `<answer>..</answer>`；
//! 工具结果以 `<result>` 块作为 tool 消息注入。

use async_trait::async_trait;

use crate::config::ToolsSection;
use crate::conversation::{Message, RolloutInput, RunContext};
use crate::env::{error_in_block, natural_stop_or_answered, render_tool_prompt, Environment, DEFAULT_TOOL_PROMPT_TEMPLATE};
use crate::llm::ChatCompletion;
use crate::parser::{FieldSpec, XmlParser};
use crate::rollout::RolloutState;
use crate::tools::{builtin_registry, format_tool_descriptions, ToolDispatcher, ToolRegistry};

const STOP_MARKERS: &[&str] = &["</tool>", "</answer>"];

pub struct ToolEnv {
    dispatcher: ToolDispatcher,
    parser: XmlParser,
    env_parser: XmlParser,
    system_prompt: String,
}

impl ToolEnv {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self::with_template(registry, timeout_secs, DEFAULT_TOOL_PROMPT_TEMPLATE)
    }

    /// 内置工具 + 默认模板
    pub fn from_config(section: &ToolsSection) -> Self {
        Self::new(builtin_registry(section), section.tool_timeout_secs)
    }

    /// template 中的 `{tool_descriptions}` 在构造时被替换一次
    pub fn with_template(registry: ToolRegistry, timeout_secs: u64, template: &str) -> Self {
        let dispatcher = ToolDispatcher::new(registry, timeout_secs);
        let descriptions = format_tool_descriptions(&dispatcher.schemas());
        Self {
            system_prompt: render_tool_prompt(template, &descriptions),
            dispatcher,
            parser: XmlParser::new([FieldSpec::tag("think"), FieldSpec::group(["tool", "answer"])]),
            env_parser: XmlParser::new(["result"]),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn parser(&self) -> &XmlParser {
        &self.parser
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    /// 以本环境的系统提示词构造一条输入
    pub fn build_input(&self, few_shot: &[Message], question: &str) -> RolloutInput {
        RolloutInput::from_question(&self.system_prompt, few_shot, question)
    }
}

#[async_trait]
impl Environment for ToolEnv {
    fn stop_markers(&self) -> &[&'static str] {
        STOP_MARKERS
    }

    fn is_completed(&self, state: &RolloutState, completion: &ChatCompletion) -> bool {
        natural_stop_or_answered(&self.parser, STOP_MARKERS, state, completion)
    }

    fn is_error_response(&self, response: &Message) -> bool {
        error_in_block(&self.env_parser, "result", response)
    }

    async fn env_response(&self, state: &RolloutState) -> Message {
        let parsed = state
            .last_message()
            .map(|m| self.parser.parse(&m.content))
            .unwrap_or_default();
        let Some(action) = parsed.get("tool") else {
            tracing::warn!(trajectory = state.index, "no tool call in assistant message");
            return Message::user("Error: Tool call failed. Please ensure correct formatting.");
        };

        let ctx = RunContext {
            input: &state.input,
            trajectory: &state.messages,
        };
        let result = self.dispatcher.dispatch(action, ctx).await;
        if result.trim().is_empty() {
            tracing::warn!(trajectory = state.index, "tool returned empty output");
            return Message::tool("Error: Tool execution returned empty output.");
        }
        Message::tool(self.env_parser.format([("result", result.as_str())]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{CalculatorTool, EchoTool};

    fn env() -> ToolEnv {
        let mut registry = ToolRegistry::new();
        registry.register(CalculatorTool);
        registry.register(EchoTool);
        ToolEnv::new(registry, 1)
    }

    fn state_with(reply: &str) -> RolloutState {
        let mut state = RolloutState::new(0, RolloutInput::new(vec![Message::user("q")]));
        state.messages.push(Message::assistant(reply));
        state
    }

    fn completion(stop: Option<&str>) -> ChatCompletion {
        ChatCompletion {
            stop_reason: stop.map(str::to_string),
            ..ChatCompletion::default()
        }
    }

    #[test]
    fn test_from_config_uses_builtin_tools() {
        let env = ToolEnv::from_config(&ToolsSection::default());
        assert_eq!(env.dispatcher().registry().tool_names(), vec!["calculator", "search", "echo"]);
        assert!(env.system_prompt().contains("  - top_n: Number of documents to return (default: 3)"));
    }

    #[test]
    fn test_system_prompt_lists_tools() {
        let env = env();
        assert!(env.system_prompt().contains("calculator: Evaluates a single line of arithmetic."));
        assert!(env.system_prompt().contains("\n----\necho:"));
        assert!(!env.system_prompt().contains("{tool_descriptions}"));
    }

    #[test]
    fn test_is_completed() {
        let env = env();
        let tool_call = state_with("<think>\nx\n</think>\n<tool>\n{\"name\":\"echo\"}\n</tool>");
        assert!(!env.is_completed(&tool_call, &completion(Some("</tool>"))));
        // 没有在动作标记处停下（EOS 或截断）
        assert!(env.is_completed(&tool_call, &completion(None)));

        let answered = state_with("<think>\nx\n</think>\n<answer>\n4\n</answer>");
        assert!(env.is_completed(&answered, &completion(Some("</answer>"))));
    }

    #[test]
    fn test_wrapped_tool_errors_are_errors() {
        let env = env();
        assert!(env.is_error_response(&Message::tool("<result>\nError: Unknown tool 'x'\n</result>")));
        assert!(env.is_error_response(&Message::user("Error: Tool call failed. Please ensure correct formatting.")));
        assert!(!env.is_error_response(&Message::tool("<result>\n4\n</result>")));
    }

    #[tokio::test]
    async fn test_env_response_variants() {
        let env = env();

        let ok = env
            .env_response(&state_with(
                "<tool>\n{\"name\": \"calculator\", \"args\": {\"expression\": \"2 + 2\"}}\n</tool>",
            ))
            .await;
        assert_eq!(ok, Message::tool("<result>\n4\n</result>"));

        let empty = env
            .env_response(&state_with("<tool>\n{\"name\": \"echo\", \"args\": {\"text\": \"  \"}}\n</tool>"))
            .await;
        assert_eq!(empty, Message::tool("Error: Tool execution returned empty output."));

        let unknown = env
            .env_response(&state_with("<tool>\n{\"name\":\"unknown_tool\",\"args\":{}}\n</tool>"))
            .await;
        assert_eq!(unknown, Message::tool("<result>\nError: Unknown tool 'unknown_tool'\n</result>"));

        let missing = env.env_response(&state_with("just talking")).await;
        assert_eq!(
            missing,
            Message::user("Error: Tool call failed. Please ensure correct formatting.")
        );
    }
}
