//! 代码环境
//!
//! 模型在 `<code>` 中写 Python，沙箱输出以 `<output>` 块作为 tool 消息注入；
//! 轨迹 i 的代码总是交给 SandboxRegistry 中第 i % len 个实例执行。

use async_trait::async_trait;

use crate::config::SandboxSection;
use crate::conversation::{Message, RolloutInput};
use crate::core::RolloutError;
use crate::env::{error_in_block, natural_stop_or_answered, Environment, CODE_PROMPT};
use crate::llm::ChatCompletion;
use crate::parser::{FieldSpec, XmlParser};
use crate::rollout::RolloutState;
use crate::sandbox::{CodeDispatcher, SandboxRegistry};

const STOP_MARKERS: &[&str] = &["</code>", "</answer>"];

pub struct CodeEnv {
    dispatcher: CodeDispatcher,
    parser: XmlParser,
    env_parser: XmlParser,
    system_prompt: String,
}

impl CodeEnv {
    pub fn new(dispatcher: CodeDispatcher) -> Self {
        Self::with_prompt(dispatcher, CODE_PROMPT)
    }

    /// 按 [sandbox] 配置准备 instances 个沙箱实例（kernel 类型应与并发轨迹数一致）
    pub async fn from_config(section: &SandboxSection, instances: usize) -> Result<Self, RolloutError> {
        let sandboxes = SandboxRegistry::provision(section, instances).await?;
        Ok(Self::new(CodeDispatcher::new(sandboxes, section.timeout_secs)))
    }

    pub fn with_prompt(dispatcher: CodeDispatcher, system_prompt: &str) -> Self {
        Self {
            dispatcher,
            parser: XmlParser::new([FieldSpec::tag("think"), FieldSpec::group(["code", "answer"])]),
            env_parser: XmlParser::new(["output"]),
            system_prompt: system_prompt.to_string(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn parser(&self) -> &XmlParser {
        &self.parser
    }

    pub fn build_input(&self, few_shot: &[Message], question: &str) -> RolloutInput {
        RolloutInput::from_question(&self.system_prompt, few_shot, question)
    }

    /// 销毁全部沙箱实例；rollout 结束后由调用方调用一次
    pub async fn teardown(&self) -> Result<(), RolloutError> {
        self.dispatcher.teardown().await
    }
}

#[async_trait]
impl Environment for CodeEnv {
    fn stop_markers(&self) -> &[&'static str] {
        STOP_MARKERS
    }

    fn is_completed(&self, state: &RolloutState, completion: &ChatCompletion) -> bool {
        natural_stop_or_answered(&self.parser, STOP_MARKERS, state, completion)
    }

    fn is_error_response(&self, response: &Message) -> bool {
        error_in_block(&self.env_parser, "output", response)
    }

    async fn env_response(&self, state: &RolloutState) -> Message {
        let parsed = state
            .last_message()
            .map(|m| self.parser.parse(&m.content))
            .unwrap_or_default();
        let Some(code) = parsed.get("code") else {
            tracing::warn!(trajectory = state.index, "no code block in assistant message");
            return Message::user(
                "Error: Code not found or invalid XML format. Please ensure correct formatting.",
            );
        };

        let output = self.dispatcher.dispatch(state.index, code).await;
        if output.trim().is_empty() {
            tracing::warn!(trajectory = state.index, "code execution returned empty output");
            return Message::tool("Error: Code execution returned empty output.");
        }
        Message::tool(self.env_parser.format([("output", output.as_str())]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxKind;
    use crate::sandbox::LocalSandbox;
    use std::sync::Arc;

    fn env() -> CodeEnv {
        let sandbox = Arc::new(LocalSandbox::with_interpreter("sh", ["-c"]));
        CodeEnv::new(CodeDispatcher::new(SandboxRegistry::single(sandbox), 5))
    }

    fn state_with(reply: &str) -> RolloutState {
        let mut state = RolloutState::new(0, RolloutInput::new(vec![Message::user("q")]));
        state.messages.push(Message::assistant(reply));
        state
    }

    #[tokio::test]
    async fn test_env_response_variants() {
        let env = env();

        let ok = env
            .env_response(&state_with("<think>\nprint\n</think>\n<code>\necho 42\n</code>"))
            .await;
        assert_eq!(ok, Message::tool("<output>\n42\n</output>"));

        let empty = env.env_response(&state_with("<code>\ntrue\n</code>")).await;
        assert_eq!(empty, Message::tool("Error: Code execution returned empty output."));

        let failing = env.env_response(&state_with("<code>\necho oops 1>&2\n</code>")).await;
        assert_eq!(failing, Message::tool("<output>\nError: oops\n</output>"));

        let missing = env.env_response(&state_with("<answer>\n4")).await;
        assert_eq!(
            missing,
            Message::user("Error: Code not found or invalid XML format. Please ensure correct formatting.")
        );

        env.teardown().await.unwrap();
    }

    #[test]
    fn test_wrapped_output_errors_are_errors() {
        let env = env();
        assert!(env.is_error_response(&Message::tool("<output>\nError: oops\n</output>")));
        assert!(!env.is_error_response(&Message::tool("<output>\n42\n</output>")));
    }

    #[tokio::test]
    async fn test_from_config_local() {
        let section = SandboxSection {
            kind: SandboxKind::Local,
            python_command: "sh".to_string(),
            ..SandboxSection::default()
        };
        let env = CodeEnv::from_config(&section, 2).await.unwrap();
        assert_eq!(env.dispatcher.sandboxes().len(), 2);
        let mut state = state_with("<code>\necho hi\n</code>");
        state.index = 1;
        assert_eq!(env.env_response(&state).await, Message::tool("<output>\nhi\n</output>"));
        env.teardown().await.unwrap();
    }

    #[test]
    fn test_answer_alias_completes() {
        let env = env();
        let completion = ChatCompletion {
            stop_reason: Some("</answer>".into()),
            ..ChatCompletion::default()
        };
        assert!(env.is_completed(&state_with("<answer>\n7\n</answer>"), &completion));
        let at_code = ChatCompletion {
            stop_reason: Some("</code>".into()),
            ..ChatCompletion::default()
        };
        assert!(!env.is_completed(&state_with("<code>\nprint(1)\n</code>"), &at_code));
    }
}
