//! 轨迹状态与输出
//!
//! RolloutState 只被调度器在处理该轨迹的那个任务里修改；completed 置位后冻结。

use std::collections::BTreeMap;

use serde::Serialize;

use crate::conversation::{Message, RolloutInput};

/// 单条轨迹的可变记录
#[derive(Clone, Debug)]
pub struct RolloutState {
    /// 在本批输入中的下标（也用于选择沙箱实例）
    pub index: usize,
    pub input: RolloutInput,
    /// prompt ++ 生成的 assistant / 环境回复
    pub messages: Vec<Message>,
    pub n_prompt_messages: usize,
    /// 第一轮引擎看到的 prompt token，此后不变
    pub prompt_ids: Vec<u32>,
    pub completion_ids: Vec<u32>,
    /// 与 completion_ids 等长：1 = 策略 token，环境 token 为环境掩码值
    pub completion_mask: Vec<u8>,
    pub completed: bool,
    pub metrics: BTreeMap<String, f64>,
}

impl RolloutState {
    pub fn new(index: usize, input: RolloutInput) -> Self {
        let messages = input.prompt.clone();
        Self {
            index,
            n_prompt_messages: messages.len(),
            messages,
            input,
            prompt_ids: Vec::new(),
            completion_ids: Vec::new(),
            completion_mask: Vec::new(),
            completed: false,
            metrics: BTreeMap::new(),
        }
    }

    /// prompt 之后的 assistant 轮数
    pub fn assistant_turns(&self) -> usize {
        self.completion_messages().iter().filter(|m| m.is_assistant()).count()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// prompt 之后最近一条 assistant 消息
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages[self.n_prompt_messages..]
            .iter()
            .rev()
            .find(|m| m.is_assistant())
    }

    pub fn completion_messages(&self) -> &[Message] {
        &self.messages[self.n_prompt_messages..]
    }

    pub(crate) fn bump(&mut self, metric: &str, by: f64) {
        *self.metrics.entry(metric.to_string()).or_insert(0.0) += by;
    }

    pub fn into_output(self) -> TrajectoryOutput {
        TrajectoryOutput {
            messages: self.messages[self.n_prompt_messages..].to_vec(),
            completion_ids: self.completion_ids,
            completion_mask: self.completion_mask,
            metrics: self.metrics,
        }
    }
}

/// 交给下游打分的单条轨迹结果
#[derive(Clone, Debug, Default, Serialize)]
pub struct TrajectoryOutput {
    /// prompt 之后的消息
    pub messages: Vec<Message>,
    pub completion_ids: Vec<u32>,
    pub completion_mask: Vec<u8>,
    pub metrics: BTreeMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assistant_turns_and_output() {
        let input = RolloutInput::new(vec![Message::system("s"), Message::user("q")]);
        let mut state = RolloutState::new(3, input);
        assert_eq!(state.assistant_turns(), 0);
        assert!(state.last_assistant().is_none());

        state.messages.push(Message::assistant("a1"));
        state.messages.push(Message::tool("r1"));
        state.messages.push(Message::assistant("a2"));
        assert_eq!(state.assistant_turns(), 2);
        assert_eq!(state.last_assistant(), Some(&Message::assistant("a2")));

        state.bump("steps", 1.0);
        state.bump("steps", 1.0);
        let out = state.into_output();
        assert_eq!(out.messages.len(), 3);
        assert_eq!(out.metrics.get("steps"), Some(&2.0));
    }
}
