//! Mock 推理引擎（用于测试，无需 GPU / 模型）
//!
//! 用一个按空白切词的玩具 tokenizer 把整段对话编码成 prompt token（末尾追加 assistant 角色 token 作为生成起点，
//! 与下一轮把该 assistant 消息编码进 prompt 时的角色 token 对齐），
//! 回复文本由调用方提供的闭包决定；按 stop 列表与 max_tokens 模拟引擎的截断与 stop_reason。

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::conversation::{Message, Role};
use crate::core::RolloutError;
use crate::llm::{ChatCompletion, InferenceClient, SamplingParams};

type Responder = dyn Fn(&[Message]) -> String + Send + Sync;

/// Mock 引擎：responder(对话) -> 生成文本
pub struct MockInference {
    responder: Box<Responder>,
    calls: AtomicUsize,
}

impl MockInference {
    pub fn new(responder: impl Fn(&[Message]) -> String + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
        }
    }

    /// 已发生的批量 chat 调用次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// 每条消息编码为：角色标记 token + 每个词一个 token
pub fn encode_messages(messages: &[Message]) -> Vec<u32> {
    let mut ids = Vec::new();
    for msg in messages {
        ids.push(role_token(msg.role));
        ids.extend(encode_text(&msg.content));
    }
    ids
}

pub fn encode_text(text: &str) -> Vec<u32> {
    text.split_whitespace().map(word_token).collect()
}

fn role_token(role: Role) -> u32 {
    match role {
        Role::System => 1,
        Role::User => 2,
        Role::Assistant => 3,
        Role::Tool => 4,
    }
}

fn word_token(word: &str) -> u32 {
    100 + word
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32))
        % 50_000
}

#[async_trait]
impl InferenceClient for MockInference {
    async fn chat(
        &self,
        conversations: &[&[Message]],
        params: &SamplingParams,
    ) -> Result<Vec<ChatCompletion>, RolloutError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let completions = conversations
            .iter()
            .map(|messages| {
                let raw = (self.responder)(messages);
                let words: Vec<&str> = raw.split_whitespace().collect();
                let (text, stop_reason) = if words.len() > params.max_tokens {
                    (words[..params.max_tokens].join(" "), None)
                } else {
                    let stop = params
                        .stop
                        .iter()
                        .find(|s| raw.trim_end().ends_with(s.as_str()))
                        .cloned();
                    (raw.clone(), stop)
                };
                let mut prompt_token_ids = encode_messages(messages);
                prompt_token_ids.push(role_token(Role::Assistant));
                ChatCompletion {
                    prompt_token_ids,
                    token_ids: encode_text(&text),
                    text,
                    stop_reason,
                }
            })
            .collect();
        Ok(completions)
    }
}
