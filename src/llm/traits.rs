//! 推理引擎抽象
//!
//! 调度器只依赖一个窄接口：给定 N 段对话与采样参数，返回 N 个单样本 completion（含 token id）。
//! 引擎内部的请求调度、KV cache、采样均不在本 crate 范围内。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SamplingSection;
use crate::conversation::Message;
use crate::core::RolloutError;

/// 采样参数（与 vLLM 风格引擎的字段对应）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub stop: Vec<String>,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    /// 输出文本中保留命中的 stop 字符串（动作标签需要闭合）
    pub include_stop_str_in_output: bool,
    pub skip_special_tokens: bool,
    pub spaces_between_special_tokens: bool,
    pub n: usize,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            stop: Vec::new(),
            max_tokens: 1024,
            temperature: 1.0,
            top_p: 1.0,
            include_stop_str_in_output: false,
            skip_special_tokens: true,
            spaces_between_special_tokens: true,
            n: 1,
        }
    }
}

impl From<&SamplingSection> for SamplingParams {
    fn from(section: &SamplingSection) -> Self {
        Self {
            stop: section.stop.clone(),
            max_tokens: section.max_tokens,
            temperature: section.temperature,
            top_p: section.top_p,
            ..Self::default()
        }
    }
}

impl SamplingParams {
    /// 多轮环境使用的参数：合并动作边界 stop 标记与额外 stop 串（去重、保序），
    /// 并固定单样本、保留 stop 串、不跳过特殊 token。
    pub fn for_environment<S: AsRef<str>>(&self, stop_markers: &[S], extra_stop: &[S]) -> Self {
        let mut params = self.clone();
        for s in stop_markers.iter().chain(extra_stop) {
            let s = s.as_ref();
            if !params.stop.iter().any(|existing| existing == s) {
                params.stop.push(s.to_string());
            }
        }
        params.include_stop_str_in_output = true;
        params.skip_special_tokens = false;
        params.spaces_between_special_tokens = false;
        params.n = 1;
        params
    }
}

/// 单个 completion：引擎看到的 prompt token、新生成 token、文本与停止原因
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatCompletion {
    pub prompt_token_ids: Vec<u32>,
    pub token_ids: Vec<u32>,
    pub text: String,
    /// 命中的 stop 字符串；自然结束（EOS）或长度截断时为 None
    pub stop_reason: Option<String>,
}

/// 批量推理能力：一次调用覆盖本轮全部存活轨迹
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn chat(
        &self,
        conversations: &[&[Message]],
        params: &SamplingParams,
    ) -> Result<Vec<ChatCompletion>, RolloutError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_environment_merges_stop_markers() {
        let base = SamplingParams {
            stop: vec!["<|im_end|>".into(), "</tool>".into()],
            ..SamplingParams::default()
        };
        let params = base.for_environment(&["</tool>", "</answer>"], &["<|endoftext|>"]);
        assert_eq!(
            params.stop,
            vec!["<|im_end|>", "</tool>", "</answer>", "<|endoftext|>"]
        );
        assert!(params.include_stop_str_in_output);
        assert!(!params.skip_special_tokens);
        assert_eq!(params.n, 1);
        assert_eq!(params.max_tokens, base.max_tokens);
    }

    #[test]
    fn test_from_sampling_section() {
        let section = SamplingSection {
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
            stop: vec!["<|im_end|>".into()],
        };
        let params = SamplingParams::from(&section);
        assert_eq!(params.max_tokens, 256);
        assert_eq!(params.stop, vec!["<|im_end|>"]);
        assert!(!params.include_stop_str_in_output);
    }
}
