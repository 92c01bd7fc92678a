//! Rollout 调度器：按轮批量生成，逐轨迹并发后处理
//!
//! 每一轮：
//! 1. 收集未完成的轨迹；没有则结束
//! 2. 对这些轨迹发起一次批量 chat 调用
//! 3. 对每条轨迹（最多 n_jobs 条同时进行）：记录 prompt token、追加 assistant 消息、
//!    按引擎 prompt 长度的增量补环境掩码、补策略掩码、判定结束（否则追加环境回复）、修复长度不一致
//!
//! 轨迹之间互不读写；同一轨迹内的消息与 token 严格按顺序追加。

use std::iter;

use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::config::RolloutSection;
use crate::conversation::{Message, RolloutInput};
use crate::core::RolloutError;
use crate::env::Environment;
use crate::llm::{ChatCompletion, InferenceClient, SamplingParams};
use crate::rollout::{RolloutState, TrajectoryOutput};

pub const METRIC_STEPS: &str = "steps";
pub const METRIC_ENV_TOKENS: &str = "env_tokens";
pub const METRIC_POLICY_TOKENS: &str = "policy_tokens";
pub const METRIC_ENV_ERRORS: &str = "env_errors";
pub const METRIC_MASK_REPAIRS: &str = "mask_repairs";

pub struct RolloutScheduler<E> {
    env: E,
    max_steps: usize,
    env_mask: u8,
    n_jobs: usize,
}

impl<E: Environment> RolloutScheduler<E> {
    pub fn new(env: E) -> Self {
        Self::from_config(env, &RolloutSection::default())
    }

    pub fn from_config(env: E, section: &RolloutSection) -> Self {
        Self {
            env,
            max_steps: section.max_steps,
            env_mask: if section.mask_env_response { 0 } else { 1 },
            n_jobs: section.n_jobs.max(1),
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// true（默认）时环境注入的 token 掩码为 0
    pub fn with_mask_env_response(mut self, mask: bool) -> Self {
        self.env_mask = if mask { 0 } else { 1 };
        self
    }

    pub fn with_n_jobs(mut self, n_jobs: usize) -> Self {
        self.n_jobs = n_jobs.max(1);
        self
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub async fn generate(
        &self,
        inputs: Vec<RolloutInput>,
        llm: &dyn InferenceClient,
        params: &SamplingParams,
    ) -> Result<Vec<TrajectoryOutput>, RolloutError> {
        self.generate_with_cancel(inputs, llm, params, &CancellationToken::new())
            .await
    }

    /// 取消只在两轮之间检查；已开始的一轮会完整跑完
    pub async fn generate_with_cancel(
        &self,
        inputs: Vec<RolloutInput>,
        llm: &dyn InferenceClient,
        params: &SamplingParams,
        cancel: &CancellationToken,
    ) -> Result<Vec<TrajectoryOutput>, RolloutError> {
        let params = self.env.sampling_params(params);
        let mut states: Vec<RolloutState> = inputs
            .into_iter()
            .enumerate()
            .map(|(i, input)| {
                let mut state = RolloutState::new(i, input);
                for metric in [
                    METRIC_STEPS,
                    METRIC_ENV_TOKENS,
                    METRIC_POLICY_TOKENS,
                    METRIC_ENV_ERRORS,
                    METRIC_MASK_REPAIRS,
                ] {
                    state.metrics.insert(metric.to_string(), 0.0);
                }
                state
            })
            .collect();

        let mut round = 0usize;
        while states.iter().any(|s| !s.completed) {
            if cancel.is_cancelled() {
                tracing::info!(round, "rollout cancelled");
                return Err(RolloutError::Cancelled);
            }
            round += 1;
            self.step(&mut states, llm, &params, round).await?;
        }

        tracing::info!(trajectories = states.len(), rounds = round, "rollout finished");
        Ok(states.into_iter().map(RolloutState::into_output).collect())
    }

    async fn step(
        &self,
        states: &mut [RolloutState],
        llm: &dyn InferenceClient,
        params: &SamplingParams,
        round: usize,
    ) -> Result<(), RolloutError> {
        let total = states.len();
        let live: Vec<&mut RolloutState> = states.iter_mut().filter(|s| !s.completed).collect();
        tracing::debug!(round, live = live.len(), done = total - live.len(), "rollout round");

        let completions = {
            let conversations: Vec<&[Message]> = live.iter().map(|s| s.messages.as_slice()).collect();
            llm.chat(&conversations, params).await?
        };
        if completions.len() != live.len() {
            return Err(RolloutError::BatchSizeMismatch {
                expected: live.len(),
                actual: completions.len(),
            });
        }

        stream::iter(live.into_iter().zip(completions))
            .map(|(state, completion)| self.process_one(state, completion, params.max_tokens))
            .buffer_unordered(self.n_jobs)
            .collect::<Vec<()>>()
            .await;
        Ok(())
    }

    async fn process_one(&self, state: &mut RolloutState, completion: ChatCompletion, max_tokens: usize) {
        if state.prompt_ids.is_empty() {
            state.prompt_ids = completion.prompt_token_ids.clone();
        }
        state.messages.push(Message::assistant(completion.text.as_str()));

        let prior_len = state.prompt_ids.len() + state.completion_ids.len();
        let engine_prompt_len = completion.prompt_token_ids.len();
        let env_delta = engine_prompt_len.saturating_sub(prior_len);
        let new_tokens = completion.token_ids.len();
        state
            .completion_mask
            .extend(iter::repeat(self.env_mask).take(env_delta));
        state.completion_mask.extend(iter::repeat(1).take(new_tokens));

        let prefix = state.prompt_ids.len();
        state.completion_ids = completion
            .prompt_token_ids
            .iter()
            .chain(&completion.token_ids)
            .skip(prefix)
            .copied()
            .collect();

        let turns = state.assistant_turns();
        state.bump(METRIC_ENV_TOKENS, env_delta as f64);
        state.bump(METRIC_POLICY_TOKENS, new_tokens as f64);
        state.metrics.insert(METRIC_STEPS.to_string(), turns as f64);

        let completed = turns >= self.max_steps
            || self.env.is_completed(state, &completion)
            || state.completion_ids.len() > max_tokens;

        if completed {
            state.completed = true;
            state.completion_ids.truncate(max_tokens);
            state.completion_mask.truncate(max_tokens);
            tracing::debug!(
                trajectory = state.index,
                steps = turns,
                completion_len = state.completion_ids.len(),
                "trajectory completed"
            );
        } else {
            let response = self.env.env_response(state).await;
            if self.env.is_error_response(&response) {
                state.bump(METRIC_ENV_ERRORS, 1.0);
            }
            state.messages.push(response);
        }

        let (mask_len, ids_len) = (state.completion_mask.len(), state.completion_ids.len());
        if mask_len != ids_len {
            tracing::warn!(
                trajectory = state.index,
                prompt_ids = state.prompt_ids.len(),
                prior_len,
                engine_prompt_len,
                env_delta,
                new_tokens,
                mask_len,
                ids_len,
                "completion mask / ids length mismatch, repairing"
            );
            if mask_len > ids_len {
                state.completion_mask.truncate(ids_len);
            } else {
                state.completion_mask.resize(ids_len, 1);
            }
            state.bump(METRIC_MASK_REPAIRS, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::ToolEnv;
    use crate::llm::MockInference;
    use crate::tools::{CalculatorTool, ToolRegistry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// 只看文本里有没有 `</answer>`；环境回复固定为一条 tool 消息
    struct ScriptedEnv;

    #[async_trait]
    impl Environment for ScriptedEnv {
        fn stop_markers(&self) -> &[&'static str] {
            &["</tool>", "</answer>"]
        }

        fn is_completed(&self, state: &RolloutState, _completion: &ChatCompletion) -> bool {
            state
                .last_message()
                .is_some_and(|m| m.content.contains("</answer>"))
        }

        async fn env_response(&self, _state: &RolloutState) -> Message {
            Message::tool("<result>\nobs\n</result>")
        }
    }

    /// 按调用序号返回预设的 (prompt 长度, 新 token 数, 文本)
    struct ScriptedInference {
        rounds: Vec<(usize, usize, &'static str)>,
        calls: AtomicUsize,
        seen_params: Mutex<Vec<SamplingParams>>,
    }

    impl ScriptedInference {
        fn new(rounds: Vec<(usize, usize, &'static str)>) -> Self {
            Self {
                rounds,
                calls: AtomicUsize::new(0),
                seen_params: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl InferenceClient for ScriptedInference {
        async fn chat(
            &self,
            conversations: &[&[Message]],
            params: &SamplingParams,
        ) -> Result<Vec<ChatCompletion>, RolloutError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_params.lock().unwrap().push(params.clone());
            let (prompt_len, new_len, text) = self.rounds[call];
            Ok(conversations
                .iter()
                .map(|_| ChatCompletion {
                    prompt_token_ids: (0..prompt_len as u32).collect(),
                    token_ids: (1000..1000 + new_len as u32).collect(),
                    text: text.to_string(),
                    stop_reason: Some("</tool>".into()),
                })
                .collect())
        }
    }

    fn params(max_tokens: usize) -> SamplingParams {
        SamplingParams {
            max_tokens,
            ..SamplingParams::default()
        }
    }

    #[tokio::test]
    async fn test_all_answered_in_one_round() {
        let mut registry = ToolRegistry::new();
        registry.register(CalculatorTool);
        let scheduler = RolloutScheduler::new(ToolEnv::new(registry, 1));
        let llm = MockInference::new(|_| "<think>\neasy\n</think>\n<answer>\n42\n</answer>".to_string());
        let inputs = (0..3)
            .map(|i| RolloutInput::new(vec![Message::user(format!("question {i}"))]))
            .collect();

        let out = scheduler.generate(inputs, &llm, &params(64)).await.unwrap();
        assert_eq!(llm.calls(), 1);
        assert_eq!(out.len(), 3);
        for traj in &out {
            assert_eq!(traj.messages.len(), 1);
            assert!(traj.completion_mask.iter().all(|&m| m == 1));
            assert_eq!(traj.completion_mask.len(), traj.completion_ids.len());
        }
    }

    #[tokio::test]
    async fn test_env_tokens_masked_between_rounds() {
        // 第 1 轮：prompt 5 + 生成 3；第 2 轮：引擎 prompt 15 = 5 + 3 + 7 个环境 token，生成 2
        let llm = ScriptedInference::new(vec![
            (5, 3, "<tool>\n{}\n</tool>"),
            (15, 2, "<answer>\nx\n</answer>"),
        ]);
        let scheduler = RolloutScheduler::new(ScriptedEnv);
        let out = scheduler
            .generate(vec![RolloutInput::new(vec![Message::user("q")])], &llm, &params(100))
            .await
            .unwrap();

        let traj = &out[0];
        assert_eq!(traj.completion_mask, vec![1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 1, 1]);
        assert_eq!(traj.completion_ids.len(), 12);
        assert_eq!(&traj.completion_ids[10..], &[1000, 1001]);
        assert_eq!(traj.messages.len(), 3);
        assert_eq!(traj.metrics[METRIC_ENV_TOKENS], 7.0);
        assert_eq!(traj.metrics[METRIC_POLICY_TOKENS], 5.0);
        assert_eq!(traj.metrics[METRIC_STEPS], 2.0);
        assert_eq!(traj.metrics[METRIC_MASK_REPAIRS], 0.0);
    }

    #[tokio::test]
    async fn test_unmasked_env_tokens() {
        let llm = ScriptedInference::new(vec![
            (5, 3, "<tool>\n{}\n</tool>"),
            (15, 2, "<answer>\nx\n</answer>"),
        ]);
        let scheduler = RolloutScheduler::new(ScriptedEnv).with_mask_env_response(false);
        let out = scheduler
            .generate(vec![RolloutInput::new(vec![Message::user("q")])], &llm, &params(100))
            .await
            .unwrap();
        assert!(out[0].completion_mask.iter().all(|&m| m == 1));
    }

    #[tokio::test]
    async fn test_step_budget_and_sampling_params() {
        let llm = ScriptedInference::new(vec![
            (5, 1, "<tool>\n{}\n</tool>"),
            (8, 1, "<tool>\n{}\n</tool>"),
            (11, 1, "<tool>\n{}\n</tool>"),
        ]);
        let scheduler = RolloutScheduler::new(ScriptedEnv).with_max_steps(2);
        let out = scheduler
            .generate(vec![RolloutInput::new(vec![Message::user("q")])], &llm, &params(100))
            .await
            .unwrap();
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
        assert_eq!(out[0].messages.len(), 3);
        assert_eq!(out[0].metrics[METRIC_STEPS], 2.0);

        let seen = llm.seen_params.lock().unwrap();
        assert!(seen[0].stop.contains(&"</answer>".to_string()));
        assert!(seen[0].include_stop_str_in_output);
    }

    #[tokio::test]
    async fn test_token_budget_truncates() {
        let llm = ScriptedInference::new(vec![(5, 3, "<tool>\n{}\n</tool>"), (15, 6, "<tool>\n{}\n</tool>")]);
        let scheduler = RolloutScheduler::new(ScriptedEnv);
        let out = scheduler
            .generate(vec![RolloutInput::new(vec![Message::user("q")])], &llm, &params(10))
            .await
            .unwrap();
        assert_eq!(out[0].completion_ids.len(), 10);
        assert_eq!(out[0].completion_mask.len(), 10);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_mask_repair_when_prompt_shrinks() {
        // 第 2 轮引擎 prompt 比上一轮累计长度还短（重新分词漂移）
        let llm = ScriptedInference::new(vec![(5, 3, "<tool>\n{}\n</tool>"), (6, 2, "<answer>\nx\n</answer>")]);
        let scheduler = RolloutScheduler::new(ScriptedEnv);
        let out = scheduler
            .generate(vec![RolloutInput::new(vec![Message::user("q")])], &llm, &params(100))
            .await
            .unwrap();
        assert_eq!(out[0].completion_ids.len(), 3);
        assert_eq!(out[0].completion_mask.len(), 3);
        assert_eq!(out[0].metrics[METRIC_MASK_REPAIRS], 1.0);
    }

    #[tokio::test]
    async fn test_batch_size_mismatch_is_fatal() {
        struct ShortInference;

        #[async_trait]
        impl InferenceClient for ShortInference {
            async fn chat(
                &self,
                _conversations: &[&[Message]],
                _params: &SamplingParams,
            ) -> Result<Vec<ChatCompletion>, RolloutError> {
                Ok(vec![ChatCompletion::default()])
            }
        }

        let scheduler = RolloutScheduler::new(ScriptedEnv);
        let inputs = vec![
            RolloutInput::new(vec![Message::user("a")]),
            RolloutInput::new(vec![Message::user("b")]),
        ];
        let err = scheduler
            .generate(inputs, &ShortInference, &params(10))
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::BatchSizeMismatch { expected: 2, actual: 1 }));
    }

    #[tokio::test]
    async fn test_cancel_before_first_round() {
        let llm = ScriptedInference::new(vec![(5, 1, "<answer>\nx\n</answer>")]);
        let scheduler = RolloutScheduler::new(ScriptedEnv);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = scheduler
            .generate_with_cancel(
                vec![RolloutInput::new(vec![Message::user("q")])],
                &llm,
                &params(10),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::Cancelled));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_parallel_matches_sequential() {
        let script = vec![(5, 3, "<tool>\n{}\n</tool>"), (15, 2, "<answer>\nx\n</answer>")];
        let inputs: Vec<RolloutInput> = (0..4)
            .map(|i| RolloutInput::new(vec![Message::user(format!("q{i}"))]))
            .collect();

        let sequential = RolloutScheduler::new(ScriptedEnv)
            .generate(inputs.clone(), &ScriptedInference::new(script.clone()), &params(100))
            .await
            .unwrap();
        let parallel = RolloutScheduler::new(ScriptedEnv)
            .with_n_jobs(3)
            .generate(inputs, &ScriptedInference::new(script), &params(100))
            .await
            .unwrap();

        for (a, b) in sequential.iter().zip(&parallel) {
            assert_eq!(a.completion_ids, b.completion_ids);
            assert_eq!(a.completion_mask, b.completion_mask);
            assert_eq!(a.messages, b.messages);
        }
    }
}
