//! 推理层：批量 chat 能力抽象、采样参数与 Mock 实现

pub mod mock;
pub mod traits;

pub use mock::MockInference;
pub use traits::{ChatCompletion, InferenceClient, SamplingParams};
