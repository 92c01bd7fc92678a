//! 对话层：消息、轨迹输入、工具运行上下文

pub mod message;

pub use message::{Message, Role, RolloutInput, RunContext};
