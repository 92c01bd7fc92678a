//! Rollout - 多轮 Rollout 调度器
//!
//! 策略模型与外部环境（工具调用 / 沙箱执行代码）交替生成，按轮批量推理，
//! 并维护训练所需的 completion token 与掩码（策略 token vs 环境 token）。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **conversation**: 消息、轨迹输入、工具运行上下文
//! - **core**: 错误类型
//! - **env**: 多轮环境（ToolEnv / CodeEnv）与默认提示词
//! - **llm**: 批量推理能力抽象、采样参数与 Mock 引擎
//! - **observability**: tracing 日志初始化与审计预览
//! - **parser**: XML 风格结构化输出解析
//! - **rollout**: 轨迹状态与按轮调度器
//! - **sandbox**: 代码沙箱（本地子进程 / 容器内核会话 / 远程托管）
//! - **tools**: 工具注册表、Schema、调度器与内置工具

pub mod config;
pub mod conversation;
pub mod core;
pub mod env;
pub mod llm;
pub mod observability;
pub mod parser;
pub mod rollout;
pub mod sandbox;
pub mod tools;

pub use crate::core::RolloutError;
pub use env::{CodeEnv, Environment, ToolEnv};
pub use rollout::{RolloutScheduler, TrajectoryOutput};
