//! 核心层：错误类型

pub mod error;

pub use error::RolloutError;
