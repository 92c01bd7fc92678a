//! 多轮 rollout：轨迹状态与按轮调度

pub mod scheduler;
pub mod state;

pub use scheduler::RolloutScheduler;
pub use state::{RolloutState, TrajectoryOutput};
