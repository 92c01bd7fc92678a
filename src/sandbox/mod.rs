//! 代码沙箱：执行代码并返回捕获的文本（或 "Error: ..." 文本）
//!
//! 三种实现：
//! - **local**: 每次调用起一个子进程，隔离最弱，仅限可信输入
//! - **kernel**: 容器内长驻内核会话（HTTP 创建 + WebSocket 通道），解释器全局状态跨调用保留
//! - **remote**: 远程托管沙箱，每次调用创建并销毁执行上下文，调用间无状态
//!
//! kernel 实例是共享可变资源：并发轨迹共用同一实例会互相看到解释器状态。
//! SandboxRegistry 按轨迹下标分配实例，需要隔离时应为每条并发轨迹各准备一个实例。

pub mod dispatcher;
pub mod kernel;
pub mod local;
pub mod remote;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{SandboxKind, SandboxSection};
use crate::core::RolloutError;

pub use dispatcher::CodeDispatcher;
pub use kernel::KernelSandbox;
pub use local::LocalSandbox;
pub use remote::RemoteSandbox;

/// 沙箱能力：execute 返回输出文本（执行层面的失败也以 "Error: ..." 文本返回），
/// Err 只表示沙箱本身不可用（通道断开、服务不可达等）
#[async_trait]
pub trait CodeSandbox: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn execute(&self, code: &str, timeout: Duration) -> Result<String, RolloutError>;

    async fn teardown(&self) -> Result<(), RolloutError>;
}

/// 按配置构造一个沙箱实例；构造失败直接返回错误（不重试）
pub async fn build_sandbox(section: &SandboxSection) -> Result<Arc<dyn CodeSandbox>, RolloutError> {
    let sandbox: Arc<dyn CodeSandbox> = match section.kind {
        SandboxKind::Local => Arc::new(LocalSandbox::new(&section.python_command)),
        SandboxKind::Kernel => {
            Arc::new(KernelSandbox::connect(&section.kernel_host, section.kernel_port).await?)
        }
        SandboxKind::Remote => Arc::new(RemoteSandbox::new(
            &section.remote_api_url,
            section.api_key.clone(),
        )?),
    };
    tracing::info!(kind = sandbox.kind(), "sandbox ready");
    Ok(sandbox)
}

/// 沙箱注册表：调用方一次性构造、一次性销毁；轨迹 i 使用第 i % len 个实例
pub struct SandboxRegistry {
    sandboxes: Vec<Arc<dyn CodeSandbox>>,
    torn_down: AtomicBool,
}

impl SandboxRegistry {
    pub fn new(sandboxes: Vec<Arc<dyn CodeSandbox>>) -> Result<Self, RolloutError> {
        if sandboxes.is_empty() {
            return Err(RolloutError::SandboxInit(
                "sandbox registry needs at least one instance".to_string(),
            ));
        }
        Ok(Self {
            sandboxes,
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn single(sandbox: Arc<dyn CodeSandbox>) -> Self {
        Self {
            sandboxes: vec![sandbox],
            torn_down: AtomicBool::new(false),
        }
    }

    /// 按配置构造 count 个实例（kernel 类型下即每条并发轨迹一个独立内核）
    pub async fn provision(section: &SandboxSection, count: usize) -> Result<Self, RolloutError> {
        let mut sandboxes = Vec::with_capacity(count.max(1));
        for _ in 0..count.max(1) {
            match build_sandbox(section).await {
                Ok(s) => sandboxes.push(s),
                Err(e) => {
                    let partial = Self::new(sandboxes).ok();
                    if let Some(partial) = partial {
                        let _ = partial.teardown_all().await;
                    }
                    return Err(e);
                }
            }
        }
        Self::new(sandboxes)
    }

    pub fn len(&self) -> usize {
        self.sandboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sandboxes.is_empty()
    }

    pub fn for_trajectory(&self, index: usize) -> Arc<dyn CodeSandbox> {
        self.sandboxes[index % self.sandboxes.len()].clone()
    }

    /// 销毁全部实例；重复调用无副作用。返回第一个销毁错误（其余照常销毁）
    pub async fn teardown_all(&self) -> Result<(), RolloutError> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut first_err = None;
        for sandbox in &self.sandboxes {
            if let Err(e) = sandbox.teardown().await {
                tracing::warn!(kind = sandbox.kind(), error = %e, "sandbox teardown failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
