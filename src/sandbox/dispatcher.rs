//! 代码调度器：把 `<code>` 内容交给轨迹对应的沙箱执行
//!
//! 沙箱不可用（Err）时转为 "Error: Code execution failed: ..." 文本，从不向环境抛错。

use std::time::{Duration, Instant};

use crate::core::RolloutError;
use crate::observability::preview;
use crate::sandbox::SandboxRegistry;

/// 默认单次执行超时
pub const DEFAULT_CODE_TIMEOUT_SECS: u64 = 10;
/// 沙箱自身的超时之外留给创建、删除等控制请求的时间；超过 timeout + grace 即放弃等待
const DISPATCH_GRACE: Duration = Duration::from_secs(20);

pub struct CodeDispatcher {
    sandboxes: SandboxRegistry,
    timeout: Duration,
    grace: Duration,
}

impl CodeDispatcher {
    pub fn new(sandboxes: SandboxRegistry, timeout_secs: u64) -> Self {
        Self {
            sandboxes,
            timeout: Duration::from_secs(timeout_secs),
            grace: DISPATCH_GRACE,
        }
    }

    pub fn sandboxes(&self) -> &SandboxRegistry {
        &self.sandboxes
    }

    pub async fn dispatch(&self, trajectory: usize, code: &str) -> String {
        let sandbox = self.sandboxes.for_trajectory(trajectory);
        let start = Instant::now();
        let bounded =
            tokio::time::timeout(self.timeout + self.grace, sandbox.execute(code, self.timeout)).await;
        let timed_out = bounded.is_err();

        let audit = serde_json::json!({
            "event": "code_audit",
            "sandbox": sandbox.kind(),
            "trajectory": trajectory,
            "ok": matches!(bounded, Ok(Ok(_))),
            "timed_out": timed_out,
            "duration_ms": start.elapsed().as_millis() as u64,
            "code_preview": preview(code),
        });
        tracing::info!(audit = %audit.to_string(), "code");

        match bounded {
            Err(_) => {
                tracing::warn!(sandbox = sandbox.kind(), trajectory, "sandbox exceeded its time budget");
                format!(
                    "Error: Code execution timed out after {} seconds",
                    self.timeout.as_secs()
                )
            }
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!(sandbox = sandbox.kind(), error = %e, "sandbox execution failed");
                format!("Error: Code execution failed: {e}")
            }
        }
    }

    pub async fn teardown(&self) -> Result<(), RolloutError> {
        self.sandboxes.teardown_all().await
    }
}
