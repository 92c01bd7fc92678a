//! 本地子进程沙箱：`python3 -c <code>`，带超时
//!
//! 没有任何隔离，只能用于可信输入。stderr 非空时返回 "Error: <stderr>"，否则返回 stdout（去首尾空白）。

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::core::RolloutError;
use crate::sandbox::CodeSandbox;

pub struct LocalSandbox {
    program: String,
    args: Vec<String>,
}

impl LocalSandbox {
    /// 以 `<python_command> -c <code>` 的方式执行
    pub fn new(python_command: &str) -> Self {
        Self::with_interpreter(python_command, ["-c"])
    }

    /// 自定义解释器与代码前的参数（代码作为最后一个参数传入）
    pub fn with_interpreter<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl CodeSandbox for LocalSandbox {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn execute(&self, code: &str, timeout: Duration) -> Result<String, RolloutError> {
        tracing::debug!(program = %self.program, "local sandbox execute");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(code).kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Err(_) => {
                return Ok(format!(
                    "Error: Code execution timed out after {} seconds",
                    timeout.as_secs()
                ))
            }
            Ok(result) => result.map_err(|e| {
                RolloutError::Sandbox(format!("failed to spawn '{}': {e}", self.program))
            })?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            return Ok(format!("Error: {}", stderr.trim()));
        }
        Ok(stdout.trim().to_string())
    }

    async fn teardown(&self) -> Result<(), RolloutError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> LocalSandbox {
        LocalSandbox::with_interpreter("sh", ["-c"])
    }

    #[tokio::test]
    async fn test_stdout_is_trimmed() {
        let out = shell()
            .execute("echo '  hello  '", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn test_stderr_becomes_error_text() {
        let out = shell()
            .execute("echo partial; echo 'boom' 1>&2", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out, "Error: boom");
    }

    #[tokio::test]
    async fn test_timeout_text() {
        let out = shell()
            .execute("sleep 5", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out, "Error: Code execution timed out after 1 seconds");
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_sandbox_error() {
        let sandbox = LocalSandbox::new("definitely-not-a-python-binary");
        let err = sandbox
            .execute("print(1)", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::Sandbox(_)));
    }
}
