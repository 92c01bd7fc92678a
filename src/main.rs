//! rollout-sandbox：从 stdin 读代码，交给配置的沙箱执行并打印输出
//!
//! 沙箱类型等由 config/default.toml 与 ROLLOUT__* 环境变量决定，例如
//! `echo 'print(1 + 1)' | ROLLOUT__SANDBOX__KIND=kernel rollout-sandbox`。

use std::time::Duration;

use anyhow::Context;
use tokio::io::AsyncReadExt;

use rollout::config::load_config;
use rollout::observability;
use rollout::sandbox::build_sandbox;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load config")?;

    let mut code = String::new();
    tokio::io::stdin()
        .read_to_string(&mut code)
        .await
        .context("Failed to read code from stdin")?;

    let sandbox = build_sandbox(&cfg.sandbox)
        .await
        .context("Failed to build sandbox")?;

    let result = sandbox
        .execute(&code, Duration::from_secs(cfg.sandbox.timeout_secs))
        .await;
    let teardown = sandbox.teardown().await;

    let output = result.context("Sandbox execution failed")?;
    println!("{output}");
    teardown.context("Sandbox teardown failed")?;
    Ok(())
}
