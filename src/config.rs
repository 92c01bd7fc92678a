//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ROLLOUT__*` 覆盖（双下划线表示嵌套，如 `ROLLOUT__SANDBOX__KIND=kernel`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::RolloutError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub rollout: RolloutSection,
    pub sampling: SamplingSection,
    pub sandbox: SandboxSection,
    pub tools: ToolsSection,
}

/// [rollout] 段：步数上限、环境 token 是否屏蔽、后处理并发度
#[derive(Debug, Clone, Deserialize)]
pub struct RolloutSection {
    /// 每条轨迹最多的 assistant 轮数
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// true 时环境注入的 token 掩码为 0（不计入训练损失）
    #[serde(default = "default_true")]
    pub mask_env_response: bool,
    /// 每轮后处理的并发数；1 表示顺序执行
    #[serde(default = "default_n_jobs")]
    pub n_jobs: usize,
}

impl Default for RolloutSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            mask_env_response: true,
            n_jobs: default_n_jobs(),
        }
    }
}

fn default_max_steps() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_n_jobs() -> usize {
    1
}

/// [sampling] 段
#[derive(Debug, Clone, Deserialize)]
pub struct SamplingSection {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_one")]
    pub temperature: f32,
    #[serde(default = "default_one")]
    pub top_p: f32,
    /// 额外 stop 串（如 tokenizer 的 eos / pad）
    #[serde(default)]
    pub stop: Vec<String>,
}

impl Default for SamplingSection {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: 1.0,
            top_p: 1.0,
            stop: Vec::new(),
        }
    }
}

fn default_max_tokens() -> usize {
    1024
}

fn default_one() -> f32 {
    1.0
}

/// 沙箱类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SandboxKind {
    /// 本地子进程（仅限可信输入）
    #[default]
    Local,
    /// 容器内核会话（Jupyter Kernel Gateway）
    Kernel,
    /// 远程托管沙箱
    Remote,
}

/// [sandbox] 段
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxSection {
    #[serde(default)]
    pub kind: SandboxKind,
    #[serde(default = "default_python_command")]
    pub python_command: String,
    #[serde(default = "default_kernel_host")]
    pub kernel_host: String,
    #[serde(default = "default_kernel_port")]
    pub kernel_port: u16,
    #[serde(default = "default_remote_api_url")]
    pub remote_api_url: String,
    /// 远程沙箱 API Key；未设置时读取 E2B_API_KEY
    pub api_key: Option<String>,
    /// 单次执行超时（秒）
    #[serde(default = "default_exec_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            kind: SandboxKind::default(),
            python_command: default_python_command(),
            kernel_host: default_kernel_host(),
            kernel_port: default_kernel_port(),
            remote_api_url: default_remote_api_url(),
            api_key: None,
            timeout_secs: default_exec_timeout_secs(),
        }
    }
}

fn default_python_command() -> String {
    "python3".to_string()
}

fn default_kernel_host() -> String {
    "127.0.0.1".to_string()
}

fn default_kernel_port() -> u16 {
    9999
}

fn default_remote_api_url() -> String {
    "https://api.e2b.dev".to_string()
}

fn default_exec_timeout_secs() -> u64 {
    10
}

/// [tools] 段：工具超时、检索服务地址
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_exec_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_search_url")]
    pub search_url: String,
    #[serde(default = "default_search_top_n")]
    pub search_top_n: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_exec_timeout_secs(),
            search_url: default_search_url(),
            search_top_n: default_search_top_n(),
        }
    }
}

fn default_search_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_search_top_n() -> usize {
    3
}

/// 从 config 目录加载配置，环境变量 ROLLOUT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ROLLOUT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, RolloutError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ROLLOUT")
            .separator("__")
            .try_parsing(true),
    );

    Ok(builder.build()?.try_deserialize()?)
}
