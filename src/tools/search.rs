//! Search 工具：调用维基检索服务
//!
//! `POST {base_url}/search?query=..&top_n=..`，响应为 `{results: [{rank, score, document: {id, title, body}}]}`；
//! 结果渲染为 "Document {rank}: {title}\n{body}" 块，超过 max_result_chars 时截断。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::conversation::RunContext;
use crate::tools::{ArgSpec, Tool, ToolArgs, ToolSchema};

const DEFAULT_MAX_RESULT_CHARS: usize = 8000;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    rank: usize,
    document: SearchDocument,
}

#[derive(Debug, Deserialize)]
struct SearchDocument {
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: String,
}

/// Search 工具：抓取检索服务的 top-n 文档
pub struct SearchTool {
    client: Client,
    base_url: String,
    default_top_n: usize,
    max_result_chars: usize,
}

impl SearchTool {
    pub fn new(base_url: impl Into<String>, default_top_n: usize, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_top_n,
            max_result_chars: DEFAULT_MAX_RESULT_CHARS,
        }
    }

    pub fn with_max_result_chars(mut self, max: usize) -> Self {
        self.max_result_chars = max;
        self
    }
}

fn render_results(results: &[SearchResult], max_chars: usize) -> String {
    if results.is_empty() {
        return "No results found.".to_string();
    }
    let text = results
        .iter()
        .map(|r| format!("Document {}: {}\n{}", r.rank, r.document.title, r.document.body.trim()))
        .collect::<Vec<_>>()
        .join("\n\n");
    if text.chars().count() > max_chars {
        format!("{}...[truncated]", text.chars().take(max_chars).collect::<String>())
    } else {
        text
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("search", "Searches Wikipedia and returns the most relevant documents.")
            .arg(ArgSpec::new("query", "str").describe("The search query"))
            .arg(
                ArgSpec::new("top_n", "int")
                    .describe("Number of documents to return")
                    .with_default(json!(self.default_top_n)),
            )
            .example(r#"{"name": "search", "args": {"query": "capital of France"}}"#)
    }

    async fn execute(&self, args: ToolArgs, _ctx: RunContext<'_>) -> Result<String, String> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| "query must be a non-empty string".to_string())?;
        let top_n = args
            .get("top_n")
            .and_then(Value::as_u64)
            .unwrap_or(self.default_top_n as u64);

        tracing::info!(query = %query, top_n, "search tool execute");

        let url = format!("{}/search", self.base_url);
        let resp = self
            .client
            .post(&url)
            .query(&[("query", query.to_string()), ("top_n", top_n.to_string())])
            .send()
            .await
            .map_err(|e| format!("Search request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("Search service returned {}", resp.status()));
        }
        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| format!("Invalid search response: {e}"))?;
        Ok(render_results(&body.results, self.max_result_chars))
    }
}
