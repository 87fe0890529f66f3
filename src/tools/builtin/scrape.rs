//! Web page scraping: fetch a page and return the text relevant to a query.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};

use crate::tools::tool::{Tool, ToolContext, ToolError, require_str};

/// Character budget for the returned text.
pub const MAX_SCRAPED_CHARS: usize = 4000;

/// Bytes read from a page; the rest of the body is never downloaded.
const MAX_PAGE_BYTES: usize = 2 * 1024 * 1024;

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>").unwrap());
static BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?(p|div|br|li|h[1-6]|tr|section|article)[^>]*>").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\r\f]+").unwrap());

/// Web scraping tool.
pub struct WebScrapeTool {
    client: reqwest::Client,
    max_page_bytes: usize,
}

impl WebScrapeTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            max_page_bytes: MAX_PAGE_BYTES,
        }
    }

    pub fn with_max_page_bytes(mut self, max_page_bytes: usize) -> Self {
        self.max_page_bytes = max_page_bytes;
        self
    }
}

impl Default for WebScrapeTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip markup, keeping one line per block element.
pub fn html_to_text(html: &str) -> String {
    let text = SCRIPT_RE.replace_all(html, " ");
    let text = BLOCK_RE.replace_all(&text, "\n");
    let text = TAG_RE.replace_all(&text, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    text.lines()
        .map(|line| SPACE_RE.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Lines mentioning any query term; all lines when nothing matches.
fn select_relevant(text: &str, query: &str) -> String {
    let terms: Vec<String> = query
        .split_whitespace()
        .filter(|t| t.chars().count() > 2)
        .map(str::to_lowercase)
        .collect();
    if terms.is_empty() {
        return text.to_string();
    }
    let matching: Vec<&str> = text
        .lines()
        .filter(|line| {
            let lower = line.to_lowercase();
            terms.iter().any(|t| lower.contains(t))
        })
        .collect();
    if matching.is_empty() {
        text.to_string()
    } else {
        matching.join("\n")
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_offset, _)) => text[..byte_offset].to_string(),
        None => text.to_string(),
    }
}

#[async_trait]
impl Tool for WebScrapeTool {
    fn name(&self) -> &str {
        "get_web_content"
    }

    fn source_name(&self) -> &str {
        "WebScraper"
    }

    fn description(&self) -> &str {
        "Scrape web content based on URL and query"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "Website URL"},
                "query": {"type": "string", "description": "Query for the information needed"}
            },
            "required": ["url", "query"]
        })
    }

    async fn invoke(&self, params: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let url = require_str(&params, "url")?;
        let query = require_str(&params, "query")?;

        let mut resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("An unexpected error occurred: {}", e)))?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Ok(json!({
                "error": format!("Failed to get content. Status Code: {}", status.as_u16())
            }));
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("An unexpected error occurred: {}", e)))?
        {
            let room = self.max_page_bytes - bytes.len();
            if chunk.len() >= room {
                bytes.extend_from_slice(&chunk[..room]);
                break;
            }
            bytes.extend_from_slice(&chunk);
        }
        let page = String::from_utf8_lossy(&bytes);

        let text = select_relevant(&html_to_text(&page), query);
        if text.is_empty() {
            return Ok(json!({ "result": "No data found for the given query" }));
        }

        let truncated = text.chars().count() > MAX_SCRAPED_CHARS;
        Ok(json!({
            "result": truncate_chars(&text, MAX_SCRAPED_CHARS),
            "truncated": truncated,
        }))
    }
}
