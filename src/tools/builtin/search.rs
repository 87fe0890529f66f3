//! Web search through the Google Custom Search JSON API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::SearchConfig;
use crate::tools::tool::{Tool, ToolContext, ToolError, optional_str, require_str};

const GOOGLE_SEARCH_URL: &str = "https://customsearch.googleapis.com/customsearch/v1";

/// The API refuses more than 10 results per request.
const MAX_RESULTS: u64 = 10;
const DEFAULT_RESULTS: u64 = 3;

const LANGUAGES: &[&str] = &[
    "lang_ar", "lang_bg", "lang_ca", "lang_cs", "lang_da", "lang_de", "lang_el", "lang_en",
    "lang_es", "lang_et", "lang_fi", "lang_fr", "lang_hr", "lang_hu", "lang_id", "lang_is",
    "lang_it", "lang_iw", "lang_ja", "lang_ko", "lang_lt", "lang_lv", "lang_nl", "lang_no",
    "lang_pl", "lang_pt", "lang_ro", "lang_ru", "lang_sk", "lang_sl", "lang_sr", "lang_sv",
    "lang_tr", "lang_uk", "lang_zh-CN", "lang_zh-TW",
];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

/// Web search tool.
pub struct WebSearchTool {
    api_key: Option<String>,
    cse_id: Option<String>,
    endpoint: String,
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            cse_id: config.cse_id.clone(),
            endpoint: GOOGLE_SEARCH_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the tool at a different endpoint (used by tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn source_name(&self) -> &str {
        "Google"
    }

    fn description(&self) -> &str {
        "Execute a web search for the given query and return a list of results"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The user query"
                },
                "language": {
                    "type": "string",
                    "enum": LANGUAGES,
                    "description": "The language to restrict results to. Default to 'lang_en' if not specified."
                },
                "num": {
                    "type": "integer",
                    "description": "Number of results to return (1-10, default 3)"
                }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, params: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let query = require_str(&params, "query")?;
        let (Some(api_key), Some(cse_id)) = (self.api_key.as_deref(), self.cse_id.as_deref())
        else {
            return Err(ToolError::NotConfigured(
                "Google API Key or CSE ID is not provided".to_string(),
            ));
        };
        let language = optional_str(&params, "language")
            .filter(|l| LANGUAGES.contains(l))
            .unwrap_or("lang_en");
        let num = params
            .get("num")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_RESULTS)
            .clamp(1, MAX_RESULTS);
        let num_param = num.to_string();

        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("cx", cse_id),
                ("key", api_key),
                ("lr", language),
                ("num", num_param.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("Search request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(ToolError::ExecutionFailed(format!(
                "Search returned HTTP {}",
                resp.status().as_u16()
            )));
        }

        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("Invalid search response: {}", e)))?;

        if body.items.is_empty() {
            return Ok(json!({ "result": "No results found" }));
        }

        let results: Vec<Value> = body
            .items
            .into_iter()
            .take(num as usize)
            .map(|item| {
                json!({
                    "title": item.title,
                    "link": item.link,
                    "snippet": item.snippet,
                })
            })
            .collect();
        Ok(json!({ "result": results }))
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn configured(server: &MockServer) -> WebSearchTool {
        WebSearchTool::new(&SearchConfig {
            api_key: Some("key".into()),
            cse_id: Some("cx".into()),
        })
        .with_endpoint(server.uri())
    }

    #[tokio::test]
    async fn returns_result_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "rust async"))
            .and(query_param("lr", "lang_en"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"title": "Tokio", "link": "https://tokio.rs", "snippet": "runtime", "kind": "x"},
                    {"title": "Async book", "link": "https://rust-lang.github.io/async-book"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let out = configured(&server)
            .execute(json!({"query": "rust async"}), &ToolContext::default())
            .await;
        let results = out["result"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["title"], "Tokio");
        assert_eq!(results[1]["snippet"], Value::Null);
    }

    #[tokio::test]
    async fn empty_result_set_is_explicit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let out = configured(&server)
            .execute(json!({"query": "nothing"}), &ToolContext::default())
            .await;
        assert_eq!(out, json!({"result": "No results found"}));
    }

    #[tokio::test]
    async fn upstream_failure_becomes_error_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let out = configured(&server)
            .execute(json!({"query": "x"}), &ToolContext::default())
            .await;
        assert_eq!(out, json!({"error": "Search returned HTTP 403"}));
    }

    #[tokio::test]
    async fn missing_credentials() {
        let tool = WebSearchTool::new(&SearchConfig {
            api_key: None,
            cse_id: Some("cx".into()),
        });
        let out = tool
            .execute(json!({"query": "x"}), &ToolContext::default())
            .await;
        assert_eq!(
            out,
            json!({"error": "Google API Key or CSE ID is not provided"})
        );
    }
}
