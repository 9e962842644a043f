use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::SearchConfig;
use crate::error::{PipelineError, Result};
use crate::http::{response_json_or_error, truncate_text};

pub const SEARCH_TOOL_NAME: &str = "web_search";

#[derive(Debug, Serialize)]
struct TavilySearchRequest<'a> {
    query: &'a str,
    max_results: u32,
    search_depth: &'a str,
    include_answer: bool,
}

#[derive(Debug, Default, Deserialize)]
struct TavilySearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,
}

pub struct WebSearch {
    api_base: String,
    api_key: String,
    max_results: u32,
    search_depth: String,
    timeout: Option<Duration>,
    http: HttpClient,
}

impl WebSearch {
    pub fn new(api_base: &str, api_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            max_results: 5,
            search_depth: "basic".to_string(),
            timeout: None,
            http: HttpClient::new(),
        }
    }

    pub fn from_config(config: &SearchConfig, timeout: Option<Duration>) -> Option<Self> {
        let api_key = config.api_key.trim();
        if api_key.is_empty() {
            return None;
        }
        let mut search = Self::new(&config.api_base, api_key);
        search.max_results = config.max_results.max(1);
        search.search_depth = config.search_depth.clone();
        search.timeout = timeout;
        Some(search)
    }

    pub fn function_declaration() -> Value {
        json!({
            "name": SEARCH_TOOL_NAME,
            "description": "Search the web for medical literature and reference pages. Returns titles, URLs and content excerpts.",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query, e.g. a finding plus 'PubMed' or 'WHO'.",
                    },
                },
                "required": ["query"],
            },
        })
    }

    pub fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let payload = TavilySearchRequest {
            query,
            max_results: self.max_results,
            search_depth: &self.search_depth,
            include_answer: false,
        };
        let mut request = self
            .http
            .post(format!("{}/search", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&payload);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().map_err(|err| {
            PipelineError::external("Tavily", format!("transport error: {}", err.without_url()))
        })?;
        let parsed = response_json_or_error("Tavily", response)?;
        let decoded: TavilySearchResponse = serde_json::from_value(parsed).map_err(|err| {
            PipelineError::external("Tavily", format!("unexpected response shape: {err}"))
        })?;
        Ok(decoded.results)
    }

    /// Runs one model-issued function call and builds the function response.
    /// Failures go back to the model as an `error` field.
    pub(crate) fn respond(&self, name: &str, args: &Value) -> Value {
        if name != SEARCH_TOOL_NAME {
            warn!(tool = name, "model called an unknown tool");
            return json!({ "error": format!("unknown tool '{name}'") });
        }
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if query.is_empty() {
            return json!({ "error": "missing 'query' argument" });
        }

        match self.search(query) {
            Ok(hits) => {
                info!(query = %truncate_text(query, 120), hits = hits.len(), "web search finished");
                json!({ "results": hits })
            }
            Err(err) => {
                warn!(query = %truncate_text(query, 120), %err, "web search failed");
                json!({ "error": err.to_string() })
            }
        }
    }
}
