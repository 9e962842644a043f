use std::fs;
use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::GeminiConfig;
use crate::error::{PipelineError, Result};
use crate::generator::TextGenerator;
use crate::http::response_json_or_error;
use crate::search::WebSearch;

const SERVICE: &str = "Gemini";

#[derive(Debug, Clone, PartialEq)]
struct FunctionCall {
    name: String,
    args: Value,
}

pub struct GeminiClient {
    api_base: String,
    api_key: String,
    model: String,
    system_instruction: Option<String>,
    search: Option<WebSearch>,
    max_tool_rounds: u32,
    timeout: Option<Duration>,
    http: HttpClient,
}

impl GeminiClient {
    pub fn new(api_base: &str, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            system_instruction: None,
            search: None,
            max_tool_rounds: 0,
            timeout: None,
            http: HttpClient::new(),
        }
    }

    pub fn from_config(config: &GeminiConfig, model: &str) -> Self {
        Self::new(&config.api_base, config.api_key.trim(), model)
            .with_timeout(config.request_timeout())
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Lets the model call the search tool for up to `max_tool_rounds`
    /// request/response exchanges before it must answer in text.
    /// Zero rounds leaves search off.
    pub fn with_search(mut self, search: WebSearch, max_tool_rounds: u32) -> Self {
        if max_tool_rounds == 0 {
            return self;
        }
        self.search = Some(search);
        self.max_tool_rounds = max_tool_rounds;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn has_search(&self) -> bool {
        self.search.is_some()
    }

    fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(&self, contents: &[Value], allow_tools: bool) -> Value {
        let mut payload = Map::new();
        payload.insert("contents".to_string(), Value::Array(contents.to_vec()));
        if let Some(instruction) = self.system_instruction.as_deref() {
            payload.insert(
                "systemInstruction".to_string(),
                json!({ "parts": [{ "text": instruction }] }),
            );
        }
        if allow_tools {
            payload.insert(
                "tools".to_string(),
                json!([{ "functionDeclarations": [WebSearch::function_declaration()] }]),
            );
        }
        Value::Object(payload)
    }

    fn post(&self, payload: &Value) -> Result<Value> {
        let endpoint = self.endpoint();
        let mut request = self
            .http
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(payload);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().map_err(|err| {
            PipelineError::external(
                SERVICE,
                format!("transport error ({endpoint}): {}", err.without_url()),
            )
        })?;
        response_json_or_error(SERVICE, response)
    }

    fn text_answer(&self, response: &Value, parts: &[Value]) -> Result<String> {
        let text = extract_text(parts);
        if text.trim().is_empty() {
            let reason = response
                .pointer("/candidates/0/finishReason")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            return Err(PipelineError::external(
                SERVICE,
                format!("{} returned no text (finishReason={reason})", self.model),
            ));
        }
        Ok(text)
    }
}

impl TextGenerator for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    fn generate(&self, prompt: &str, image: Option<&Path>) -> Result<String> {
        let mut parts = Vec::new();
        if let Some(path) = image {
            parts.push(image_part_from_path(path)?);
        }
        parts.push(json!({ "text": prompt }));
        let mut contents = vec![json!({ "role": "user", "parts": parts })];

        let tool_rounds = if self.search.is_some() {
            self.max_tool_rounds
        } else {
            0
        };
        for round in 0..=tool_rounds {
            let allow_tools = round < tool_rounds;
            debug!(model = %self.model, round, allow_tools, "sending generateContent request");
            let response = self.post(&self.build_payload(&contents, allow_tools))?;
            let parts = first_candidate_parts(&response)?;

            let Some(search) = self.search.as_ref().filter(|_| allow_tools) else {
                return self.text_answer(&response, &parts);
            };
            let calls = extract_function_calls(&parts);
            if calls.is_empty() {
                return self.text_answer(&response, &parts);
            }

            debug!(model = %self.model, round, calls = calls.len(), "model requested tool calls");
            contents.push(json!({ "role": "model", "parts": parts }));
            let replies = calls
                .iter()
                .map(|call| {
                    json!({
                        "functionResponse": {
                            "name": call.name,
                            "response": search.respond(&call.name, &call.args),
                        }
                    })
                })
                .collect::<Vec<Value>>();
            contents.push(json!({ "role": "user", "parts": replies }));
        }

        Err(PipelineError::external(
            SERVICE,
            format!("{} kept calling tools without answering", self.model),
        ))
    }
}

fn image_part_from_path(path: &Path) -> Result<Value> {
    let bytes = fs::read(path)
        .map_err(|err| PipelineError::io(format!("failed reading {}", path.display()), err))?;
    Ok(json!({
        "inlineData": {
            "mimeType": mime_for_path(path),
            "data": BASE64.encode(bytes),
        }
    }))
}

fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        _ => "image/png",
    }
}

fn first_candidate_parts(response: &Value) -> Result<Vec<Value>> {
    let Some(candidate) = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
    else {
        let reason = response
            .pointer("/promptFeedback/blockReason")
            .and_then(Value::as_str)
            .unwrap_or("no candidates");
        return Err(PipelineError::external(
            SERVICE,
            format!("response has no candidates ({reason})"),
        ));
    };
    Ok(candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default())
}

fn extract_text(parts: &[Value]) -> String {
    parts
        .iter()
        .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<&str>>()
        .join("")
}

fn extract_function_calls(parts: &[Value]) -> Vec<FunctionCall> {
    parts
        .iter()
        .filter_map(|part| part.get("functionCall").or_else(|| part.get("function_call")))
        .filter_map(|call| {
            let name = call.get("name").and_then(Value::as_str)?.to_string();
            let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
            Some(FunctionCall { name, args })
        })
        .collect()
}
