use reqwest::blocking::Response as HttpResponse;
use serde_json::Value;

use crate::error::{PipelineError, Result};

pub(crate) fn response_json_or_error(service: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response.text().map_err(|err| {
        PipelineError::external(
            service,
            format!("response body read failed: {}", err.without_url()),
        )
    })?;
    if !status.is_success() {
        return Err(PipelineError::external(
            service,
            format!("status {code}: {}", truncate_text(&body, 512)),
        ));
    }
    serde_json::from_str(&body).map_err(|err| {
        PipelineError::external(service, format!("invalid JSON payload: {err}"))
    })
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
