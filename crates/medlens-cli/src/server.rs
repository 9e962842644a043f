use std::io::Read;

use anyhow::{anyhow, Result};
use medlens_contracts::events::EventWriter;
use medlens_contracts::models::{ModelRegistry, CAPABILITY_VISION};
use medlens_engine::{
    analyze_upload, AnalysisOutcome, CredentialStatus, MedlensConfig, PipelineError, Upload,
    UploadJob,
};
use serde_json::{json, Value};
use tiny_http::{Header, Method, Request, Response};
use tracing::{info, warn};
use uuid::Uuid;

const INDEX_TEMPLATE: &str = include_str!("../assets/index.html");
const FILE_NAME_HEADER: &str = "X-File-Name";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Index,
    Models,
    Analyze { model: Option<String> },
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Reply {
    status: u16,
    content_type: &'static str,
    body: String,
}

impl Reply {
    fn html(body: String) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body,
        }
    }

    fn json(status: u16, value: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string(),
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self::json(status, json!({ "error": message.into() }))
    }
}

/// Serves the upload page and analysis endpoint until the process is stopped.
/// Requests are handled one at a time on the calling thread.
pub fn serve(
    config: &MedlensConfig,
    credentials: CredentialStatus,
    events: Option<&EventWriter>,
) -> Result<()> {
    let bind = config.server.bind.as_str();
    let server =
        tiny_http::Server::http(bind).map_err(|err| anyhow!("failed to bind {bind}: {err}"))?;
    let address = server
        .server_addr()
        .to_ip()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| bind.to_string());
    info!(%address, search_enabled = credentials.search_enabled, "server started");
    eprintln!("Medlens listening on http://{address}");

    let index = render_index(&ModelRegistry::default(), config, credentials);
    for request in server.incoming_requests() {
        handle_request(request, config, events, &index);
    }
    Ok(())
}

fn handle_request(
    mut request: Request,
    config: &MedlensConfig,
    events: Option<&EventWriter>,
    index: &str,
) {
    let method = request.method().clone();
    let url = request.url().to_string();
    let route = route(&method, &url);

    let reply = match route {
        Route::Index => Reply::html(index.to_string()),
        Route::Models => models_reply(&ModelRegistry::default(), config),
        Route::NotFound => Reply::error(404, "not found"),
        Route::Analyze { model } => {
            let limit = config.server.max_upload_bytes;
            let declared = request.body_length().map(|len| len as u64);
            let file_name = header_value(&request, FILE_NAME_HEADER)
                .map(|raw| decode_component(&raw));
            match read_body(request.as_reader(), declared, limit) {
                Ok(bytes) => {
                    let upload = Upload { bytes, file_name };
                    analyze_reply(upload, model.as_deref(), |upload, model| {
                        let request_id = Uuid::new_v4().to_string();
                        let job = UploadJob {
                            request_id: &request_id,
                            requested_model: model,
                            events,
                        };
                        analyze_upload(config, &upload, &job)
                    })
                }
                Err(reply) => reply,
            }
        }
    };

    info!(method = %method, %url, status = reply.status, "request handled");
    let mut response = Response::from_string(reply.body).with_status_code(reply.status);
    if let Ok(header) = Header::from_bytes("Content-Type", reply.content_type) {
        response.add_header(header);
    }
    if let Err(err) = request.respond(response) {
        warn!(%err, %url, "failed to send response");
    }
}

fn route(method: &Method, url: &str) -> Route {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    match (method, path) {
        (Method::Get, "/") | (Method::Get, "/index.html") => Route::Index,
        (Method::Get, "/models") => Route::Models,
        (Method::Post, "/analyze") => Route::Analyze {
            model: query_param(query, "model"),
        },
        _ => Route::NotFound,
    }
}

fn query_param(query: &str, name: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| decode_component(&value.replace('+', " ")))
        .filter(|value| !value.trim().is_empty())
}

fn decode_component(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|value| value.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

fn header_value(request: &Request, name: &'static str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|header| header.field.equiv(name))
        .map(|header| header.value.as_str().trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_body(reader: impl Read, declared: Option<u64>, limit: u64) -> Result<Vec<u8>, Reply> {
    if declared.is_some_and(|len| len > limit) {
        return Err(too_large(limit));
    }
    let mut bytes = Vec::new();
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|err| Reply::error(400, format!("failed to read upload: {err}")))?;
    if bytes.len() as u64 > limit {
        return Err(too_large(limit));
    }
    if bytes.is_empty() {
        return Err(Reply::error(400, "no image provided"));
    }
    Ok(bytes)
}

fn too_large(limit: u64) -> Reply {
    Reply::error(413, format!("upload exceeds the {limit} byte limit"))
}

fn analyze_reply<F>(upload: Upload, model: Option<&str>, analyze: F) -> Reply
where
    F: FnOnce(Upload, Option<&str>) -> Result<AnalysisOutcome, PipelineError>,
{
    match analyze(upload, model) {
        Ok(outcome) => Reply::json(
            200,
            json!({
                "report": outcome.report,
                "model": outcome.model,
                "fallback_reason": outcome.fallback_reason,
                "search_enabled": outcome.search_enabled,
            }),
        ),
        Err(err) => {
            warn!(%err, "analysis failed");
            Reply::error(status_for(&err), err.to_string())
        }
    }
}

fn status_for(err: &PipelineError) -> u16 {
    if err.is_user_input() {
        415
    } else {
        502
    }
}

fn models_reply(registry: &ModelRegistry, config: &MedlensConfig) -> Reply {
    Reply::json(
        200,
        json!({
            "default": config.general.default_model,
            "models": registry.by_capability(CAPABILITY_VISION),
        }),
    )
}

fn render_index(
    registry: &ModelRegistry,
    config: &MedlensConfig,
    credentials: CredentialStatus,
) -> String {
    let mut options = String::new();
    for model in registry.by_capability(CAPABILITY_VISION) {
        let selected = if model.name == config.general.default_model {
            " selected"
        } else {
            ""
        };
        options.push_str(&format!(
            "<option value='{name}'{selected}>{label}</option>",
            name = escape_html(&model.name),
            label = escape_html(&model.label),
        ));
    }
    let notice = if credentials.search_enabled {
        String::new()
    } else {
        "<p class='notice'>TAVILY_API_KEY não definida. A pesquisa médica será limitada.</p>"
            .to_string()
    };
    INDEX_TEMPLATE
        .replace("{{LANG}}", config.general.locale.code())
        .replace("{{MODEL_OPTIONS}}", &options)
        .replace("{{SEARCH_NOTICE}}", &notice)
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}
