//! Local stand-in for the model and search HTTP endpoints.

use std::io::Read;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::Value;

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub url: String,
    pub body: Value,
    pub authorization: Option<String>,
}

/// Serves the canned `(status, body)` pairs in order, one per request, then
/// stops. Each received request is recorded for inspection.
pub(crate) struct FakeEndpoint {
    port: u16,
    requests: mpsc::Receiver<RecordedRequest>,
}

impl FakeEndpoint {
    pub fn serve(responses: Vec<(u16, Value)>) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("bind fake endpoint");
        let port = server
            .server_addr()
            .to_ip()
            .map(|addr| addr.port())
            .expect("fake endpoint port");
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            for (status, body) in responses {
                let mut request = match server.recv_timeout(RECV_TIMEOUT) {
                    Ok(Some(request)) => request,
                    _ => return,
                };
                let mut raw = String::new();
                let _ = request.as_reader().read_to_string(&mut raw);
                let authorization = request
                    .headers()
                    .iter()
                    .find(|header| header.field.equiv("Authorization"))
                    .map(|header| header.value.as_str().to_string());
                let _ = tx.send(RecordedRequest {
                    url: request.url().to_string(),
                    body: serde_json::from_str(&raw).unwrap_or(Value::Null),
                    authorization,
                });
                let content_type =
                    tiny_http::Header::from_bytes("Content-Type", "application/json")
                        .expect("static header");
                let response = tiny_http::Response::from_string(body.to_string())
                    .with_status_code(status)
                    .with_header(content_type);
                let _ = request.respond(response);
            }
        });

        Self { port, requests: rx }
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn next_request(&self) -> anyhow::Result<RecordedRequest> {
        Ok(self.requests.recv_timeout(RECV_TIMEOUT)?)
    }
}
