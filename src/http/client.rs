use super::debug::{HttpDebugConfig, format_headers, truncate_for_log};
use crate::trace::{SessionTrace, TraceKind};
use reqwest::Client;
use reqwest::header::HeaderMap;
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// reqwest wrapper that mirrors backend traffic into debug logs. With a session
/// trace attached it also records each request line and response status.
#[derive(Clone)]
pub struct HttpClient {
    inner: Client,
    debug: HttpDebugConfig,
    trace: Option<SessionTrace>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("debug", &self.debug)
            .field("trace", &self.trace.is_some())
            .finish()
    }
}

impl HttpClient {
    pub fn new(inner: Client, debug: HttpDebugConfig) -> Self {
        Self {
            inner,
            debug,
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: SessionTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
    ) -> Result<HttpResponseData, reqwest::Error> {
        let response = self.send(url, payload).await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await?;

        self.log_response(status, &headers, Some(&body));
        Ok(HttpResponseData { status, body })
    }

    /// Sends the request and hands back the response with its body unread.
    ///
    /// Only the status line and headers are logged; the body belongs to the caller.
    pub async fn post_json_streaming<T: Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let response = self.send(url, payload).await?;
        self.log_response(response.status().as_u16(), response.headers(), None);
        Ok(response)
    }

    async fn send<T: Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let body_json = serde_json::to_string(payload)
            .unwrap_or_else(|err| format!("{{\"_serialization_error\":\"{err}\"}}"));

        let request = self.inner.post(url).json(payload).build()?;
        if self.debug.enabled {
            for line in request_log_lines(self.debug, &request, &body_json) {
                debug!(target: "navchat::http", "{line}");
            }
        }
        if let Some(trace) = &self.trace {
            trace.record(
                TraceKind::Request,
                &format!("{} {} {body_json}", request.method(), request.url()),
            );
        }

        self.inner.execute(request).await.inspect_err(|err| {
            debug!(target: "navchat::http", "request to {url} failed: {err}");
        })
    }

    fn log_response(&self, status: u16, headers: &HeaderMap, body: Option<&str>) {
        if self.debug.enabled {
            for line in response_log_lines(self.debug, status, headers, body) {
                debug!(target: "navchat::http", "{line}");
            }
        }
        if let Some(trace) = &self.trace {
            trace.record(TraceKind::Status, &status.to_string());
        }
    }
}

fn request_log_lines(
    debug: HttpDebugConfig,
    request: &reqwest::Request,
    body_json: &str,
) -> Vec<String> {
    let body = truncate_for_log(body_json, debug.max_body_chars);

    let mut lines = Vec::new();
    lines.push(format!("[http-debug] > {} {}", request.method(), request.url()));
    for header in format_headers(request.headers()) {
        lines.push(format!("[http-debug] > {header}"));
    }
    lines.push("[http-debug] >".to_string());
    append_body_lines(&mut lines, '>', &body);
    lines
}

fn response_log_lines(
    debug: HttpDebugConfig,
    status: u16,
    headers: &HeaderMap,
    body: Option<&str>,
) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!("[http-debug] < HTTP {status}"));
    for header in format_headers(headers) {
        lines.push(format!("[http-debug] < {header}"));
    }
    lines.push("[http-debug] <".to_string());
    match body {
        Some(body) => {
            let body = truncate_for_log(body, debug.max_body_chars);
            append_body_lines(&mut lines, '<', &body);
        }
        None => lines.push("[http-debug] < <streamed body>".to_string()),
    }
    lines
}

fn append_body_lines(lines: &mut Vec<String>, direction: char, body: &str) {
    if body.is_empty() {
        lines.push(format!("[http-debug] {direction} <empty body>"));
        return;
    }

    for line in body.lines() {
        lines.push(format!("[http-debug] {direction} {line}"));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponseData {
    pub status: u16,
    pub body: String,
}
