//! Client for the Ollama `/api/chat` endpoint.

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

use super::provider::{
    CompletionInput, CompletionOutput, CompletionStream, LlmError, LlmProvider, LlmResult,
    StreamEvent,
};
use crate::http::client::HttpClient;

/// Generation settings fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    http: HttpClient,
    base_url: String,
    model: String,
    options: GenerationOptions,
}

impl OllamaProvider {
    pub fn new(
        http: HttpClient,
        base_url: impl Into<String>,
        model: impl Into<String>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            options,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn build_request<'a>(&'a self, input: &'a CompletionInput, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &input.prompt,
            }],
            stream,
            options: ChatOptions {
                temperature: self.options.temperature,
                num_predict: self.options.max_tokens,
            },
        }
    }

    fn map_send_error(&self, err: reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout
        } else if err.is_connect() {
            LlmError::Unreachable(self.base_url.clone())
        } else {
            LlmError::Transport(err.to_string())
        }
    }
}

impl LlmProvider for OllamaProvider {
    async fn generate(&self, input: CompletionInput) -> LlmResult<CompletionOutput> {
        let payload = self.build_request(&input, false);
        let resp = self
            .http
            .post_json(&self.endpoint(), &payload)
            .await
            .map_err(|err| self.map_send_error(err))?;

        if !(200..300).contains(&resp.status) {
            return Err(status_error(resp.status, &resp.body));
        }

        let chunk = serde_json::from_str::<ChatChunk>(&resp.body)
            .map_err(|err| LlmError::Parse(err.to_string()))?;
        if let Some(error) = chunk.error {
            return Err(LlmError::Backend(error));
        }

        Ok(CompletionOutput {
            text: chunk.message.map(|m| m.content).unwrap_or_default(),
        })
    }

    async fn generate_stream(&self, input: CompletionInput) -> LlmResult<CompletionStream> {
        let payload = self.build_request(&input, true);
        let resp = self
            .http
            .post_json_streaming(&self.endpoint(), &payload)
            .await
            .map_err(|err| self.map_send_error(err))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(status_error(status, &body));
        }

        debug!(model = %self.model, "streaming completion started");
        Ok(CompletionStream::new(event_stream(resp.bytes_stream().boxed())))
    }
}

fn status_error(status: u16, body: &str) -> LlmError {
    let body = serde_json::from_str::<ChatChunk>(body)
        .ok()
        .and_then(|chunk| chunk.error)
        .unwrap_or_else(|| body.chars().take(400).collect());
    LlmError::HttpStatus { status, body }
}

struct StreamState {
    bytes: BoxStream<'static, reqwest::Result<Bytes>>,
    lines: LineBuffer,
    pending: VecDeque<StreamEvent>,
    exhausted: bool,
}

fn event_stream(
    bytes: BoxStream<'static, reqwest::Result<Bytes>>,
) -> BoxStream<'static, StreamEvent> {
    let state = StreamState {
        bytes,
        lines: LineBuffer::default(),
        pending: VecDeque::new(),
        exhausted: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            if state.exhausted {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for line in state.lines.push(&chunk) {
                        state.pending.extend(decode_line(&line));
                    }
                }
                Some(Err(err)) => {
                    state.exhausted = true;
                    let err = if err.is_timeout() {
                        LlmError::Timeout
                    } else {
                        LlmError::Transport(err.to_string())
                    };
                    state.pending.push_back(StreamEvent::Failed(err));
                }
                None => {
                    state.exhausted = true;
                    if let Some(line) = state.lines.finish() {
                        state.pending.extend(decode_line(&line));
                    }
                }
            }
        }
    })
    .boxed()
}

/// Splits a byte stream into newline-terminated records.
#[derive(Debug, Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            lines.push(line);
        }
        lines
    }

    fn finish(&mut self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }
}

fn decode_line(line: &[u8]) -> Vec<StreamEvent> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Vec::new();
    }

    let chunk = match serde_json::from_slice::<ChatChunk>(line) {
        Ok(chunk) => chunk,
        Err(err) => return vec![StreamEvent::Failed(LlmError::Parse(err.to_string()))],
    };
    if let Some(error) = chunk.error {
        return vec![StreamEvent::Failed(LlmError::Backend(error))];
    }

    let mut events = Vec::new();
    if let Some(message) = chunk.message {
        if !message.content.is_empty() {
            events.push(StreamEvent::Fragment(message.content));
        }
    }
    if chunk.done {
        events.push(StreamEvent::Done);
    }
    events
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

#[cfg(test)]
mod tests {
    use super::{GenerationOptions, LineBuffer, OllamaProvider, decode_line};
    use crate::http::client::HttpClient;
    use crate::http::debug::HttpDebugConfig;
    use crate::llm::provider::{CompletionInput, LlmError, LlmProvider, StreamEvent};
    use reqwest::Client;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const OPTIONS: GenerationOptions = GenerationOptions {
        temperature: 0.8,
        max_tokens: 10_000,
    };

    fn provider(base_url: &str) -> OllamaProvider {
        OllamaProvider::new(
            HttpClient::new(Client::new(), HttpDebugConfig::disabled()),
            base_url,
            "qwen2.5:7b",
            OPTIONS,
        )
    }

    fn provider_with_timeout(base_url: &str, timeout: Duration) -> OllamaProvider {
        let client = Client::builder().timeout(timeout).build().expect("client");
        OllamaProvider::new(
            HttpClient::new(client, HttpDebugConfig::disabled()),
            base_url,
            "qwen2.5:7b",
            OPTIONS,
        )
    }

    /// Backend that sends headers promising a long body, one NDJSON record,
    /// and then either stalls or hangs up.
    async fn cut_off_backend(first_record: &'static str, hang_up: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut request = vec![0_u8; 16 * 1024];
            let _ = socket.read(&mut request).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ncontent-length: 65536\r\n\r\n{first_record}"
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.flush().await;
            if hang_up {
                drop(socket);
            } else {
                std::future::pending::<()>().await;
            }
        });
        format!("http://{addr}")
    }

    fn input(prompt: &str) -> CompletionInput {
        CompletionInput {
            prompt: prompt.to_string(),
        }
    }

    fn ndjson(lines: &[serde_json::Value]) -> String {
        lines
            .iter()
            .map(|line| format!("{line}\n"))
            .collect::<String>()
    }

    #[tokio::test]
    async fn generate_sends_fixed_options_and_returns_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({
                "model": "qwen2.5:7b",
                "stream": false,
                "messages": [{"role": "user", "content": "where is login"}],
                "options": {"num_predict": 10000}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "Click the top-right button."},
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let out = provider(&server.uri())
            .generate(input("where is login"))
            .await
            .expect("success response");

        assert_eq!(out.text, "Click the top-right button.");
    }

    #[tokio::test]
    async fn generate_maps_http_error_status_using_backend_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(json!({"error": "model \"qwen2.5:7b\" not found"})),
            )
            .mount(&server)
            .await;

        let err = provider(&server.uri())
            .generate(input("hello"))
            .await
            .expect_err("expected status error");

        assert_eq!(
            err,
            LlmError::HttpStatus {
                status: 404,
                body: "model \"qwen2.5:7b\" not found".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn generate_reports_unreachable_backend() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let base_url = format!("http://{}", listener.local_addr().expect("addr"));
        drop(listener);

        let err = provider(&base_url)
            .generate(input("hello"))
            .await
            .expect_err("closed port should fail");

        assert_eq!(err, LlmError::Unreachable(base_url));
    }

    #[tokio::test]
    async fn generate_rejects_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = provider(&server.uri())
            .generate(input("hello"))
            .await
            .expect_err("parse error");

        assert!(matches!(err, LlmError::Parse(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn stream_yields_fragments_then_done() {
        let server = MockServer::start().await;
        let body = ndjson(&[
            json!({"message": {"role": "assistant", "content": "Open "}, "done": false}),
            json!({"message": {"role": "assistant", "content": "settings"}, "done": false}),
            json!({"message": {"role": "assistant", "content": ""}, "done": true}),
        ]);
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let mut stream = provider(&server.uri())
            .generate_stream(input("where"))
            .await
            .expect("stream");

        let mut events = Vec::new();
        while let Some(event) = stream.next_event().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                StreamEvent::Fragment("Open ".to_string()),
                StreamEvent::Fragment("settings".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn stream_and_batch_agree_on_final_text() {
        let server = MockServer::start().await;
        let body = ndjson(&[
            json!({"message": {"content": "第一步，"}, "done": false}),
            json!({"message": {"content": "点击登录"}, "done": false}),
            json!({"done": true}),
        ]);
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"content": "第一步，点击登录"},
                "done": true
            })))
            .mount(&server)
            .await;

        let provider = provider(&server.uri());
        let streamed = provider
            .generate_stream(input("q"))
            .await
            .expect("stream")
            .collect_text()
            .await
            .expect("complete stream");
        let batched = provider.generate(input("q")).await.expect("batched").text;

        assert_eq!(streamed, batched);
    }

    #[tokio::test]
    async fn stream_error_after_fragments_is_distinguishable_from_completion() {
        let server = MockServer::start().await;
        let body = ndjson(&[
            json!({"message": {"content": "partial"}, "done": false}),
            json!({"error": "out of memory"}),
        ]);
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let mut stream = provider(&server.uri())
            .generate_stream(input("q"))
            .await
            .expect("stream");

        assert_eq!(
            stream.next_event().await,
            Some(StreamEvent::Fragment("partial".to_string()))
        );
        assert_eq!(
            stream.next_event().await,
            Some(StreamEvent::Failed(LlmError::Backend(
                "out of memory".to_string()
            )))
        );
        assert_eq!(stream.next_event().await, None);
    }

    #[tokio::test]
    async fn generate_times_out_on_slow_backend() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"message": {"content": "late"}, "done": true}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let err = provider_with_timeout(&server.uri(), Duration::from_millis(200))
            .generate(input("q"))
            .await
            .expect_err("slow backend should time out");

        assert_eq!(err, LlmError::Timeout);
    }

    #[tokio::test]
    async fn stream_stalling_after_a_fragment_times_out() {
        let base_url = cut_off_backend(
            "{\"message\":{\"content\":\"Go to \"},\"done\":false}\n",
            false,
        )
        .await;

        let mut stream = provider_with_timeout(&base_url, Duration::from_millis(300))
            .generate_stream(input("q"))
            .await
            .expect("headers arrive before the timeout");

        assert_eq!(
            stream.next_event().await,
            Some(StreamEvent::Fragment("Go to ".to_string()))
        );
        assert_eq!(
            stream.next_event().await,
            Some(StreamEvent::Failed(LlmError::Timeout))
        );
        assert_eq!(stream.next_event().await, None);
    }

    #[tokio::test]
    async fn stream_cut_by_backend_after_a_fragment_fails() {
        let base_url = cut_off_backend(
            "{\"message\":{\"content\":\"Open \"},\"done\":false}\n",
            true,
        )
        .await;

        let mut stream = provider(&base_url)
            .generate_stream(input("q"))
            .await
            .expect("stream");

        assert_eq!(
            stream.next_event().await,
            Some(StreamEvent::Fragment("Open ".to_string()))
        );
        match stream.next_event().await {
            Some(StreamEvent::Failed(LlmError::Transport(_))) => {}
            other => panic!("expected transport failure, got {other:?}"),
        }
        assert_eq!(stream.next_event().await, None);
    }

    #[tokio::test]
    async fn stream_without_done_marker_is_truncated() {
        let server = MockServer::start().await;
        let body = ndjson(&[json!({"message": {"content": "half"}, "done": false})]);
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let result = provider(&server.uri())
            .generate_stream(input("q"))
            .await
            .expect("stream")
            .collect_text()
            .await;

        assert_eq!(result, Err(LlmError::Truncated));
    }

    #[tokio::test]
    async fn stream_request_failure_is_reported_before_any_fragment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("backend exploded"))
            .mount(&server)
            .await;

        let err = provider(&server.uri())
            .generate_stream(input("q"))
            .await
            .expect_err("status error");

        assert_eq!(
            err,
            LlmError::HttpStatus {
                status: 500,
                body: "backend exploded".to_string(),
            }
        );
    }

    #[test]
    fn line_buffer_joins_records_split_across_chunks() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"{\"done\":").is_empty());
        let lines = buffer.push(b"true}\n{\"do");
        assert_eq!(lines, vec![b"{\"done\":true}".to_vec()]);
        assert_eq!(buffer.finish(), Some(b"{\"do".to_vec()));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn line_buffer_keeps_multibyte_text_intact_across_chunks() {
        let record = "{\"message\":{\"content\":\"导航\"}}\n".as_bytes();
        let (head, tail) = record.split_at(25);
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(head).is_empty());
        let lines = buffer.push(tail);

        assert_eq!(
            decode_line(&lines[0]),
            vec![StreamEvent::Fragment("导航".to_string())]
        );
    }

    #[test]
    fn decode_line_skips_blank_lines_and_reports_garbage() {
        assert!(decode_line(b"  \r").is_empty());
        assert!(matches!(
            decode_line(b"<html>").as_slice(),
            [StreamEvent::Failed(LlmError::Parse(_))]
        ));
    }
}
