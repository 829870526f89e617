use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{self, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use tracing::{debug, warn};

use crate::llm::provider::{LlmError, LlmProvider};
use crate::pipeline::ChatPipeline;

pub const CHAT_PATH: &str = "/chat";
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

const ALLOW_ORIGIN: &str = "*";
const ALLOW_METHODS: &str = "POST, GET, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type";

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: Option<String>,
    pub history: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatReply<'a> {
    response: &'a str,
}

#[derive(Debug, Serialize)]
struct ErrorReply<'a> {
    error: &'a str,
}

#[derive(Debug)]
pub enum ChatError {
    InvalidBody(String),
    BodyTooLarge { limit: usize },
    Llm(LlmError),
}

impl Display for ChatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBody(msg) => write!(f, "invalid request body: {msg}"),
            Self::BodyTooLarge { limit } => {
                write!(f, "request body exceeds {limit} bytes")
            }
            Self::Llm(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ChatError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Llm(err) => Some(err),
            _ => None,
        }
    }
}

impl From<LlmError> for ChatError {
    fn from(err: LlmError) -> Self {
        Self::Llm(err)
    }
}

/// Routes one request. Every response, errors included, carries the CORS
/// headers.
pub async fn handle<P, B>(pipeline: &ChatPipeline<P>, request: Request<B>) -> Response<Full<Bytes>>
where
    P: LlmProvider,
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn Error + Send + Sync>>,
{
    let (parts, body) = request.into_parts();
    debug!(method = %parts.method, path = parts.uri.path(), "request received");

    let mut response = match (&parts.method, parts.uri.path()) {
        (&Method::POST, CHAT_PATH) => chat(pipeline, body).await,
        (&Method::OPTIONS, CHAT_PATH) => empty_response(StatusCode::OK),
        (_, CHAT_PATH) => {
            let mut response = error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("POST, OPTIONS"));
            response
        }
        _ => error_response(StatusCode::NOT_FOUND, "not found"),
    };

    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(ALLOW_ORIGIN),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    response
}

async fn chat<P, B>(pipeline: &ChatPipeline<P>, body: B) -> Response<Full<Bytes>>
where
    P: LlmProvider,
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn Error + Send + Sync>>,
{
    match answer(pipeline, body).await {
        Ok(text) => json_response(StatusCode::OK, &ChatReply { response: &text }),
        Err(err) => {
            warn!(error = %err, "chat request failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
        }
    }
}

async fn answer<P, B>(pipeline: &ChatPipeline<P>, body: B) -> Result<String, ChatError>
where
    P: LlmProvider,
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn Error + Send + Sync>>,
{
    let bytes = Limited::new(body, MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|err| {
            if err.downcast_ref::<LengthLimitError>().is_some() {
                ChatError::BodyTooLarge {
                    limit: MAX_BODY_BYTES,
                }
            } else {
                ChatError::InvalidBody(err.to_string())
            }
        })?
        .to_bytes();

    let request: ChatRequest =
        serde_json::from_slice(&bytes).map_err(|err| ChatError::InvalidBody(err.to_string()))?;
    let history = request.history.unwrap_or_default();
    let message = request.message.unwrap_or_default();

    Ok(pipeline.answer(&history, &message).await?)
}

fn json_response<T: Serialize>(status: StatusCode, payload: &T) -> Response<Full<Bytes>> {
    let body = match serde_json::to_vec(payload) {
        Ok(body) => body,
        Err(err) => {
            warn!(error = %err, "failed to encode response body");
            return empty_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &ErrorReply { error: message })
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
