use futures_util::stream::{self, BoxStream, StreamExt};
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionInput {
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionOutput {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    Unreachable(String),
    Timeout,
    HttpStatus { status: u16, body: String },
    Transport(String),
    Backend(String),
    Parse(String),
    Truncated,
}

impl Display for LlmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable(url) => write!(f, "model backend unreachable at {url}"),
            Self::Timeout => write!(f, "model backend request timed out"),
            Self::HttpStatus { status, body } => {
                write!(f, "model backend request failed with status {status}: {body}")
            }
            Self::Transport(msg) => write!(f, "model backend transport error: {msg}"),
            Self::Backend(msg) => write!(f, "model backend error: {msg}"),
            Self::Parse(msg) => write!(f, "model backend parse error: {msg}"),
            Self::Truncated => write!(f, "model backend stream ended before completion"),
        }
    }
}

impl Error for LlmError {}

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// One item of a streamed completion.
///
/// A stream delivers zero or more `Fragment`s followed by exactly one terminal
/// event, `Done` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Fragment(String),
    Done,
    Failed(LlmError),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Fragment(_))
    }
}

/// Finite, ordered, non-restartable sequence of completion fragments.
pub struct CompletionStream {
    events: BoxStream<'static, StreamEvent>,
    finished: bool,
}

impl CompletionStream {
    pub fn new(events: BoxStream<'static, StreamEvent>) -> Self {
        Self {
            events,
            finished: false,
        }
    }

    pub fn from_events(events: Vec<StreamEvent>) -> Self {
        Self::new(stream::iter(events).boxed())
    }

    /// Returns the next event, or `None` once the terminal event was handed out.
    ///
    /// A source that runs dry without a terminal event reports
    /// `Failed(LlmError::Truncated)`.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }

        let event = self
            .events
            .next()
            .await
            .unwrap_or(StreamEvent::Failed(LlmError::Truncated));
        if event.is_terminal() {
            self.finished = true;
        }
        Some(event)
    }

    pub async fn collect_text(mut self) -> LlmResult<String> {
        let mut text = String::new();
        while let Some(event) = self.next_event().await {
            match event {
                StreamEvent::Fragment(fragment) => text.push_str(&fragment),
                StreamEvent::Done => return Ok(text),
                StreamEvent::Failed(err) => return Err(err),
            }
        }
        Err(LlmError::Truncated)
    }
}

impl std::fmt::Debug for CompletionStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionStream")
            .field("finished", &self.finished)
            .finish()
    }
}

pub trait LlmProvider {
    fn generate(
        &self,
        input: CompletionInput,
    ) -> impl std::future::Future<Output = LlmResult<CompletionOutput>> + Send;

    fn generate_stream(
        &self,
        input: CompletionInput,
    ) -> impl std::future::Future<Output = LlmResult<CompletionStream>> + Send;
}
