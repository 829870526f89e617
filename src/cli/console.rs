use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use super::commands::{Command, HELP_TEXT, is_command_line, parse_command};
use crate::llm::provider::{LlmError, LlmProvider, StreamEvent};
use crate::pipeline::ChatPipeline;
use crate::trace::{SessionTrace, TraceKind};
use crate::transcript::Transcript;

pub const QUESTION_PROMPT: &str = "\n请输入您的问题：";

pub struct ConsoleSession<'a, P> {
    pipeline: &'a ChatPipeline<P>,
    trace: Option<SessionTrace>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TurnOutcome {
    Answered(String),
    Failed { error: LlmError, partial: bool },
}

impl<'a, P: LlmProvider> ConsoleSession<'a, P> {
    pub fn new(pipeline: &'a ChatPipeline<P>) -> Self {
        Self {
            pipeline,
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: SessionTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Reads questions until end of input and streams each answer to
    /// `output`. Returns the final transcript.
    ///
    /// Every line is a question, blank ones included, unless it starts with
    /// `//`. A failed turn is reported and left out of the transcript; the
    /// loop keeps going.
    pub async fn run<R, W>(&self, input: R, output: &mut W) -> Result<Transcript>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let mut transcript = Transcript::new();

        loop {
            output.write_all(QUESTION_PROMPT.as_bytes()).await?;
            output.flush().await?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if is_command_line(line) {
                self.run_command(line, &mut transcript, output).await?;
                continue;
            }

            transcript = self.ask(transcript, line, output).await?;
        }

        output.write_all(b"\n").await?;
        output.flush().await?;
        Ok(transcript)
    }

    async fn ask<W>(&self, mut transcript: Transcript, question: &str, output: &mut W) -> Result<Transcript>
    where
        W: AsyncWrite + Unpin,
    {
        if let Some(trace) = &self.trace {
            trace.record(TraceKind::Question, question);
        }

        match self.stream_answer(&transcript, question, output).await? {
            TurnOutcome::Answered(answer) => {
                if let Some(trace) = &self.trace {
                    trace.record(TraceKind::Answer, &answer);
                }
                transcript.push_exchange(question, &answer);
            }
            TurnOutcome::Failed { error: err, partial } => {
                warn!(error = %err, "question could not be answered");
                if let Some(trace) = &self.trace {
                    trace.record(TraceKind::Error, &err.to_string());
                }
                if partial {
                    output.write_all(b"\n").await?;
                }
                output
                    .write_all(format!("[error] {err}").as_bytes())
                    .await?;
                output.flush().await?;
            }
        }
        Ok(transcript)
    }

    /// Writes fragments to `output` as they arrive.
    async fn stream_answer<W>(
        &self,
        transcript: &Transcript,
        question: &str,
        output: &mut W,
    ) -> Result<TurnOutcome>
    where
        W: AsyncWrite + Unpin,
    {
        let mut stream = match self
            .pipeline
            .answer_stream(transcript.as_str(), question)
            .await
        {
            Ok(stream) => stream,
            Err(error) => {
                return Ok(TurnOutcome::Failed {
                    error,
                    partial: false,
                });
            }
        };

        let mut answer = String::new();
        while let Some(event) = stream.next_event().await {
            match event {
                StreamEvent::Fragment(text) => {
                    output.write_all(text.as_bytes()).await?;
                    output.flush().await?;
                    answer.push_str(&text);
                }
                StreamEvent::Done => return Ok(TurnOutcome::Answered(answer)),
                StreamEvent::Failed(error) => {
                    return Ok(TurnOutcome::Failed {
                        error,
                        partial: !answer.is_empty(),
                    });
                }
            }
        }
        Ok(TurnOutcome::Failed {
            error: LlmError::Truncated,
            partial: !answer.is_empty(),
        })
    }

    async fn run_command<W>(&self, line: &str, transcript: &mut Transcript, output: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let message = match parse_command(line) {
            Ok(Command::Help) => HELP_TEXT.to_string(),
            Ok(Command::History) if transcript.is_empty() => "No conversation yet".to_string(),
            Ok(Command::History) => transcript.as_str().trim_end().to_string(),
            Ok(Command::Clear) => {
                transcript.clear();
                "Conversation cleared".to_string()
            }
            Ok(Command::Trace) => match &self.trace {
                Some(trace) => format!("Trace file: {}", trace.file_path().display()),
                None => "Session trace is disabled".to_string(),
            },
            Err(err) => format!("[error] {}", err.message()),
        };
        output.write_all(message.as_bytes()).await?;
        output.flush().await?;
        Ok(())
    }
}
