use crate::llm::provider::{CompletionInput, CompletionStream, LlmProvider, LlmResult};
use crate::prompt::{PromptBuilder, PromptInput};

/// Everything needed to answer a question: the prompt builder and the model
/// backend. Built once at startup and shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct ChatPipeline<P> {
    prompt: PromptBuilder,
    provider: P,
}

impl<P: LlmProvider> ChatPipeline<P> {
    pub fn new(prompt: PromptBuilder, provider: P) -> Self {
        Self { prompt, provider }
    }

    pub async fn answer(&self, history: &str, question: &str) -> LlmResult<String> {
        let prompt = self.prompt.build(PromptInput { history, question });
        let output = self.provider.generate(CompletionInput { prompt }).await?;
        Ok(output.text)
    }

    pub async fn answer_stream(&self, history: &str, question: &str) -> LlmResult<CompletionStream> {
        let prompt = self.prompt.build(PromptInput { history, question });
        self.provider
            .generate_stream(CompletionInput { prompt })
            .await
    }
}
