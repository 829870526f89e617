mod template;

pub use template::{PromptTemplate, TemplateError};

use crate::instruction::InstructionDocument;

/// System framing for the navigation assistant. `{instruction}` receives the site manual.
pub const SYSTEM_TEMPLATE: &str = "\n你是一个网站导航助手，要根据用户的问题和网站导航说明书为用户进行操作导航。\n    网站操作说明如下：{instruction}\n";

pub const CHAT_TEMPLATE: &str = "{system} {history} {question}";

const SYSTEM_SLOTS: [&str; 1] = ["instruction"];
const CHAT_SLOTS: [&str; 3] = ["system", "history", "question"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptInput<'a> {
    pub history: &'a str,
    pub question: &'a str,
}

/// Assembles the single prompt sent to the model for each question.
///
/// The system segment depends only on the instruction document, so it is
/// rendered once up front.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system: String,
    chat: PromptTemplate,
}

impl PromptBuilder {
    pub fn new(instruction: InstructionDocument) -> Result<Self, TemplateError> {
        Self::with_templates(instruction, SYSTEM_TEMPLATE, CHAT_TEMPLATE)
    }

    pub fn with_templates(
        instruction: InstructionDocument,
        system_template: &str,
        chat_template: &str,
    ) -> Result<Self, TemplateError> {
        let system = PromptTemplate::parse(system_template, &SYSTEM_SLOTS)?
            .render(&[instruction.text()]);
        let chat = PromptTemplate::parse(chat_template, &CHAT_SLOTS)?;
        Ok(Self { system, chat })
    }

    pub fn system_segment(&self) -> &str {
        &self.system
    }

    pub fn build(&self, input: PromptInput<'_>) -> String {
        self.chat
            .render(&[self.system.as_str(), input.history, input.question])
    }
}
