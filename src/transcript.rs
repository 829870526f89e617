/// Flattened conversation history fed back to the model on every turn.
///
/// Grows without bound; nothing is ever truncated or summarized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    text: String,
    exchanges: usize,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges == 0
    }

    /// Appends one question/answer pair as ` 用户: <question>\nAI: <answer>\n`.
    pub fn push_exchange(&mut self, question: &str, answer: &str) {
        self.text.push_str(" 用户: ");
        self.text.push_str(question);
        self.text.push_str("\nAI: ");
        self.text.push_str(answer);
        self.text.push('\n');
        self.exchanges += 1;
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.exchanges = 0;
    }
}
