use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    Unclosed { offset: usize },
    InvalidName(String),
    Unknown(String),
    Duplicate(String),
    Missing(String),
    OutOfOrder { expected: Vec<String>, found: Vec<String> },
}

impl Display for TemplateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unclosed { offset } => write!(f, "unclosed '{{' at byte {offset}"),
            Self::InvalidName(name) => write!(f, "invalid placeholder name '{name}'"),
            Self::Unknown(name) => write!(f, "unknown placeholder '{{{name}}}'"),
            Self::Duplicate(name) => write!(f, "placeholder '{{{name}}}' appears more than once"),
            Self::Missing(name) => write!(f, "missing placeholder '{{{name}}}'"),
            Self::OutOfOrder { expected, found } => write!(
                f,
                "placeholders must appear in order {}, found {}",
                expected.join(", "),
                found.join(", ")
            ),
        }
    }
}

impl Error for TemplateError {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot(usize),
}

/// Text with named `{slot}` placeholders, checked against a fixed slot list.
///
/// Every slot must appear exactly once and in the listed order. `{{` and `}}`
/// produce literal braces. Rendering is a single pass, so braces inside the
/// substituted values are never treated as placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
    slots: Vec<String>,
}

impl PromptTemplate {
    pub fn parse(source: &str, slots: &[&str]) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut found: Vec<String> = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((offset, ch)) = chars.next() {
            match ch {
                '{' if chars.peek().map(|(_, c)| *c) == Some('{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek().map(|(_, c)| *c) == Some('}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(TemplateError::Unclosed { offset });
                    }
                    if name.is_empty() || !name.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
                        return Err(TemplateError::InvalidName(name));
                    }
                    let Some(index) = slots.iter().position(|slot| *slot == name) else {
                        return Err(TemplateError::Unknown(name));
                    };
                    if found.contains(&name) {
                        return Err(TemplateError::Duplicate(name));
                    }

                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Slot(index));
                    found.push(name);
                }
                _ => literal.push(ch),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        if let Some(missing) = slots.iter().find(|slot| !found.iter().any(|f| f == *slot)) {
            return Err(TemplateError::Missing((*missing).to_string()));
        }
        if found.iter().zip(slots).any(|(f, s)| f != s) {
            return Err(TemplateError::OutOfOrder {
                expected: slots.iter().map(|s| (*s).to_string()).collect(),
                found,
            });
        }

        Ok(Self {
            segments,
            slots: slots.iter().map(|s| (*s).to_string()).collect(),
        })
    }

    /// Fills the slots with `values`, given in the order the slots were declared.
    pub fn render(&self, values: &[&str]) -> String {
        debug_assert_eq!(values.len(), self.slots.len());
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot(index) => out.push_str(values.get(*index).copied().unwrap_or_default()),
            }
        }
        out
    }
}
