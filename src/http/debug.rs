use reqwest::header::{HeaderMap, HeaderValue};

pub const DEFAULT_MAX_BODY_CHARS: usize = 4_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpDebugConfig {
    pub enabled: bool,
    pub max_body_chars: usize,
}

impl HttpDebugConfig {
    pub fn from_verbose(verbose: bool) -> Self {
        Self {
            enabled: verbose,
            max_body_chars: DEFAULT_MAX_BODY_CHARS,
        }
    }

    pub fn disabled() -> Self {
        Self::from_verbose(false)
    }
}

pub fn header_value_for_log(value: &HeaderValue) -> String {
    value
        .to_str()
        .map(std::string::ToString::to_string)
        .unwrap_or_else(|_| "<non-utf8>".to_string())
}

pub fn format_headers(headers: &HeaderMap) -> Vec<String> {
    headers
        .iter()
        .map(|(name, value)| format!("{}: {}", name.as_str(), header_value_for_log(value)))
        .collect()
}

pub fn truncate_for_log(input: &str, max_chars: usize) -> String {
    let count = input.chars().count();
    if count <= max_chars {
        return input.to_string();
    }

    let truncated = input.chars().take(max_chars).collect::<String>();
    format!("{truncated}... <truncated {} chars>", count - max_chars)
}
