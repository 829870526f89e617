pub mod ollama;
pub mod provider;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";
/// Model used by `console` when none is configured.
pub const DEFAULT_CONSOLE_MODEL: &str = "qwen2.5:7b";
/// Model used by `serve` when none is configured.
pub const DEFAULT_SERVE_MODEL: &str = "deepseek-r1:7b";
pub const DEFAULT_TEMPERATURE: f32 = 0.8;
pub const DEFAULT_MAX_TOKENS: u32 = 10_000;
