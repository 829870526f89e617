use anyhow::{Result, anyhow, bail};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::llm::{DEFAULT_BASE_URL, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::llm::ollama::GenerationOptions;

pub const DEFAULT_INSTRUCTION_PATH: &str = "SFJ.txt";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;

const CONFIG_DIR_NAME: &str = "navchat";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub config_path: PathBuf,
    pub base_url: String,
    /// Configured model; each mode falls back to its own default when unset.
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout: Option<Duration>,
    pub instruction_path: PathBuf,
    pub host: String,
    pub port: u16,
}

impl AppConfig {
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub fn model_or<'a>(&'a self, mode_default: &'a str) -> &'a str {
        self.model.as_deref().unwrap_or(mode_default)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFileConfig {
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    request_timeout_secs: Option<u64>,
    instruction_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    /// Loads the config file (explicit path, or the discovered default), then
    /// applies `.env` and `NAVCHAT_*` environment overrides.
    pub fn load_with_path(explicit: Option<&Path>) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => {
                if !path.is_file() {
                    bail!("Failed to load config {}: file not found", path.display());
                }
                path.to_path_buf()
            }
            None => discover_config_path()?,
        };
        let file_config = load_file_config(&config_path)?;

        dotenvy::dotenv().ok();

        let file_base_url = file_config
            .as_ref()
            .and_then(|cfg| cfg.base_url.as_deref())
            .and_then(non_empty)
            .map(ToOwned::to_owned);
        let file_model = file_config
            .as_ref()
            .and_then(|cfg| cfg.model.as_deref())
            .and_then(non_empty)
            .map(ToOwned::to_owned);
        let file_host = file_config
            .as_ref()
            .and_then(|cfg| cfg.host.as_deref())
            .and_then(non_empty)
            .map(ToOwned::to_owned);

        let temperature = file_config
            .as_ref()
            .and_then(|cfg| cfg.temperature)
            .unwrap_or(DEFAULT_TEMPERATURE);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(config_error(
                &config_path,
                "temperature",
                "must be between 0.0 and 2.0",
            ));
        }

        let max_tokens = file_config
            .as_ref()
            .and_then(|cfg| cfg.max_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS);
        if max_tokens == 0 {
            return Err(config_error(&config_path, "max_tokens", "must be greater than 0"));
        }

        let request_timeout = match file_config.as_ref().and_then(|cfg| cfg.request_timeout_secs) {
            Some(0) => {
                return Err(config_error(
                    &config_path,
                    "request_timeout_secs",
                    "must be greater than 0",
                ));
            }
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        let instruction_path = env_non_empty("NAVCHAT_INSTRUCTION")
            .map(PathBuf::from)
            .or_else(|| file_config.as_ref().and_then(|cfg| cfg.instruction_path.clone()))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_INSTRUCTION_PATH));

        Ok(Self {
            base_url: env_non_empty("NAVCHAT_BASE_URL")
                .or(file_base_url)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: env_non_empty("NAVCHAT_MODEL").or(file_model),
            temperature,
            max_tokens,
            request_timeout,
            instruction_path,
            host: file_host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: file_config
                .as_ref()
                .and_then(|cfg| cfg.port)
                .unwrap_or(DEFAULT_PORT),
            config_path,
        })
    }
}

fn discover_config_path() -> Result<PathBuf> {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let trimmed = xdg.trim();
        if trimmed.is_empty() {
            bail!("Failed to resolve config path: XDG_CONFIG_HOME is set but empty");
        }

        return Ok(PathBuf::from(trimmed)
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME));
    }

    let home = dirs::home_dir()
        .ok_or_else(|| anyhow!("Failed to resolve config path: HOME directory is unavailable"))?;

    Ok(home
        .join(".config")
        .join(CONFIG_DIR_NAME)
        .join(CONFIG_FILE_NAME))
}

fn load_file_config(config_path: &Path) -> Result<Option<RawFileConfig>> {
    if !config_path.is_file() {
        return Ok(None);
    }

    let config_text = fs::read_to_string(config_path).map_err(|err| {
        anyhow!(
            "Failed to load config {}: unable to read file: {err}",
            config_path.display()
        )
    })?;

    toml::from_str(&config_text)
        .map(Some)
        .map_err(|err| anyhow!("Failed to load config {}: {err}", config_path.display()))
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .and_then(|value| non_empty(&value).map(ToOwned::to_owned))
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn config_error(config_path: &Path, key_path: &str, reason: &str) -> anyhow::Error {
    anyhow!(
        "Failed to load config {}: {key_path}: {reason}",
        config_path.display()
    )
}
