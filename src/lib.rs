pub mod cli;
pub mod config;
pub mod http;
pub mod instruction;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod server;
pub mod trace;
pub mod transcript;

use anyhow::{Result, anyhow};
use cli::{CliArgs, Command, ConsoleArgs, ConsoleSession, ServeArgs};
use config::AppConfig;
use http::client::HttpClient;
use http::debug::HttpDebugConfig;
use instruction::{InstructionPolicy, load_instruction};
use llm::ollama::OllamaProvider;
use llm::{DEFAULT_CONSOLE_MODEL, DEFAULT_SERVE_MODEL};
use pipeline::ChatPipeline;
use prompt::PromptBuilder;
use server::ChatServer;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::BufReader;
use trace::SessionTrace;
use tracing::{info, warn};

pub async fn run(args: CliArgs) -> Result<()> {
    let config = AppConfig::load_with_path(args.config.as_deref())?;
    info!(
        config = %config.config_path.display(),
        base_url = %config.base_url,
        "configuration loaded"
    );
    let http = build_http_client(&config, args.verbose)?;

    match args.command {
        Command::Console(console) => run_console(&config, http, console).await,
        Command::Serve(serve) => run_serve(&config, http, serve).await,
    }
}

async fn run_console(config: &AppConfig, http: HttpClient, args: ConsoleArgs) -> Result<()> {
    let path = args
        .instruction
        .unwrap_or_else(|| config.instruction_path.clone());
    let instruction = load_instruction(&path, InstructionPolicy::Strict)?;
    let prompt = PromptBuilder::new(instruction)?;

    let trace = match SessionTrace::create(&generate_session_id()) {
        Ok(trace) => Some(trace),
        Err(err) => {
            warn!(error = %err, "session trace disabled");
            None
        }
    };
    let http = match &trace {
        Some(trace) => http.with_trace(trace.clone()),
        None => http,
    };

    let pipeline = ChatPipeline::new(prompt, ollama_provider(config, http, DEFAULT_CONSOLE_MODEL));
    let mut session = ConsoleSession::new(&pipeline);
    if let Some(trace) = trace {
        session = session.with_trace(trace);
    }

    let input = BufReader::new(tokio::io::stdin());
    let mut output = tokio::io::stdout();
    session.run(input, &mut output).await?;
    Ok(())
}

async fn run_serve(config: &AppConfig, http: HttpClient, args: ServeArgs) -> Result<()> {
    let path = args
        .instruction
        .unwrap_or_else(|| config.instruction_path.clone());
    let policy = if args.strict_instruction {
        InstructionPolicy::Strict
    } else {
        InstructionPolicy::Fallback
    };
    let instruction = load_instruction(&path, policy)?;
    let prompt = PromptBuilder::new(instruction)?;
    let provider = ollama_provider(config, http, DEFAULT_SERVE_MODEL);
    let pipeline = Arc::new(ChatPipeline::new(prompt, provider));

    let host = args.host.unwrap_or_else(|| config.host.clone());
    let port = args.port.unwrap_or(config.port);
    let server = ChatServer::bind(&host, port, pipeline).await?;
    println!("Listening on http://{}", server.local_addr()?);

    server.run_until(shutdown_signal()).await
}

fn build_http_client(config: &AppConfig, verbose: bool) -> Result<HttpClient> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = config.request_timeout {
        builder = builder.timeout(timeout);
    }
    let inner = builder
        .build()
        .map_err(|err| anyhow!("Failed to build HTTP client: {err}"))?;
    Ok(HttpClient::new(inner, HttpDebugConfig::from_verbose(verbose)))
}

fn ollama_provider(config: &AppConfig, http: HttpClient, mode_default: &str) -> OllamaProvider {
    let model = config.model_or(mode_default);
    info!(model, "using model");
    OllamaProvider::new(
        http,
        config.base_url.as_str(),
        model,
        config.generation_options(),
    )
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "unable to listen for Ctrl-C; serving until killed");
        std::future::pending::<()>().await;
    }
}

fn generate_session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis());
    format!("{millis:x}-{:x}", std::process::id())
}
