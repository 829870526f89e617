use anyhow::Result;
use clap::Parser;
use navchat::cli::CliArgs;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "warn" }));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    navchat::run(args).await
}
