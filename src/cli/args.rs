use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone, PartialEq, Eq)]
#[command(name = "navchat")]
#[command(
    about = "Website-navigation assistant backed by a local language model",
    long_about = "Website-navigation assistant backed by a local language model\n\nConfig file loading:\n  - --config <path> (explicit file, overrides default path discovery)\n  - Default probe path when --config is not provided:\n    1. $XDG_CONFIG_HOME/navchat/config.toml\n    2. ~/.config/navchat/config.toml"
)]
pub struct CliArgs {
    /// Load config from this file path instead of the default discovery path.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level and dump backend HTTP traffic to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask questions interactively; answers stream to the terminal.
    Console(ConsoleArgs),
    /// Serve POST /chat over HTTP.
    Serve(ServeArgs),
}

#[derive(Debug, Args, Clone, PartialEq, Eq)]
pub struct ConsoleArgs {
    /// Instruction file to load (startup fails if it cannot be read).
    #[arg(long, value_name = "PATH")]
    pub instruction: Option<PathBuf>,
}

#[derive(Debug, Args, Clone, PartialEq, Eq)]
pub struct ServeArgs {
    /// Instruction file to load (a placeholder is used if it cannot be read).
    #[arg(long, value_name = "PATH")]
    pub instruction: Option<PathBuf>,

    /// Refuse to start when the instruction file cannot be read.
    #[arg(long)]
    pub strict_instruction: bool,

    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,
}
