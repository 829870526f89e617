mod args;
mod commands;
mod console;

pub use args::{CliArgs, Command, ConsoleArgs, ServeArgs};
pub use console::{ConsoleSession, QUESTION_PROMPT};
