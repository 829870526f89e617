#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Help,
    History,
    Clear,
    Trace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParseError {
    message: String,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub(crate) fn message(&self) -> &str {
        &self.message
    }
}

/// Console commands start with a double slash so that any other line,
/// including `/path` style questions, goes to the model.
pub(crate) const COMMAND_PREFIX: &str = "//";

pub(crate) const HELP_TEXT: &str = "Available commands:\n  //help     Show this command list\n  //history  Show the conversation sent with each question\n  //clear    Forget the conversation so far\n  //trace    Show path to the current trace file\nEvery other line is sent to the model. End input (Ctrl-D) to leave.";

pub(crate) fn is_command_line(line: &str) -> bool {
    line.trim_start().starts_with(COMMAND_PREFIX)
}

pub(crate) fn parse_command(line: &str) -> Result<Command, ParseError> {
    let Some(command_text) = line.trim().strip_prefix(COMMAND_PREFIX) else {
        return Err(ParseError::new("not a command"));
    };
    let command_text = command_text.trim();
    let mut parts = command_text.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or("").to_ascii_lowercase();
    if name.is_empty() {
        return Err(ParseError::new("empty command. Try //help"));
    }
    let rest = parts.next().map(str::trim).unwrap_or("");

    let command = match name.as_str() {
        "help" => Command::Help,
        "history" => Command::History,
        "clear" => Command::Clear,
        "trace" => Command::Trace,
        _ => {
            return Err(ParseError::new(format!(
                "unknown command '//{name}'. Try //help"
            )));
        }
    };

    if rest.is_empty() {
        Ok(command)
    } else {
        Err(ParseError::new(format!("usage: //{name}")))
    }
}
