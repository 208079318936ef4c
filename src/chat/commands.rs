//! Slash command parsing for the chat application.
//!
//! Input starting with `/` controls the session and is never sent to the
//! agent.

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Start over: forget the transcript and the conversation handle.
    Clear,

    /// Show the conversation handle assigned by the agent.
    Conversation,

    /// Save the transcript to a file immediately.
    SaveTranscript(String),

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Display session statistics.
    Stats,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it
/// should be sent to the agent.
///
/// # Examples
///
/// ```
/// # use mstech::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/save chat.json").is_some());
/// assert!(parse_command("What services do you offer?").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(str::trim).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "clear" | "reset" | "new" => ChatCommand::Clear,
        "conversation" | "id" => ChatCommand::Conversation,
        "save" => match argument {
            Some(path) => ChatCommand::SaveTranscript(path.to_string()),
            None => ChatCommand::Invalid("/save requires a file path".to_string()),
        },
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        "stats" | "status" => ChatCommand::Stats,
        other => ChatCommand::Invalid(format!("unknown command /{other}; try /help")),
    };
    Some(result)
}

/// Returns the help text for available commands.
pub fn help_text() -> &'static str {
    "Commands:
/help               Show this help
/clear              Start a new conversation
/conversation       Show the conversation id
/save <path>        Save the transcript as JSON
/stats              Show session statistics
/quit               Exit"
}
