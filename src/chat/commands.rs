//! Slash command parsing for the chat application.
//!
//! This module handles parsing of special commands that start with `/`,
//! allowing users to control the chat session without sending messages
//! to the endpoint.

/// A parsed chat command.
///
/// These commands control the chat session and are not sent to the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Clear the conversation history.
    Clear,

    /// Store a new API key.
    SetKey(String),

    /// Remove the stored API key.
    ClearKey,

    /// Show whether a key is set, masked.
    ShowKey,

    /// Display session statistics.
    Stats,

    /// Re-read the transcript and key from the store.
    Reload,

    /// Abort the response currently streaming.
    Cancel,

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command,
/// or `None` if it should be sent as a regular message.
///
/// # Examples
///
/// ```
/// # use streamchat::chat::{ChatCommand, parse_command};
/// assert_eq!(parse_command("/quit"), Some(ChatCommand::Quit));
/// assert!(parse_command("/key sk-test").is_some());
/// assert!(parse_command("Hello there").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "clear" => match argument {
            None => ChatCommand::Clear,
            Some(_) => ChatCommand::Invalid("/clear takes no arguments".to_string()),
        },
        "key" => match argument {
            Some(arg) if arg.eq_ignore_ascii_case("clear") => ChatCommand::ClearKey,
            Some(arg) if arg.contains(char::is_whitespace) => {
                ChatCommand::Invalid("/key expects a single value without spaces".to_string())
            }
            Some(arg) => ChatCommand::SetKey(arg.to_string()),
            None => ChatCommand::ShowKey,
        },
        "stats" | "status" => ChatCommand::Stats,
        "reload" => ChatCommand::Reload,
        "cancel" | "stop" => ChatCommand::Cancel,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        "" => ChatCommand::Invalid("Empty command; try /help".to_string()),
        _ => ChatCommand::Invalid(format!("Unknown command: /{command}")),
    };

    Some(result)
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /clear                 Clear conversation history
  /key <value>           Store the API key
  /key clear             Remove the stored API key
  /key                   Show whether an API key is set
  /stats                 Show session statistics
  /reload                Reload the transcript and key from disk
  /cancel                Abort the response being streamed
  /help                  Show this help message
  /quit                  Exit the chat"#
}
