//! Interactive streaming chat against an OpenAI-compatible endpoint.
//!
//! # Usage
//!
//! ```bash
//! # Basic usage with default settings (Groq, llama-3.1-8b-instant)
//! streamchat
//!
//! # Store an API key before the first prompt
//! streamchat --api-key gsk_...
//!
//! # Talk to a local server
//! streamchat --endpoint http://localhost:8080/v1/chat/completions --provider local
//!
//! # Disable colors (useful for piping output)
//! streamchat --no-color
//! ```
//!
//! The transcript and key are kept under `--data-dir` (default `~/.streamchat`),
//! so a conversation picks up where it left off. Ctrl+C while a reply is
//! streaming cancels it; Ctrl+D exits.

use std::sync::Arc;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use streamchat::chat::{
    API_KEY_ENV, ChatArgs, ChatCommand, ChatConfig, ChatSession, Outcome, help_text,
    parse_command,
};
use streamchat::{
    FileStore, InferenceClient, NoopLogger, SessionLogger, StderrLogger, TranscriptPrinter,
};

/// Main entry point for the streamchat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, _) = ChatArgs::from_command_line_relaxed("streamchat [OPTIONS]");
    let api_key = args.api_key.clone();
    let config = ChatConfig::from(args);
    config.validate()?;
    let use_color = config.use_color;

    let store = Arc::new(FileStore::new(config.resolved_data_dir())?);
    let transport = Arc::new(InferenceClient::new(config.endpoint.clone())?);
    let logger: Arc<dyn SessionLogger> = if config.verbose {
        Arc::new(StderrLogger)
    } else {
        Arc::new(NoopLogger)
    };
    let session = ChatSession::with_logger(config, transport, store, logger)?;

    if let Some(key) = api_key {
        session.set_credential(&key);
    } else if !session.has_credential()
        && let Ok(key) = std::env::var(API_KEY_ENV)
    {
        session.set_credential(&key);
    }

    let printer = Arc::new(TranscriptPrinter::with_color(use_color));
    session.subscribe(printer.clone());
    let mut rl = DefaultEditor::new()?;

    // Ctrl+C while streaming cancels the reply; at the prompt rustyline handles it.
    let interrupt_session = session.clone();
    ctrlc::set_handler(move || {
        interrupt_session.cancel();
    })?;

    println!(
        "Streaming chat (model: {}, {} messages loaded)",
        session.config().model,
        session.message_count()
    );
    if !session.has_credential() {
        printer.print_info("No API key set; use /key <value> to store one.");
    }
    println!("Type /help for commands, /quit to exit\n");

    loop {
        let readline = rl.readline("You: ");

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                if let Some(cmd) = parse_command(line) {
                    match cmd {
                        ChatCommand::Quit => {
                            println!("Goodbye!");
                            break;
                        }
                        ChatCommand::Clear => {
                            session.clear();
                            printer.print_info("Conversation cleared.");
                        }
                        ChatCommand::SetKey(key) => {
                            session.set_credential(&key);
                            printer.print_info("API key saved.");
                        }
                        ChatCommand::ClearKey => {
                            session.set_credential("");
                            printer.print_info("API key removed.");
                        }
                        ChatCommand::ShowKey => match session.masked_credential() {
                            Some(masked) => printer.print_info(&format!("API key: {masked}")),
                            None => printer.print_info("No API key set."),
                        },
                        ChatCommand::Stats => {
                            print_stats(&session);
                        }
                        ChatCommand::Reload => match session.reload() {
                            Ok(()) => printer.print_info(&format!(
                                "Reloaded {} messages.",
                                session.message_count()
                            )),
                            Err(err) => printer.print_error(&format!("Failed to reload: {err}")),
                        },
                        ChatCommand::Cancel => {
                            if !session.cancel() {
                                printer.print_info("Nothing to cancel.");
                            }
                        }
                        ChatCommand::Help => {
                            for line in help_text().lines() {
                                println!("    {line}");
                            }
                        }
                        ChatCommand::Invalid(message) => {
                            printer.print_error(&message);
                        }
                    }
                    continue;
                }

                let submission = match session.submit(line) {
                    Ok(submission) => submission,
                    Err(err) => {
                        printer.print_error(&err.to_string());
                        continue;
                    }
                };
                println!("Assistant:");
                let outcome = submission.settled().await;
                printer.finish_response();
                match outcome {
                    Outcome::Completed => {}
                    Outcome::Failed(err) => printer.print_error(&err.to_string()),
                    Outcome::Cancelled => printer.print_info("[cancelled]"),
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl+D - exit
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                printer.print_error(&format!("Input error: {err}"));
                break;
            }
        }
    }

    Ok(())
}

fn print_stats(session: &ChatSession) {
    let stats = session.stats();
    println!("    Session Statistics:");
    println!("      Model: {}", stats.model);
    println!("      Endpoint: {}", stats.endpoint);
    println!("      Messages: {}", stats.message_count);
    println!(
        "      API key: {}",
        if stats.has_credential { "set" } else { "(none)" }
    );
    println!("      Status: {:?}", stats.status);
    println!(
        "      Requests: {} started / {} completed / {} failed / {} cancelled",
        stats.requests_started,
        stats.requests_completed,
        stats.requests_failed,
        stats.requests_cancelled
    );
}
