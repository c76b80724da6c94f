//! Terminal rendering for chat sessions.
//!
//! [`TranscriptPrinter`] subscribes to a [`ChatSession`](crate::chat::ChatSession)
//! and writes each streamed assistant message to stdout as it grows.

use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use crate::chat::SessionListener;
use crate::types::{Message, MessageRole};

/// ANSI escape code for dim text (used for informational lines).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

#[derive(Debug, Default)]
struct Cursor {
    message_id: Option<String>,
    printed: usize,
    line_start: bool,
}

impl Cursor {
    /// Returns the part of `message` not yet printed and advances past it.
    fn advance<'a>(&mut self, message: &'a Message) -> Option<&'a str> {
        if message.role != MessageRole::Assistant || message.content.is_empty() {
            return None;
        }
        if self.message_id.as_deref() != Some(message.id.as_str())
            || message.content.len() < self.printed
        {
            self.message_id = Some(message.id.clone());
            self.printed = 0;
        }
        let suffix = message.content.get(self.printed..)?;
        if suffix.is_empty() {
            return None;
        }
        self.printed = message.content.len();
        Some(suffix)
    }
}

/// Prints the streaming assistant reply incrementally.
///
/// Only the last message of the transcript is rendered; earlier messages were
/// printed when they streamed, or are history loaded from the store.
#[derive(Debug)]
pub struct TranscriptPrinter {
    use_color: bool,
    cursor: Mutex<Cursor>,
}

impl TranscriptPrinter {
    /// Creates a new printer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new printer with the specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            use_color,
            cursor: Mutex::new(Cursor {
                line_start: true,
                ..Cursor::default()
            }),
        }
    }

    /// Whether ANSI styling is used.
    pub fn use_color(&self) -> bool {
        self.use_color
    }

    /// Ends the current response, moving to a fresh line if text was printed.
    pub fn finish_response(&self) {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        if !cursor.line_start {
            println!();
            cursor.line_start = true;
        }
        let _ = io::stdout().flush();
    }

    /// Print an informational message.
    pub fn print_info(&self, info: &str) {
        if self.use_color {
            println!("{ANSI_DIM}{info}{ANSI_RESET}");
        } else {
            println!("{info}");
        }
    }

    /// Print an error message to stderr.
    pub fn print_error(&self, error: &str) {
        if self.use_color {
            eprintln!("{ANSI_RED}Error: {error}{ANSI_RESET}");
        } else {
            eprintln!("Error: {error}");
        }
    }
}

impl Default for TranscriptPrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionListener for TranscriptPrinter {
    fn transcript_changed(&self, messages: &[Message]) {
        let Some(last) = messages.last() else {
            return;
        };
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(text) = cursor.advance(last) {
            print!("{text}");
            cursor.line_start = text.ends_with('\n');
            let _ = io::stdout().flush();
        }
    }
}
