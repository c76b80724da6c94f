//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and configuration
//! structures for controlling chat behavior.

use std::path::PathBuf;

use arrrg_derive::CommandLine;
use url::Url;

use crate::error::{Error, Result};

/// Default chat completions endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";

/// Default provider name, used to derive the credential key.
pub const DEFAULT_PROVIDER: &str = "groq";

/// Environment variable consulted when no API key is stored.
pub const API_KEY_ENV: &str = "STREAMCHAT_API_KEY";

/// Store key holding the transcript.
pub const MESSAGES_KEY: &str = "chat-messages";

/// Command-line arguments for the streamchat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Model to use for chat.
    #[arrrg(optional, "Model to use (default: llama-3.1-8b-instant)", "MODEL")]
    pub model: Option<String>,

    /// Chat completions endpoint.
    #[arrrg(optional, "Chat completions endpoint URL", "URL")]
    pub endpoint: Option<String>,

    /// Provider name.
    #[arrrg(optional, "Provider name for the stored API key (default: groq)", "NAME")]
    pub provider: Option<String>,

    /// Where the transcript and API key are kept.
    #[arrrg(optional, "Directory for the transcript and API key", "DIR")]
    pub data_dir: Option<String>,

    /// API key to store before the first prompt.
    #[arrrg(optional, "API key to store before starting", "KEY")]
    pub api_key: Option<String>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    /// Log requests and frames to stderr.
    #[arrrg(flag, "Log requests and decoded frames to stderr")]
    pub verbose: bool,
}

/// Configuration for a chat session.
///
/// This struct holds the resolved configuration values after processing
/// command-line arguments with appropriate defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// The model to use for generating responses.
    pub model: String,

    /// URL that completion requests are posted to.
    pub endpoint: String,

    /// Provider name; the API key is stored under `<provider>-api-key`.
    pub provider: String,

    /// Directory for the file store; `None` picks a default under `$HOME`.
    pub data_dir: Option<PathBuf>,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// Whether to log session activity to stderr.
    pub verbose: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Model: llama-3.1-8b-instant
    /// - Endpoint: Groq's OpenAI-compatible chat completions
    /// - Provider: groq
    /// - Color: enabled
    pub fn new() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            provider: DEFAULT_PROVIDER.to_string(),
            data_dir: None,
            use_color: true,
            verbose: false,
        }
    }

    /// Sets the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the provider name.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Sets the data directory.
    pub fn with_data_dir(mut self, data_dir: Option<PathBuf>) -> Self {
        self.data_dir = data_dir;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// Enables stderr logging.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Store key for the API key.
    pub fn credential_key(&self) -> String {
        format!("{}-api-key", self.provider)
    }

    /// Store key for the transcript.
    pub fn messages_key(&self) -> &'static str {
        MESSAGES_KEY
    }

    /// The data directory, falling back to `$HOME/.streamchat`.
    pub fn resolved_data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".streamchat"),
        }
    }

    /// Checks that the configuration can be used to build a session.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.endpoint)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::validation(
                format!("endpoint must be http or https, got {}", url.scheme()),
                Some("endpoint".to_string()),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(Error::validation(
                "model must not be empty",
                Some("model".to_string()),
            ));
        }
        let provider_ok = !self.provider.is_empty()
            && self
                .provider
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
        if !provider_ok {
            return Err(Error::validation(
                "provider must be a non-empty name of letters, digits, '-' or '_'",
                Some("provider".to_string()),
            ));
        }
        Ok(())
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ChatArgs> for ChatConfig {
    fn from(args: ChatArgs) -> Self {
        let defaults = ChatConfig::new();
        ChatConfig {
            model: args.model.unwrap_or(defaults.model),
            endpoint: args.endpoint.unwrap_or(defaults.endpoint),
            provider: args.provider.unwrap_or(defaults.provider),
            data_dir: args.data_dir.map(PathBuf::from),
            use_color: !args.no_color,
            verbose: args.verbose,
        }
    }
}
