//! Error types for the coaching chat system.

use thiserror::Error;

use coach_directives::DirectiveError;

/// Result type alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;

/// Chat system errors
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("LLM not configured. Set OPENAI_API_KEY or ANTHROPIC_API_KEY")]
    LlmNotConfigured,

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Generation timed out after {0}s")]
    Timeout(u64),

    #[error("Lookup error: {0}")]
    Lookup(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Action not found: {0}")]
    ActionNotFound(String),

    #[error("Invalid action transition for {action}: {from} -> {to}")]
    InvalidTransition {
        action: String,
        from: String,
        to: String,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown domain: {0}")]
    UnknownDomain(String),

    #[error(transparent)]
    Directive(#[from] DirectiveError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChatError {
    /// Whether the error came from the text-generation provider.
    pub fn is_provider_error(&self) -> bool {
        matches!(self, Self::Llm(_) | Self::LlmNotConfigured | Self::Timeout(_))
    }
}
