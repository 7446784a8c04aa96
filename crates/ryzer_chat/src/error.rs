//! Error types for the chat system.

use thiserror::Error;

/// Text shown in a response when a failure carries no message of its own.
pub const GENERIC_FAILURE_TEXT: &str = "Sorry, something went wrong. Please try again.";

/// Chat system errors
#[derive(Error, Debug)]
pub enum ChatError {
    /// Session not found
    #[error("Chat session not found: {0}")]
    SessionNotFound(String),

    /// No API key could be resolved for the generative service
    #[error("Generative service not configured. Set GEMINI_API_KEY or API_KEY")]
    NotConfigured,

    /// Network-level failure talking to the generative service
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The generative service answered with a non-success status
    #[error("Service error {status}: {body}")]
    Api { status: u16, body: String },

    /// The generative service answered, but without usable content
    #[error("{0}")]
    EmptyResponse(String),

    /// A streamed event could not be understood
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A string claimed to be a data URI but is not one
    #[error("Invalid data URI: {0}")]
    InvalidDataUri(String),

    /// Synthesized audio could not be turned into samples
    #[error("Audio decode failed: {0}")]
    AudioDecode(String),

    /// The audio sink refused or failed to render a clip
    #[error("Audio output failed: {0}")]
    AudioOutput(String),

    /// File system error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChatError {
    /// Text written into a failed response placeholder.
    pub fn user_message(&self) -> String {
        let message = self.to_string();
        if message.trim().is_empty() {
            GENERIC_FAILURE_TEXT.to_string()
        } else {
            message
        }
    }

    /// Whether the error comes from talking to the remote service.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Api { .. } | Self::EmptyResponse(_) | Self::MalformedResponse(_)
        )
    }
}

impl From<hound::Error> for ChatError {
    fn from(err: hound::Error) -> Self {
        Self::AudioOutput(err.to_string())
    }
}

/// Result type for chat operations
pub type ChatResult<T> = Result<T, ChatError>;
