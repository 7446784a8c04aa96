//! Generative service abstraction.
//!
//! The controller only sees [`GenerativeBackend`]: a streaming chat call,
//! a one-shot image call and a one-shot speech call. All three are opaque
//! remote operations that can fail or stall; only the chat stream can be
//! abandoned midway.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::data_uri::DataUri;
use crate::error::ChatResult;
use crate::settings::{ModelTier, Settings};
use crate::types::{GroundingSource, Message, Role};

/// Reasoning budget requested when thinking mode is on
pub const THINKING_BUDGET: u32 = 32_768;

/// One part of a turn: text or an inline binary payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    InlineData(InlineData),
}

/// Base64 payload with its MIME type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

impl InlineData {
    /// Render as a `data:` URI for storage on a message
    pub fn to_data_uri(&self) -> String {
        DataUri::new(&self.mime_type, &self.data).to_string()
    }
}

impl From<DataUri> for InlineData {
    fn from(uri: DataUri) -> Self {
        Self {
            mime_type: uri.mime_type,
            data: uri.data,
        }
    }
}

/// A role-tagged turn sent to the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    /// Re-project a stored message. Messages with no text and no usable
    /// image yield `None`.
    pub fn from_message(message: &Message) -> Option<Self> {
        let mut parts = Vec::new();
        if message.has_text() {
            parts.push(Part::Text(message.text().to_string()));
        }
        if let Some(uri) = message.image_url.as_deref() {
            if let Ok(uri) = DataUri::parse(uri) {
                parts.push(Part::InlineData(uri.into()));
            }
        }
        if parts.is_empty() {
            return None;
        }
        Some(Self {
            role: message.role,
            parts,
        })
    }

    /// The new user turn: image first (when present), then text.
    /// Blank text is left out of image-only turns.
    pub fn user_turn(text: &str, image: Option<InlineData>) -> Self {
        let mut parts = Vec::new();
        if let Some(image) = image {
            parts.push(Part::InlineData(image));
        }
        if !text.is_empty() || parts.is_empty() {
            parts.push(Part::Text(text.to_string()));
        }
        Self {
            role: Role::User,
            parts,
        }
    }
}

/// Re-project stored history into request turns, in order.
pub fn history_contents(messages: &[Message]) -> Vec<Content> {
    messages.iter().filter_map(Content::from_message).collect()
}

/// Structured request configuration, assembled by pure rules
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub system_instruction: Option<String>,
    pub temperature: f32,
    /// Present only for the Pro tier with thinking mode on
    pub thinking_budget: Option<u32>,
    /// Let the service ground answers in web search
    pub search_grounding: bool,
}

impl GenerationConfig {
    pub fn from_settings(settings: &Settings, search_grounding: bool) -> Self {
        let instruction = settings.system_instruction.trim();
        Self {
            system_instruction: (!instruction.is_empty()).then(|| instruction.to_string()),
            temperature: settings.temperature,
            thinking_budget: settings.thinking_enabled().then_some(THINKING_BUDGET),
            search_grounding,
        }
    }
}

/// A complete streaming chat request
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: ModelTier,
    pub history: Vec<Content>,
    pub turn: Content,
    pub config: GenerationConfig,
}

/// A citation as reported by the service; either field may be missing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Citation {
    pub title: Option<String>,
    pub uri: Option<String>,
}

impl Citation {
    /// Display form: title, else URI, else "Source"; URI defaults to "#".
    pub fn to_source(&self) -> GroundingSource {
        let title = non_empty(&self.title)
            .or_else(|| non_empty(&self.uri))
            .unwrap_or("Source")
            .to_string();
        let uri = non_empty(&self.uri).unwrap_or("#").to_string();
        GroundingSource { title, uri }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// One increment of a streamed response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatChunk {
    pub text: String,
    /// Citation metadata, usually only on the final chunk
    pub citations: Option<Vec<Citation>>,
}

impl ChatChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            citations: None,
        }
    }
}

/// Ordered stream of response increments
pub type ChatStream = Pin<Box<dyn Stream<Item = ChatResult<ChatChunk>> + Send>>;

/// The remote generative service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Start a streaming chat completion.
    async fn stream_chat(&self, request: ChatRequest) -> ChatResult<ChatStream>;

    /// Generate one image from a text prompt.
    async fn generate_image(&self, prompt: String) -> ChatResult<InlineData>;

    /// Synthesize speech; returns raw 16-bit PCM bytes.
    async fn synthesize_speech(&self, text: String) -> ChatResult<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_without_extras() {
        let config = GenerationConfig::from_settings(&Settings::default(), false);
        assert_eq!(config.temperature, 0.7);
        assert!(config.system_instruction.is_some());
        assert_eq!(config.thinking_budget, None);
        assert!(!config.search_grounding);
    }

    #[test]
    fn test_thinking_budget_only_for_pro() {
        let pro = Settings::default()
            .with_model(ModelTier::Pro)
            .with_thinking(true);
        assert_eq!(
            GenerationConfig::from_settings(&pro, false).thinking_budget,
            Some(THINKING_BUDGET)
        );

        let stale = Settings {
            thinking_mode: true,
            ..Settings::default()
        };
        assert_eq!(GenerationConfig::from_settings(&stale, false).thinking_budget, None);
    }

    #[test]
    fn test_blank_system_instruction_omitted() {
        let settings = Settings::default().with_system_instruction("   ");
        let config = GenerationConfig::from_settings(&settings, true);
        assert!(config.system_instruction.is_none());
        assert!(config.search_grounding);
    }

    #[test]
    fn test_history_reprojects_images() {
        let messages = vec![
            Message::user("What is this?", Some("data:image/png;base64,AAAA".into())),
            Message::model_text("A square."),
            Message::placeholder(),
        ];
        let history = history_contents(&messages);

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(
            history[0].parts,
            vec![
                Part::Text("What is this?".into()),
                Part::InlineData(InlineData {
                    mime_type: "image/png".into(),
                    data: "AAAA".into(),
                }),
            ]
        );
        assert_eq!(history[1].parts, vec![Part::Text("A square.".into())]);
    }

    #[test]
    fn test_user_turn_puts_image_first() {
        let image = InlineData {
            mime_type: "image/jpeg".into(),
            data: "BBBB".into(),
        };
        let turn = Content::user_turn("describe", Some(image.clone()));
        assert_eq!(turn.parts[0], Part::InlineData(image.clone()));
        assert_eq!(turn.parts[1], Part::Text("describe".into()));

        let image_only = Content::user_turn("", Some(image));
        assert_eq!(image_only.parts.len(), 1);
    }

    #[test]
    fn test_citation_fallbacks() {
        let full = Citation {
            title: Some("Rust".into()),
            uri: Some("https://rust-lang.org".into()),
        };
        assert_eq!(full.to_source().title, "Rust");

        let uri_only = Citation {
            title: None,
            uri: Some("https://crates.io".into()),
        };
        assert_eq!(uri_only.to_source().title, "https://crates.io");

        let empty = Citation::default().to_source();
        assert_eq!(empty.title, "Source");
        assert_eq!(empty.uri, "#");
    }

    #[test]
    fn test_inline_data_to_uri() {
        let data = InlineData {
            mime_type: "image/png".into(),
            data: "QUJD".into(),
        };
        assert_eq!(data.to_data_uri(), "data:image/png;base64,QUJD");
    }
}
