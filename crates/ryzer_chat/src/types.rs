//! Core types for the chat client.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::settings::Settings;

/// Unique identifier for a chat session
pub type SessionId = String;

/// Unique identifier for a message
pub type MessageId = String;

/// Title given to freshly created sessions
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// Fresh time-ordered identifier.
///
/// UUIDv7 ids sort by creation instant, which is what "last model
/// message" lookups rely on.
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Current instant as Unix milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Message role in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// Thumbs up/down rating on a model response. Absence means no rating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Up,
    Down,
}

impl Feedback {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "up" | "+" | "good" => Some(Self::Up),
            "down" | "-" | "bad" => Some(Self::Down),
            _ => None,
        }
    }
}

/// A web source cited by a grounded response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroundingSource {
    pub title: String,
    pub uri: String,
}

/// Where a model response sits in its lifecycle.
///
/// `Pending → Streaming → {Complete | Cancelled | Errored}`. Terminal
/// states are persisted as they are; nothing is retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    /// Placeholder inserted, no text yet
    Pending,
    /// Text is growing chunk by chunk
    Streaming,
    /// Stream exhausted normally
    Complete,
    /// Stop requested; partial text kept
    Cancelled,
    /// Request failed before any text arrived
    Errored,
}

impl ResponseState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Errored)
    }
}

/// A single chat message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique, time-ordered message ID
    pub id: MessageId,
    /// Role of the message sender
    pub role: Role,
    /// Text content (absent for generated images)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Attached or generated image as a `data:` URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub feedback: Option<Feedback>,
    /// Creation instant, Unix milliseconds
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding_sources: Option<Vec<GroundingSource>>,
}

impl Message {
    fn new(role: Role, text: Option<String>, image_url: Option<String>) -> Self {
        Self {
            id: new_id(),
            role,
            text,
            image_url,
            feedback: None,
            timestamp: now_millis(),
            grounding_sources: None,
        }
    }

    /// Create a new user message
    pub fn user(text: impl Into<String>, image_url: Option<String>) -> Self {
        Self::new(Role::User, Some(text.into()), image_url)
    }

    /// Create an empty model message to be filled by a stream
    pub fn placeholder() -> Self {
        Self::new(Role::Model, Some(String::new()), None)
    }

    /// Create a complete text model message
    pub fn model_text(text: impl Into<String>) -> Self {
        Self::new(Role::Model, Some(text.into()), None)
    }

    /// Create a model message carrying a generated image
    pub fn model_image(image_url: impl Into<String>) -> Self {
        Self::new(Role::Model, None, Some(image_url.into()))
    }

    /// Text content, empty when absent
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    pub fn has_text(&self) -> bool {
        !self.text().is_empty()
    }

    /// A model message with neither text nor image is still in flight.
    pub fn is_placeholder(&self) -> bool {
        self.role == Role::Model && !self.has_text() && self.image_url.is_none()
    }

    /// Toggle a rating: the same rating twice clears it.
    pub fn toggle_feedback(&mut self, feedback: Feedback) {
        self.feedback = if self.feedback == Some(feedback) {
            None
        } else {
            Some(feedback)
        };
    }
}

/// Full chat session state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    /// Unique session ID
    pub id: SessionId,
    pub title: String,
    /// Messages in insertion order
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub settings: Settings,
    /// Title is being edited in the UI; never persisted
    #[serde(skip)]
    pub is_editing: bool,
}

impl ChatSession {
    /// Create a new empty session with default settings
    pub fn new() -> Self {
        Self {
            id: new_id(),
            title: DEFAULT_SESSION_TITLE.to_string(),
            messages: Vec::new(),
            settings: Settings::default(),
            is_editing: false,
        }
    }

    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    pub fn position(&self, message_id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == message_id)
    }

    /// Most recent model message; the only one offering "regenerate".
    pub fn last_model_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Model)
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Colour theme preference
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "light" => Some(Self::Light),
            "dark" => Some(Self::Dark),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello", None);
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "Hello");
        assert!(!msg.is_placeholder());

        let msg = Message::placeholder();
        assert_eq!(msg.role, Role::Model);
        assert!(msg.is_placeholder());

        let msg = Message::model_image("data:image/png;base64,AAAA");
        assert!(msg.text.is_none());
        assert!(!msg.is_placeholder());
    }

    #[test]
    fn test_ids_are_time_ordered() {
        let first = Message::user("a", None);
        let second = Message::user("b", None);
        assert_ne!(first.id, second.id);
        assert!(first.id < second.id);
    }

    #[test]
    fn test_feedback_tri_state() {
        let mut msg = Message::model_text("Hi");
        msg.toggle_feedback(Feedback::Up);
        assert_eq!(msg.feedback, Some(Feedback::Up));
        msg.toggle_feedback(Feedback::Up);
        assert_eq!(msg.feedback, None);
        msg.toggle_feedback(Feedback::Up);
        msg.toggle_feedback(Feedback::Down);
        assert_eq!(msg.feedback, Some(Feedback::Down));
    }

    #[test]
    fn test_message_json_shape() {
        let mut msg = Message::model_text("Answer");
        msg.grounding_sources = Some(vec![GroundingSource {
            title: "Docs".into(),
            uri: "https://example.com".into(),
        }]);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "model");
        assert_eq!(json["feedback"], serde_json::Value::Null);
        assert_eq!(json["groundingSources"][0]["uri"], "https://example.com");
        assert!(json.get("imageUrl").is_none());
    }

    #[test]
    fn test_editing_flag_not_persisted() {
        let mut session = ChatSession::new();
        session.is_editing = true;
        let json = serde_json::to_string(&session).unwrap();
        assert!(!json.contains("isEditing"));

        let restored: ChatSession = serde_json::from_str(&json).unwrap();
        assert!(!restored.is_editing);
        assert_eq!(restored.title, DEFAULT_SESSION_TITLE);
    }

    #[test]
    fn test_last_model_message() {
        let mut session = ChatSession::new();
        assert!(session.last_model_message().is_none());
        session.messages.push(Message::user("q1", None));
        session.messages.push(Message::model_text("a1"));
        session.messages.push(Message::user("q2", None));
        session.messages.push(Message::model_text("a2"));
        assert_eq!(session.last_model_message().unwrap().text(), "a2");
    }
}
