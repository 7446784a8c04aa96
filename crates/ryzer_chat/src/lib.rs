//! # ryzer_chat - Chat client core for Ryzer
//!
//! This crate provides everything behind the Ryzer chat UI:
//! - Multiple independent chat sessions, each with its own model settings
//! - Streamed model responses with cooperative cancellation
//! - One-shot image generation and text-to-speech playback
//! - Regeneration of answers and thumbs up/down feedback
//! - Write-through persistence to a local key-value store, plus JSON export
//!
//! ## Key Features
//!
//! - **Session isolation**: every async write targets the session id it
//!   captured when it started, never "whatever is active now"
//! - **Explicit response states**: pending, streaming, then complete,
//!   cancelled or errored; every failure leaves a defined message
//! - **Pluggable service**: the controller talks to [`GenerativeBackend`];
//!   [`GeminiClient`] is the HTTP implementation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌───────────────────┐
//! │   Coordinator   │────▶│ StreamController │────▶│ GenerativeBackend │
//! │ regen/feedback  │     │ chat/image/speech│     │   (GeminiClient)  │
//! └─────────────────┘     └────────┬─────────┘     └───────────────────┘
//!                                  │
//!                  ┌───────────────┴───────────────┐
//!                  ▼                               ▼
//!         ┌────────────────┐              ┌────────────────┐
//!         │  SessionStore  │              │  AudioPlayer   │
//!         └───────┬────────┘              └────────────────┘
//!                 ▼
//!       ┌────────────────────┐
//!       │ SessionPersistence │
//!       │  (KeyValueStore)   │
//!       └────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod data_uri;
pub mod error;
pub mod export;
pub mod gemini;
pub mod llm;
pub mod persistence;
pub mod settings;
pub mod sse;
pub mod store;
pub mod types;

pub use audio::*;
pub use config::*;
pub use controller::*;
pub use coordinator::*;
pub use data_uri::*;
pub use error::*;
pub use export::*;
pub use gemini::*;
pub use llm::*;
pub use persistence::*;
pub use settings::*;
pub use store::*;
pub use types::*;
