//! CLI command definitions.
//!
//! Every command opens the session store in the data directory, does its
//! work and exits. Only commands that reach the generative service need
//! an API key.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use thiserror::Error;

use ryzer_chat::{
    resolve_data_dir, AudioPlayer, ChatSession, GeminiClient, ServiceConfig, SessionPersistence,
    SessionStore, StreamController, WavFileSink,
};

pub mod export;
pub mod message;
pub mod send;
pub mod session;
pub mod settings;

/// Ryzer - chat with Gemini from the terminal
#[derive(Parser)]
#[command(name = "ryzer")]
#[command(version, about = "Ryzer - chat with Gemini from the terminal")]
#[command(long_about = r#"
Ryzer keeps any number of independent chat sessions, each with its own
model settings, and streams answers straight to your terminal.

SESSIONS:
  new / list / use / rename / delete   → Manage sessions
  clear / show                         → Work with the active session

CHAT:
  send         → Send a message (Ctrl-C stops the answer)
  regenerate   → Ask again for the last (or a given) answer
  feedback     → Rate an answer up or down
  speak        → Render an answer as speech (WAV)
  export       → Save the active session as JSON

CONFIGURATION:
  settings     → Model, temperature, thinking mode, system instruction
  theme        → Light or dark preference

ENVIRONMENT:
  GEMINI_API_KEY / API_KEY   API key for the generative service
  RYZER_API_BASE             Override the service endpoint
  RYZER_DATA_DIR             Where sessions are stored (default ./.ryzer)

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Service not configured
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Directory holding sessions and preferences
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new session and make it active
    New,

    /// List all sessions, newest first
    List,

    /// Switch the active session
    Use(session::UseArgs),

    /// Rename a session
    Rename(session::RenameArgs),

    /// Delete a session
    Delete(session::DeleteArgs),

    /// Remove every message from the active session
    Clear,

    /// Print the active session's messages
    Show(session::ShowArgs),

    /// Send a message to the active session
    Send(send::SendArgs),

    /// Regenerate an answer of the active session
    Regenerate(send::RegenerateArgs),

    /// Rate an answer of the active session
    Feedback(message::FeedbackArgs),

    /// Render an answer as speech
    Speak(message::SpeakArgs),

    /// Export the active session as JSON
    Export(export::ExportArgs),

    /// Show or change the active session's model settings
    Settings(settings::SettingsArgs),

    /// Show or change the theme preference
    Theme(settings::ThemeArgs),
}

/// Errors caused by what the user typed
#[derive(Debug, Error)]
pub enum UsageError {
    #[error("Invalid argument: {0}")]
    Invalid(String),

    #[error("Message not found in the active session: {0}")]
    MessageNotFound(String),
}

/// Shared state for one invocation
pub struct Context {
    pub data_dir: PathBuf,
    pub quiet: bool,
}

impl Context {
    pub fn new(data_dir: Option<PathBuf>, quiet: bool) -> Self {
        Self {
            data_dir: resolve_data_dir(data_dir),
            quiet,
        }
    }

    pub fn persistence(&self) -> SessionPersistence {
        SessionPersistence::in_dir(&self.data_dir)
    }

    pub fn store(&self) -> SessionStore {
        SessionStore::open(self.persistence())
    }

    /// Default output directory for synthesized speech
    pub fn speech_dir(&self) -> PathBuf {
        self.data_dir.join("speech")
    }

    /// Default output directory for generated images
    pub fn image_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }

    /// Controller wired to the Gemini service; fails without an API key.
    pub fn controller(&self, speech_dir: &Path) -> anyhow::Result<StreamController<GeminiClient>> {
        let config = ServiceConfig::from_data_dir(&self.data_dir)?;
        let sample_rate = config.speech_sample_rate;
        let player = AudioPlayer::new(Arc::new(WavFileSink::new(speech_dir)));
        Ok(StreamController::new(
            Arc::new(GeminiClient::new(config)),
            self.store(),
            player,
        )
        .with_speech_sample_rate(sample_rate))
    }

    /// Print unless `--quiet`
    pub fn note(&self, message: impl AsRef<str>) {
        if !self.quiet {
            println!("{}", message.as_ref());
        }
    }
}

/// Snapshot of the active session; a reconciled store always has one.
pub fn active_session(store: &SessionStore) -> anyhow::Result<ChatSession> {
    store
        .active_session()
        .ok_or_else(|| anyhow::anyhow!("No active session"))
}
