//! Generative service configuration.
//!
//! Resolution order: explicit values, then `settings.json` in the data
//! directory, then the environment (`GEMINI_API_KEY`, `API_KEY`,
//! `RYZER_API_BASE`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ChatError, ChatResult};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_SPEECH_MODEL: &str = "gemini-2.5-flash-preview-tts";
/// Sample rate of synthesized speech (mono, 16-bit PCM)
pub const SPEECH_SAMPLE_RATE: u32 = 24_000;

/// Data directory used when nothing else is given
pub const DEFAULT_DATA_DIR: &str = ".ryzer";
/// Name of the optional settings file inside the data directory
pub const SETTINGS_FILE: &str = "settings.json";

/// Optional overrides read from `<data_dir>/settings.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech_model: Option<String>,
}

impl SettingsFile {
    /// Read the settings file; a missing or unreadable file yields defaults.
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(SETTINGS_FILE);
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(&path)
            .map_err(ChatError::from)
            .and_then(|content| serde_json::from_str(&content).map_err(ChatError::from))
        {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring unreadable {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Everything needed to reach the generative service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_key: String,
    pub api_base: String,
    pub image_model: String,
    pub speech_model: String,
    pub speech_sample_rate: u32,
}

impl ServiceConfig {
    /// Create a configuration with default endpoints and models
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            speech_model: DEFAULT_SPEECH_MODEL.to_string(),
            speech_sample_rate: SPEECH_SAMPLE_RATE,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Create a configuration from environment variables
    ///
    /// Checks in order:
    /// 1. GEMINI_API_KEY
    /// 2. API_KEY
    pub fn from_env() -> ChatResult<Self> {
        let api_key = ["GEMINI_API_KEY", "API_KEY"]
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|value| !value.trim().is_empty())
            .ok_or(ChatError::NotConfigured)?;

        let mut config = Self::new(api_key.trim());
        if let Ok(base) = std::env::var("RYZER_API_BASE") {
            if !base.trim().is_empty() {
                config = config.with_api_base(base.trim());
            }
        }
        Ok(config)
    }

    /// Environment configuration refined by the data directory's settings file
    pub fn from_data_dir(data_dir: &Path) -> ChatResult<Self> {
        let mut config = Self::from_env()?;
        let file = SettingsFile::load(data_dir);
        config.apply(file);
        debug!("Service endpoint: {}", config.api_base);
        Ok(config)
    }

    fn apply(&mut self, file: SettingsFile) {
        if let Some(base) = file.api_base {
            self.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(model) = file.image_model {
            self.image_model = model;
        }
        if let Some(model) = file.speech_model {
            self.speech_model = model;
        }
    }
}

/// Resolve the data directory: explicit path, `RYZER_DATA_DIR`, or `./.ryzer`.
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| {
            std::env::var("RYZER_DATA_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}
