//! Per-session model configuration.

use serde::{Deserialize, Serialize};

/// Default system instruction for new sessions.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "You are a helpful and friendly assistant named Ryzer. You must format your responses in Markdown.";

/// Default sampling temperature for new sessions.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Chat model tiers offered by the generative service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ModelTier {
    /// Fastest, cheapest tier
    #[serde(rename = "gemini-2.5-flash-lite")]
    FlashLite,
    /// Balanced tier
    #[default]
    #[serde(rename = "gemini-2.5-flash")]
    Flash,
    /// Most capable tier, the only one honouring thinking mode
    #[serde(rename = "gemini-2.5-pro")]
    Pro,
}

impl ModelTier {
    /// All tiers, cheapest first.
    pub const ALL: [ModelTier; 3] = [Self::FlashLite, Self::Flash, Self::Pro];

    /// Service-side model name
    pub fn api_name(&self) -> &'static str {
        match self {
            Self::FlashLite => "gemini-2.5-flash-lite",
            Self::Flash => "gemini-2.5-flash",
            Self::Pro => "gemini-2.5-pro",
        }
    }

    /// Get the display name for this tier
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::FlashLite => "Flash Lite",
            Self::Flash => "Flash",
            Self::Pro => "Pro",
        }
    }

    /// Whether the tier accepts an extended thinking budget
    pub fn supports_thinking(&self) -> bool {
        matches!(self, Self::Pro)
    }

    /// Parse either the service name or the short display name.
    pub fn parse(value: &str) -> Option<Self> {
        let lower = value.trim().to_lowercase();
        Self::ALL.into_iter().find(|tier| {
            tier.api_name() == lower || tier.display_name().to_lowercase().replace(' ', "-") == lower
        })
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.api_name())
    }
}

/// Model configuration attached to one session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub system_instruction: String,
    pub model: ModelTier,
    /// Creativity, in `[0, 1]`
    pub temperature: f32,
    pub thinking_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            model: ModelTier::default(),
            temperature: DEFAULT_TEMPERATURE,
            thinking_mode: false,
        }
    }
}

impl Settings {
    /// Switch model tier. Leaving the Pro tier always turns thinking off.
    pub fn with_model(mut self, model: ModelTier) -> Self {
        self.model = model;
        if !model.supports_thinking() {
            self.thinking_mode = false;
        }
        self
    }

    /// Request thinking mode; ignored on tiers that cannot honour it.
    pub fn with_thinking(mut self, enabled: bool) -> Self {
        self.thinking_mode = enabled && self.model.supports_thinking();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self.normalized()
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    /// Clamp the temperature and re-apply the thinking invariant.
    pub fn normalized(mut self) -> Self {
        self.temperature = if self.temperature.is_finite() {
            self.temperature.clamp(0.0, 1.0)
        } else {
            DEFAULT_TEMPERATURE
        };
        if !self.model.supports_thinking() {
            self.thinking_mode = false;
        }
        self
    }

    /// Whether requests built from these settings carry a thinking budget
    pub fn thinking_enabled(&self) -> bool {
        self.thinking_mode && self.model.supports_thinking()
    }
}
