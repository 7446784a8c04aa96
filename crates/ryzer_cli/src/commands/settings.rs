//! Settings and theme commands.

use anyhow::Result;
use clap::Args;
use tracing::warn;

use ryzer_chat::{ModelTier, Settings, Theme};

use super::{active_session, Context, UsageError};

#[derive(Args, Default)]
pub struct SettingsArgs {
    /// Model tier (flash-lite, flash, pro or the full model name)
    #[arg(long, value_parser = parse_model)]
    model: Option<ModelTier>,

    /// Sampling temperature between 0 and 1
    #[arg(long)]
    temperature: Option<f32>,

    /// Extended thinking (Pro only)
    #[arg(long, value_name = "BOOL", action = clap::ArgAction::Set)]
    thinking: Option<bool>,

    /// System instruction for the model
    #[arg(long, value_name = "TEXT")]
    system: Option<String>,
}

impl SettingsArgs {
    fn is_empty(&self) -> bool {
        self.model.is_none()
            && self.temperature.is_none()
            && self.thinking.is_none()
            && self.system.is_none()
    }

    /// Apply the requested changes; the model goes first so a thinking
    /// request is judged against the new tier.
    fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(model) = self.model {
            settings = settings.with_model(model);
        }
        if let Some(thinking) = self.thinking {
            settings = settings.with_thinking(thinking);
        }
        if let Some(temperature) = self.temperature {
            settings = settings.with_temperature(temperature);
        }
        if let Some(system) = &self.system {
            settings = settings.with_system_instruction(system.clone());
        }
        settings
    }
}

#[derive(Args)]
pub struct ThemeArgs {
    /// light or dark; omit to print the current preference
    theme: Option<String>,
}

fn parse_model(value: &str) -> Result<ModelTier, String> {
    ModelTier::parse(value).ok_or_else(|| {
        let names: Vec<_> = ModelTier::ALL.iter().map(|t| t.api_name()).collect();
        format!("unknown model '{}', expected one of {}", value, names.join(", "))
    })
}

pub async fn execute(args: SettingsArgs, ctx: &Context) -> Result<()> {
    let store = ctx.store();
    let session = active_session(&store)?;

    let settings = if args.is_empty() {
        session.settings
    } else {
        let updated = args.apply(session.settings);
        if args.thinking == Some(true) && !updated.thinking_mode {
            warn!("Thinking mode needs the Pro model; left off");
        }
        store.update_settings(&session.id, updated.clone());
        updated.normalized()
    };

    println!("model:        {} ({})", settings.model.display_name(), settings.model);
    println!("temperature:  {:.2}", settings.temperature);
    println!("thinking:     {}", if settings.thinking_mode { "on" } else { "off" });
    println!("system:       {}", settings.system_instruction);
    Ok(())
}

pub async fn theme(args: ThemeArgs, ctx: &Context) -> Result<()> {
    let persistence = ctx.persistence();

    match args.theme {
        Some(value) => {
            let theme = Theme::parse(&value)
                .ok_or_else(|| UsageError::Invalid(format!("theme must be light or dark, got {}", value)))?;
            persistence.save_theme(theme)?;
            ctx.note(format!("Theme set to {}", theme.as_str()));
        }
        None => {
            let theme = persistence.load_theme().unwrap_or_default();
            println!("{}", theme.as_str());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_names() {
        assert_eq!(parse_model("pro"), Ok(ModelTier::Pro));
        assert_eq!(parse_model("flash-lite"), Ok(ModelTier::FlashLite));
        assert_eq!(parse_model("gemini-2.5-flash"), Ok(ModelTier::Flash));
        assert!(parse_model("gpt").is_err());
    }

    #[test]
    fn test_apply_model_before_thinking() {
        let args = SettingsArgs {
            model: Some(ModelTier::Pro),
            thinking: Some(true),
            ..SettingsArgs::default()
        };
        assert!(args.apply(Settings::default()).thinking_mode);
    }

    #[test]
    fn test_leaving_pro_turns_thinking_off() {
        let pro = Settings::default()
            .with_model(ModelTier::Pro)
            .with_thinking(true);
        let args = SettingsArgs {
            model: Some(ModelTier::Flash),
            ..SettingsArgs::default()
        };
        assert!(!args.apply(pro).thinking_mode);
    }

    #[test]
    fn test_temperature_clamped() {
        let args = SettingsArgs {
            temperature: Some(3.0),
            ..SettingsArgs::default()
        };
        assert_eq!(args.apply(Settings::default()).temperature, 1.0);
        assert!(SettingsArgs::default().is_empty());
    }
}
