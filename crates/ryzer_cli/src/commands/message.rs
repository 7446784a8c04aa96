//! Per-message commands - feedback and speech.

use anyhow::Result;
use clap::Args;

use ryzer_chat::{Feedback, SpeakOutcome};

use super::{active_session, Context, UsageError};

#[derive(Args)]
pub struct FeedbackArgs {
    /// Answer to rate
    message_id: String,

    /// up or down; repeating the current rating clears it
    rating: String,
}

#[derive(Args)]
pub struct SpeakArgs {
    /// Message to read aloud
    message_id: String,

    /// Directory for the rendered WAV file
    #[arg(long, value_name = "DIR")]
    out: Option<std::path::PathBuf>,
}

pub async fn feedback(args: FeedbackArgs, ctx: &Context) -> Result<()> {
    let feedback = Feedback::parse(&args.rating)
        .ok_or_else(|| UsageError::Invalid(format!("rating must be up or down, got {}", args.rating)))?;

    let store = ctx.store();
    let session = active_session(&store)?;
    if !store.toggle_feedback(&args.message_id, feedback) {
        return Err(UsageError::MessageNotFound(args.message_id).into());
    }

    let current = store
        .session(&session.id)
        .and_then(|s| s.message(&args.message_id).and_then(|m| m.feedback));
    match current {
        Some(Feedback::Up) => ctx.note("👍 Rated up"),
        Some(Feedback::Down) => ctx.note("👎 Rated down"),
        None => ctx.note("Rating cleared"),
    }
    Ok(())
}

pub async fn speak(args: SpeakArgs, ctx: &Context) -> Result<()> {
    let dir = args.out.unwrap_or_else(|| ctx.speech_dir());
    let controller = ctx.controller(&dir)?;

    match controller.speak(&args.message_id).await {
        SpeakOutcome::Playing => {
            controller.player().wait_idle().await;
            let path = dir.join(format!("{}.wav", args.message_id));
            ctx.note(format!("🔊 Wrote {}", path.display()));
            Ok(())
        }
        SpeakOutcome::Stopped => Ok(()),
        SpeakOutcome::Failed => anyhow::bail!("Speech synthesis failed"),
        SpeakOutcome::Ignored => Err(UsageError::MessageNotFound(args.message_id).into()),
    }
}
