//! Send and regenerate - stream an answer to stdout.

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Args;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, info};

use ryzer_chat::{
    extension_for_mime, Coordinator, DataUri, GeminiClient, Outgoing, SendKind, SendOutcome,
    StreamController, StreamEvent,
};

use super::{active_session, Context, UsageError};

#[derive(Args)]
pub struct SendArgs {
    /// Message text
    #[arg(num_args = 0..)]
    text: Vec<String>,

    /// Attach an image file
    #[arg(long, value_name = "PATH")]
    image: Option<PathBuf>,

    /// Generate an image from the text instead of chatting
    #[arg(long)]
    image_mode: bool,

    /// Ground the answer in web search
    #[arg(long)]
    search: bool,
}

#[derive(Args)]
pub struct RegenerateArgs {
    /// Answer to regenerate (defaults to the last one)
    message_id: Option<String>,

    /// Ground the answer in web search
    #[arg(long)]
    search: bool,
}

pub async fn execute(args: SendArgs, ctx: &Context) -> Result<()> {
    let mut outgoing = Outgoing::text(args.text.join(" "));
    if let Some(path) = &args.image {
        outgoing = outgoing
            .attach_file(path)
            .with_context(|| format!("Failed to read image {}", path.display()))?;
    }
    if outgoing.is_empty() {
        return Err(UsageError::Invalid("nothing to send".into()).into());
    }

    let controller = ctx.controller(&ctx.speech_dir())?;
    controller.set_image_mode(args.image_mode);
    controller.set_search_grounding(args.search);

    let session_id = active_session(controller.store())?.id;
    info!("Sending to session {}", session_id);

    let outcome = stream_to_stdout(
        &controller,
        &session_id,
        controller.send_to(&session_id, outgoing, SendKind::Fresh),
    )
    .await;
    report(&controller, &session_id, outcome, ctx)
}

pub async fn regenerate(args: RegenerateArgs, ctx: &Context) -> Result<()> {
    let controller = Arc::new(ctx.controller(&ctx.speech_dir())?);
    controller.set_search_grounding(args.search);

    let session = active_session(controller.store())?;
    let message_id = match args.message_id {
        Some(id) => id,
        None => session
            .last_model_message()
            .map(|m| m.id.clone())
            .ok_or_else(|| UsageError::Invalid("no answer to regenerate".into()))?,
    };
    if session.message(&message_id).is_none() {
        return Err(UsageError::MessageNotFound(message_id).into());
    }

    let coordinator = Coordinator::new(Arc::clone(&controller));
    let outcome = stream_to_stdout(
        &controller,
        &session.id,
        coordinator.regenerate(&message_id),
    )
    .await;
    if outcome == SendOutcome::Ignored {
        return Err(UsageError::Invalid(format!("{} has no user turn to answer", message_id)).into());
    }
    report(&controller, &session.id, outcome, ctx)
}

/// Drive a send while echoing deltas; Ctrl-C requests a cooperative stop.
async fn stream_to_stdout<F>(
    controller: &StreamController<GeminiClient>,
    session_id: &str,
    send: F,
) -> SendOutcome
where
    F: Future<Output = SendOutcome>,
{
    let mut events = controller.subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(send);
    tokio::pin!(ctrl_c);
    let mut stopping = false;

    let outcome = loop {
        tokio::select! {
            outcome = &mut send => break outcome,
            event = events.recv() => {
                if let Ok(event) = event {
                    print_event(&event);
                }
            }
            _ = &mut ctrl_c, if !stopping => {
                stopping = true;
                debug!("Interrupt received");
                controller.stop_generation(session_id);
            }
        }
    };

    loop {
        match events.try_recv() {
            Ok(event) => print_event(&event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    outcome
}

fn print_event(event: &StreamEvent) {
    match event {
        StreamEvent::Delta { text, .. } => {
            print!("{}", text);
            let _ = std::io::stdout().flush();
        }
        StreamEvent::Finished { .. } => println!(),
        StreamEvent::Started { .. } => {}
    }
}

fn report(
    controller: &StreamController<GeminiClient>,
    session_id: &str,
    outcome: SendOutcome,
    ctx: &Context,
) -> Result<()> {
    let last = controller
        .store()
        .session(session_id)
        .and_then(|s| s.last_model_message().cloned());

    match outcome {
        SendOutcome::Completed => Ok(()),
        SendOutcome::Cancelled => {
            eprintln!("⏹️  Generation stopped");
            Ok(())
        }
        SendOutcome::Errored => {
            let text = last.map(|m| m.text().to_string()).unwrap_or_default();
            anyhow::bail!("Response failed: {}", text)
        }
        SendOutcome::ImageGenerated => {
            let Some(message) = last else {
                return Ok(());
            };
            let Some(uri) = message.image_url.as_deref() else {
                return Ok(());
            };
            let image = DataUri::parse(uri)?;
            let dir = ctx.image_dir();
            std::fs::create_dir_all(&dir)?;
            let path = dir.join(format!(
                "{}.{}",
                message.id,
                extension_for_mime(&image.mime_type)
            ));
            std::fs::write(&path, image.decode()?)?;
            ctx.note(format!("🖼️  Saved image to {}", path.display()));
            Ok(())
        }
        SendOutcome::ImageFailed => {
            let text = last.map(|m| m.text().to_string()).unwrap_or_default();
            anyhow::bail!("{}", text)
        }
        SendOutcome::Busy => anyhow::bail!("Session {} is still answering", session_id),
        SendOutcome::Ignored => Err(UsageError::Invalid("nothing to send".into()).into()),
    }
}
