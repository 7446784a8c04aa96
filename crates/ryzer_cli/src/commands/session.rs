//! Session commands - create, list, switch, rename, delete, clear, show.

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use clap::Args;
use tracing::info;

use ryzer_chat::{ChatError, DataUri, Feedback, Message, Role};

use super::{active_session, Context};

#[derive(Args)]
pub struct UseArgs {
    /// Session to activate
    id: String,
}

#[derive(Args)]
pub struct RenameArgs {
    /// Session to rename
    id: String,

    /// New title
    #[arg(required = true, num_args = 1..)]
    title: Vec<String>,
}

#[derive(Args)]
pub struct DeleteArgs {
    /// Session to delete
    id: String,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Print the session as JSON instead
    #[arg(long)]
    json: bool,
}

pub async fn new(ctx: &Context) -> Result<()> {
    let store = ctx.store();
    let session = store.create_session();
    ctx.note(format!("✨ Created session {}", session.id));
    Ok(())
}

pub async fn list(ctx: &Context) -> Result<()> {
    let store = ctx.store();
    let active = store.active_id();

    for session in store.sessions() {
        let marker = if active.as_deref() == Some(session.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {}  {:<30}  {:>3} msg  {}",
            marker,
            session.id,
            session.title,
            session.messages.len(),
            session.settings.model.display_name()
        );
    }
    Ok(())
}

pub async fn use_session(args: UseArgs, ctx: &Context) -> Result<()> {
    let store = ctx.store();
    if !store.set_active(&args.id) {
        return Err(ChatError::SessionNotFound(args.id).into());
    }
    ctx.note(format!("Switched to session {}", args.id));
    Ok(())
}

pub async fn rename(args: RenameArgs, ctx: &Context) -> Result<()> {
    let title = args.title.join(" ");
    let store = ctx.store();
    if !store.rename_session(&args.id, title.trim()) {
        return Err(ChatError::SessionNotFound(args.id).into());
    }
    ctx.note(format!("Renamed session {} to \"{}\"", args.id, title.trim()));
    Ok(())
}

pub async fn delete(args: DeleteArgs, ctx: &Context) -> Result<()> {
    let store = ctx.store();
    if !store.delete_session(&args.id) {
        return Err(ChatError::SessionNotFound(args.id).into());
    }
    ctx.note(format!("🗑️  Deleted session {}", args.id));
    if let Some(active) = store.active_id() {
        info!("Active session is now {}", active);
    }
    Ok(())
}

pub async fn clear(ctx: &Context) -> Result<()> {
    let store = ctx.store();
    let session = active_session(&store)?;
    store.clear_messages(&session.id);
    ctx.note(format!("Cleared {} message(s)", session.messages.len()));
    Ok(())
}

pub async fn show(args: ShowArgs, ctx: &Context) -> Result<()> {
    let session = active_session(&ctx.store())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&session)?);
        return Ok(());
    }

    println!("# {} ({})", session.title, session.id);
    println!(
        "  model {} · temperature {:.1}{}",
        session.settings.model.display_name(),
        session.settings.temperature,
        if session.settings.thinking_enabled() {
            " · thinking"
        } else {
            ""
        }
    );

    if session.messages.is_empty() {
        println!("\n  (no messages yet)");
    }
    for message in &session.messages {
        print_message(message);
    }
    Ok(())
}

fn print_message(message: &Message) {
    let who = match message.role {
        Role::User => "You",
        Role::Model => "Ryzer",
    };
    let when = DateTime::<Utc>::from_timestamp_millis(message.timestamp)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    let rating = match message.feedback {
        Some(Feedback::Up) => " 👍",
        Some(Feedback::Down) => " 👎",
        None => "",
    };

    println!("\n{} · {} · {}{}", who, when, message.id, rating);
    if let Some(uri) = message.image_url.as_deref() {
        match DataUri::parse(uri) {
            Ok(image) => println!("  [image {}, {} base64 chars]", image.mime_type, image.data.len()),
            Err(_) => println!("  [image]"),
        }
    }
    if message.is_placeholder() {
        println!("  (no response)");
    } else if message.has_text() {
        for line in message.text().lines() {
            println!("  {}", line);
        }
    }
    if let Some(sources) = &message.grounding_sources {
        println!("  Sources:");
        for (i, source) in sources.iter().enumerate() {
            println!("    [{}] {} <{}>", i + 1, source.title, source.uri);
        }
    }
}
