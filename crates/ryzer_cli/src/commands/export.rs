//! Export command - save the active session as JSON.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use ryzer_chat::write_export;

use super::{active_session, Context};

#[derive(Args)]
pub struct ExportArgs {
    /// Output directory (defaults to the current directory)
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,
}

pub async fn execute(args: ExportArgs, ctx: &Context) -> Result<()> {
    let session = active_session(&ctx.store())?;
    let dir = match args.out {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    let path = write_export(&dir, &session)?;
    ctx.note(format!("📦 Exported \"{}\" to {}", session.title, path.display()));
    Ok(())
}
