//! Ryzer CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Service not configured

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ryzer_chat::ChatError;

mod commands;

use commands::{Cli, Commands, Context, UsageError};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const NOT_CONFIGURED: u8 = 3;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so streamed answers on stdout stay clean
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ryzer={},warn", level)));
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .try_init();

    let ctx = Context::new(cli.data_dir, cli.quiet);

    let result = match cli.command {
        Commands::New => commands::session::new(&ctx).await,
        Commands::List => commands::session::list(&ctx).await,
        Commands::Use(args) => commands::session::use_session(args, &ctx).await,
        Commands::Rename(args) => commands::session::rename(args, &ctx).await,
        Commands::Delete(args) => commands::session::delete(args, &ctx).await,
        Commands::Clear => commands::session::clear(&ctx).await,
        Commands::Show(args) => commands::session::show(args, &ctx).await,
        Commands::Send(args) => commands::send::execute(args, &ctx).await,
        Commands::Regenerate(args) => commands::send::regenerate(args, &ctx).await,
        Commands::Feedback(args) => commands::message::feedback(args, &ctx).await,
        Commands::Speak(args) => commands::message::speak(args, &ctx).await,
        Commands::Export(args) => commands::export::execute(args, &ctx).await,
        Commands::Settings(args) => commands::settings::execute(args, &ctx).await,
        Commands::Theme(args) => commands::settings::theme(args, &ctx).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    if e.downcast_ref::<UsageError>().is_some() {
        return ExitCodes::INVALID_ARGS;
    }
    match e.downcast_ref::<ChatError>() {
        Some(ChatError::NotConfigured) => ExitCodes::NOT_CONFIGURED,
        Some(ChatError::SessionNotFound(_)) => ExitCodes::INVALID_ARGS,
        _ => ExitCodes::GENERAL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let not_configured = anyhow::Error::from(ChatError::NotConfigured);
        assert_eq!(categorize_error(&not_configured), ExitCodes::NOT_CONFIGURED);

        let missing = anyhow::Error::from(ChatError::SessionNotFound("x".into()));
        assert_eq!(categorize_error(&missing), ExitCodes::INVALID_ARGS);

        let usage = anyhow::Error::from(UsageError::Invalid("bad".into()));
        assert_eq!(categorize_error(&usage), ExitCodes::INVALID_ARGS);

        let other = anyhow::anyhow!("boom");
        assert_eq!(categorize_error(&other), ExitCodes::GENERAL_ERROR);
    }

    #[test]
    fn test_cli_parses_send() {
        let cli = Cli::try_parse_from(["ryzer", "send", "hello", "there", "--search"]).unwrap();
        assert!(matches!(cli.command, Commands::Send(_)));

        let cli = Cli::try_parse_from(["ryzer", "--data-dir", "/tmp/x", "settings", "--thinking", "true"])
            .unwrap();
        assert_eq!(cli.data_dir, Some(std::path::PathBuf::from("/tmp/x")));
    }
}
