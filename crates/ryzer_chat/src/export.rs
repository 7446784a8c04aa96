//! One-way JSON export of a session.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::ChatResult;
use crate::types::ChatSession;

/// `ryzer-chat-<id>.json`
pub fn export_file_name(session_id: &str) -> String {
    format!("ryzer-chat-{}.json", session_id)
}

/// Pretty-printed JSON document for a session, messages and settings
/// included.
pub fn export_session(session: &ChatSession) -> ChatResult<String> {
    Ok(serde_json::to_string_pretty(session)?)
}

/// Write the export document into `dir`, returning its path.
pub fn write_export(dir: &Path, session: &ChatSession) -> ChatResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(export_file_name(&session.id));
    std::fs::write(&path, export_session(session)?)?;
    info!("Exported session {} to {}", session.id, path.display());
    Ok(path)
}
