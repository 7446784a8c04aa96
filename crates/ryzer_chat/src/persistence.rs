//! Session persistence layer.
//!
//! State lives in three independent string slots of a key-value store,
//! mirroring browser local storage:
//!
//! ```text
//! ryzer-sessions            # JSON array of sessions, full snapshot
//! ryzer-active-session-id   # id of the active session (absent = none)
//! ryzer-theme               # "light" | "dark"
//! ```
//!
//! [`FileStore`] keeps each slot as one file in a data directory:
//!
//! ```text
//! <data_dir>/
//! ├── ryzer-sessions.json
//! ├── ryzer-active-session-id
//! └── ryzer-theme
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::ChatResult;
use crate::types::{ChatSession, SessionId, Theme};

/// Slot holding the session collection
pub const SESSIONS_KEY: &str = "ryzer-sessions";
/// Slot holding the active session pointer
pub const ACTIVE_SESSION_KEY: &str = "ryzer-active-session-id";
/// Slot holding the theme preference
pub const THEME_KEY: &str = "ryzer-theme";

/// Minimal string key-value storage
pub trait KeyValueStore: Send + Sync {
    /// Read a slot. Unreadable slots are reported as errors, absent ones as `None`.
    fn get(&self, key: &str) -> ChatResult<Option<String>>;

    /// Overwrite a slot.
    fn set(&self, key: &str, value: &str) -> ChatResult<()>;

    /// Delete a slot; deleting an absent slot is not an error.
    fn remove(&self, key: &str) -> ChatResult<()>;
}

/// Slots kept as files inside a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `root`; the directory is created lazily.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Get the data directory path
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot_path(&self, key: &str) -> PathBuf {
        if key == SESSIONS_KEY {
            self.root.join(format!("{key}.json"))
        } else {
            self.root.join(key)
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> ChatResult<Option<String>> {
        let path = self.slot_path(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    fn set(&self, key: &str, value: &str) -> ChatResult<()> {
        fs::create_dir_all(&self.root)?;

        // Readers only ever see a complete file.
        let mut file = NamedTempFile::new_in(&self.root)?;
        file.write_all(value.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(self.slot_path(key)).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> ChatResult<()> {
        let path = self.slot_path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Process-local slots, for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slots: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> ChatResult<Option<String>> {
        Ok(self.slots.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> ChatResult<()> {
        self.slots.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> ChatResult<()> {
        self.slots.lock().remove(key);
        Ok(())
    }
}

/// What was found in storage at startup
#[derive(Debug, Clone, Default)]
pub struct PersistedState {
    pub sessions: Vec<ChatSession>,
    pub active_id: Option<SessionId>,
}

/// Persistence manager for chat sessions
#[derive(Clone)]
pub struct SessionPersistence {
    store: Arc<dyn KeyValueStore>,
}

impl SessionPersistence {
    /// Create a persistence manager over any slot store
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// Persistence backed by files in `data_dir`
    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::new(FileStore::new(data_dir))
    }

    /// Persistence that lives only as long as the process
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    /// Load sessions and the active pointer.
    ///
    /// Never fails: absent or corrupt slots read as "no prior state".
    /// Unfinished placeholders are dropped so an in-flight response
    /// never survives a reload, and settings are re-normalized.
    pub fn load(&self) -> PersistedState {
        let sessions = match self.store.get(SESSIONS_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<ChatSession>>(&raw) {
                Ok(sessions) => sessions,
                Err(e) => {
                    warn!("Discarding corrupt session snapshot: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to read session snapshot: {}", e);
                Vec::new()
            }
        };

        let sessions: Vec<ChatSession> = sessions
            .into_iter()
            .map(|mut session| {
                let before = session.messages.len();
                session.messages.retain(|m| !m.is_placeholder());
                if session.messages.len() != before {
                    debug!(
                        "Dropped {} unfinished response(s) from session {}",
                        before - session.messages.len(),
                        session.id
                    );
                }
                session.settings = session.settings.normalized();
                session
            })
            .collect();

        let active_id = match self.store.get(ACTIVE_SESSION_KEY) {
            Ok(value) => value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()),
            Err(e) => {
                warn!("Failed to read active session pointer: {}", e);
                None
            }
        };

        PersistedState { sessions, active_id }
    }

    /// Rewrite the whole session collection
    pub fn save_sessions(&self, sessions: &[ChatSession]) -> ChatResult<()> {
        let content = serde_json::to_string(sessions)?;
        self.store.set(SESSIONS_KEY, &content)
    }

    /// Rewrite the active session pointer
    pub fn save_active_id(&self, active_id: Option<&str>) -> ChatResult<()> {
        match active_id {
            Some(id) => self.store.set(ACTIVE_SESSION_KEY, id),
            None => self.store.remove(ACTIVE_SESSION_KEY),
        }
    }

    /// Stored theme, if any valid one was saved
    pub fn load_theme(&self) -> Option<Theme> {
        match self.store.get(THEME_KEY) {
            Ok(value) => value.as_deref().and_then(Theme::parse),
            Err(e) => {
                warn!("Failed to read theme preference: {}", e);
                None
            }
        }
    }

    pub fn save_theme(&self, theme: Theme) -> ChatResult<()> {
        self.store.set(THEME_KEY, theme.as_str())
    }
}
