//! In-memory session collection with write-through persistence.
//!
//! [`SessionStore`] is a cheap-clone handle: the stream controller, the
//! coordinator and the UI all hold one. Message lists are only ever
//! written through [`SessionStore::mutate_messages`] (or its active-session
//! shorthand), which targets exactly one session by id. Async tasks capture
//! their session id up front, so a response that finishes after the user
//! switched sessions still lands where it started.
//!
//! Every mutation rewrites the full snapshot. Structural changes are
//! written right away; streamed text goes through
//! [`SessionStore::patch_message`], whose writes are coalesced into one
//! delayed flush. Snapshots are serialized and written after the state
//! lock is released, and the lock is never held across an `.await`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::persistence::SessionPersistence;
use crate::settings::Settings;
use crate::types::{ChatSession, Feedback, Message, SessionId};

/// How long patched messages may sit unwritten
pub const FLUSH_DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Default)]
struct StoreState {
    /// Newest first
    sessions: Vec<ChatSession>,
    active_id: Option<SessionId>,
    /// Bumped on every change
    revision: u64,
}

impl StoreState {
    fn find_mut(&mut self, id: &str) -> Option<&mut ChatSession> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    fn contains(&self, id: &str) -> bool {
        self.sessions.iter().any(|s| s.id == id)
    }

    fn insert_new(&mut self) -> ChatSession {
        let session = ChatSession::new();
        self.sessions.insert(0, session.clone());
        self.active_id = Some(session.id.clone());
        session
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            revision: self.revision,
            sessions: self.sessions.clone(),
            active_id: self.active_id.clone(),
        }
    }
}

struct Snapshot {
    revision: u64,
    sessions: Vec<ChatSession>,
    active_id: Option<SessionId>,
}

/// Serializes snapshot writes and skips stale ones
struct SnapshotWriter {
    persistence: SessionPersistence,
    written: Mutex<u64>,
    flush_scheduled: AtomicBool,
}

impl SnapshotWriter {
    fn write(&self, snapshot: Snapshot) {
        let mut written = self.written.lock();
        if *written >= snapshot.revision {
            return;
        }
        if let Err(e) = self.persistence.save_sessions(&snapshot.sessions) {
            warn!("Failed to persist sessions: {}", e);
            return;
        }
        if let Err(e) = self.persistence.save_active_id(snapshot.active_id.as_deref()) {
            warn!("Failed to persist active session pointer: {}", e);
        }
        *written = snapshot.revision;
    }
}

/// Shared handle to the session collection
#[derive(Clone)]
pub struct SessionStore {
    state: Arc<Mutex<StoreState>>,
    writer: Arc<SnapshotWriter>,
}

impl SessionStore {
    /// Load persisted state and reconcile it.
    ///
    /// The active pointer falls back to the first session when it names
    /// nothing; an empty collection gets one fresh session.
    pub fn open(persistence: SessionPersistence) -> Self {
        let loaded = persistence.load();
        let mut state = StoreState {
            sessions: loaded.sessions,
            active_id: None,
            revision: 1,
        };

        state.active_id = match loaded.active_id {
            Some(id) if state.contains(&id) => Some(id),
            _ => state.sessions.first().map(|s| s.id.clone()),
        };
        if state.sessions.is_empty() {
            state.insert_new();
        }

        info!(
            "Opened session store with {} session(s)",
            state.sessions.len()
        );

        let snapshot = state.snapshot();
        let store = Self {
            state: Arc::new(Mutex::new(state)),
            writer: Arc::new(SnapshotWriter {
                persistence,
                written: Mutex::new(0),
                flush_scheduled: AtomicBool::new(false),
            }),
        };
        store.writer.write(snapshot);
        store
    }

    /// Store with no durable backing
    pub fn in_memory() -> Self {
        Self::open(SessionPersistence::in_memory())
    }

    /// Persistence this store writes through to
    pub fn persistence(&self) -> &SessionPersistence {
        &self.writer.persistence
    }

    /// Record a change and write it out once the lock is released.
    fn persist(&self, mut state: MutexGuard<'_, StoreState>) {
        state.revision += 1;
        let snapshot = state.snapshot();
        drop(state);
        self.writer.write(snapshot);
    }

    /// Record a change and leave the write to a delayed flush.
    fn persist_later(&self, mut state: MutexGuard<'_, StoreState>) {
        state.revision += 1;
        drop(state);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.flush();
            return;
        };
        if self.writer.flush_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let store = self.clone();
        runtime.spawn(async move {
            tokio::time::sleep(FLUSH_DEBOUNCE).await;
            store.writer.flush_scheduled.store(false, Ordering::Release);
            if let Err(e) = tokio::task::spawn_blocking(move || store.flush()).await {
                warn!("Session flush task failed: {}", e);
            }
        });
    }

    /// Write any change not yet on disk
    pub fn flush(&self) {
        let snapshot = self.state.lock().snapshot();
        self.writer.write(snapshot);
    }

    /// Create an empty session at the front and make it active
    pub fn create_session(&self) -> ChatSession {
        let mut state = self.state.lock();
        let session = state.insert_new();
        info!("Created session {}", session.id);
        self.persist(state);
        session
    }

    /// Remove a session.
    ///
    /// Deleting the active session activates the first remaining one, or a
    /// freshly created session when none remain. Returns whether anything
    /// was removed.
    pub fn delete_session(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.sessions.len();
        state.sessions.retain(|s| s.id != id);
        if state.sessions.len() == before {
            return false;
        }

        if state.active_id.as_deref() == Some(id) {
            state.active_id = state.sessions.first().map(|s| s.id.clone());
            if state.active_id.is_none() {
                state.insert_new();
            }
        }

        info!("Deleted session {}", id);
        self.persist(state);
        true
    }

    /// Set a session title and leave editing mode
    pub fn rename_session(&self, id: &str, title: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        let Some(session) = state.find_mut(id) else {
            return false;
        };
        session.title = title.into();
        session.is_editing = false;
        self.persist(state);
        true
    }

    /// Mark a session title as being edited (UI-only flag)
    pub fn begin_rename(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        match state.find_mut(id) {
            Some(session) => {
                session.is_editing = true;
                true
            }
            None => false,
        }
    }

    /// Switch the active session; unknown ids are ignored
    pub fn set_active(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        if !state.contains(id) {
            return false;
        }
        state.active_id = Some(id.to_string());
        self.persist(state);
        true
    }

    pub fn active_id(&self) -> Option<SessionId> {
        self.state.lock().active_id.clone()
    }

    /// Snapshot of the active session
    pub fn active_session(&self) -> Option<ChatSession> {
        let state = self.state.lock();
        let id = state.active_id.as_deref()?;
        state.sessions.iter().find(|s| s.id == id).cloned()
    }

    /// Snapshot of one session
    pub fn session(&self, id: &str) -> Option<ChatSession> {
        self.state.lock().sessions.iter().find(|s| s.id == id).cloned()
    }

    /// Snapshot of all sessions, newest first
    pub fn sessions(&self) -> Vec<ChatSession> {
        self.state.lock().sessions.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().sessions.is_empty()
    }

    /// Replace a session's settings, normalized
    pub fn update_settings(&self, id: &str, settings: Settings) -> bool {
        let mut state = self.state.lock();
        let Some(session) = state.find_mut(id) else {
            return false;
        };
        session.settings = settings.normalized();
        self.persist(state);
        true
    }

    /// Drop every message of a session
    pub fn clear_messages(&self, id: &str) -> bool {
        self.mutate_messages(id, |_| Vec::new())
    }

    /// Apply a transform to one session's message list.
    ///
    /// This is the only write path for messages. Returns `false` (and does
    /// nothing) when the session no longer exists.
    pub fn mutate_messages<F>(&self, session_id: &str, f: F) -> bool
    where
        F: FnOnce(Vec<Message>) -> Vec<Message>,
    {
        let mut state = self.state.lock();
        let Some(session) = state.find_mut(session_id) else {
            debug!("Dropping message update for missing session {}", session_id);
            return false;
        };
        let messages = std::mem::take(&mut session.messages);
        session.messages = f(messages);
        self.persist(state);
        true
    }

    /// [`Self::mutate_messages`] on whatever session is active right now.
    pub fn mutate_active_messages<F>(&self, f: F) -> bool
    where
        F: FnOnce(Vec<Message>) -> Vec<Message>,
    {
        let Some(id) = self.active_id() else {
            return false;
        };
        self.mutate_messages(&id, f)
    }

    /// Apply an in-place edit to one message of one session.
    pub fn update_message<F>(&self, session_id: &str, message_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        let mut found = false;
        self.mutate_messages(session_id, |mut messages| {
            if let Some(message) = messages.iter_mut().find(|m| m.id == message_id) {
                f(message);
                found = true;
            }
            messages
        });
        found
    }

    /// Toggle a rating on a message of the active session.
    ///
    /// Giving the current rating again clears it. Returns whether the
    /// message was found.
    pub fn toggle_feedback(&self, message_id: &str, feedback: Feedback) -> bool {
        let Some(session_id) = self.active_id() else {
            return false;
        };
        self.update_message(&session_id, message_id, |message| {
            message.toggle_feedback(feedback);
        })
    }

    /// Like [`Self::update_message`], but the snapshot write is coalesced
    /// with other patches and lands within [`FLUSH_DEBOUNCE`], at the next
    /// immediate write, or on [`Self::flush`].
    pub fn patch_message<F>(&self, session_id: &str, message_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        let mut state = self.state.lock();
        let Some(message) = state
            .find_mut(session_id)
            .and_then(|s| s.messages.iter_mut().find(|m| m.id == message_id))
        else {
            debug!("Dropping patch for missing message {}", message_id);
            return false;
        };
        f(message);
        self.persist_later(state);
        true
    }
}
