//! Message stream controller.
//!
//! Runs one request per invocation (streamed chat, one-shot image, or
//! speech) and reflects its progress into the owning session. Each send
//! captures its session id up front and routes every write through
//! [`SessionStore`] with that id. Streamed text is patched in and the
//! store is flushed once the response reaches a terminal state.
//!
//! ```text
//! send ──▶ user message ──▶ image mode? ──yes──▶ generate_image ──▶ image / apology
//!                               │
//!                               no
//!                               ▼
//!                          placeholder ──▶ chunks ──▶ Complete | Cancelled | Errored
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::{decode_pcm16, AudioPlayer};
use crate::config::SPEECH_SAMPLE_RATE;
use crate::data_uri::{mime_from_extension, DataUri, FALLBACK_IMAGE_MIME};
use crate::error::{ChatError, ChatResult};
use crate::llm::{
    history_contents, ChatRequest, Citation, Content, GenerationConfig, GenerativeBackend,
};
use crate::store::SessionStore;
use crate::types::{Message, MessageId, ResponseState, Role, SessionId};

/// Model text appended when image generation fails
pub const IMAGE_FAILURE_TEXT: &str = "Sorry, I could not generate an image from that prompt.";

const EVENT_CAPACITY: usize = 256;

/// What the user is sending
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outgoing {
    pub text: String,
    pub image: Option<DataUri>,
}

impl Outgoing {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: DataUri) -> Self {
        self.image = Some(image);
        self
    }

    /// Attach an image file; the MIME type comes from its extension.
    pub fn attach_file(self, path: &Path) -> ChatResult<Self> {
        let bytes = std::fs::read(path)?;
        let mime = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(mime_from_extension)
            .unwrap_or(FALLBACK_IMAGE_MIME);
        Ok(self.with_image(DataUri::from_bytes(mime, &bytes)))
    }

    /// Blank text and no image
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.image.is_none()
    }
}

/// Whether a send appends the user turn or re-sends an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendKind {
    Fresh,
    Regeneration,
}

/// How a send ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Stream exhausted normally
    Completed,
    /// Stopped by request; partial text kept
    Cancelled,
    /// Remote failure; see the response message
    Errored,
    ImageGenerated,
    ImageFailed,
    /// The session already has a send in flight
    Busy,
    /// Nothing to do (empty input, unknown session or message)
    Ignored,
}

/// How a speak request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// Playback started
    Playing,
    /// The message was already speaking and has been turned off
    Stopped,
    /// Synthesis or decoding failed
    Failed,
    /// No such message, or nothing to read
    Ignored,
}

/// Progress notifications for UI refresh
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Started {
        session_id: SessionId,
        message_id: MessageId,
    },
    Delta {
        session_id: SessionId,
        message_id: MessageId,
        text: String,
    },
    Finished {
        session_id: SessionId,
        message_id: MessageId,
        state: ResponseState,
    },
}

/// Result of consuming one chat stream
struct Consumed {
    state: ResponseState,
    citations: Option<Vec<Citation>>,
    error: Option<ChatError>,
}

/// Removes the in-flight entry when the send finishes or is dropped.
struct InFlight<'a> {
    registry: &'a Mutex<HashMap<SessionId, CancellationToken>>,
    session_id: SessionId,
    token: CancellationToken,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.session_id);
    }
}

/// Drives requests against a [`GenerativeBackend`]
pub struct StreamController<B: GenerativeBackend> {
    backend: Arc<B>,
    store: SessionStore,
    player: AudioPlayer,
    speech_sample_rate: u32,
    image_mode: AtomicBool,
    search_grounding: AtomicBool,
    in_flight: Mutex<HashMap<SessionId, CancellationToken>>,
    events: broadcast::Sender<StreamEvent>,
}

impl<B: GenerativeBackend> StreamController<B> {
    pub fn new(backend: Arc<B>, store: SessionStore, player: AudioPlayer) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            backend,
            store,
            player,
            speech_sample_rate: SPEECH_SAMPLE_RATE,
            image_mode: AtomicBool::new(false),
            search_grounding: AtomicBool::new(false),
            in_flight: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn with_speech_sample_rate(mut self, sample_rate: u32) -> Self {
        self.speech_sample_rate = sample_rate;
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn player(&self) -> &AudioPlayer {
        &self.player
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Arm image generation for the next send only
    pub fn set_image_mode(&self, enabled: bool) {
        self.image_mode.store(enabled, Ordering::SeqCst);
    }

    pub fn image_mode(&self) -> bool {
        self.image_mode.load(Ordering::SeqCst)
    }

    pub fn set_search_grounding(&self, enabled: bool) {
        self.search_grounding.store(enabled, Ordering::SeqCst);
    }

    pub fn search_grounding(&self) -> bool {
        self.search_grounding.load(Ordering::SeqCst)
    }

    pub fn is_loading(&self, session_id: &str) -> bool {
        self.in_flight.lock().contains_key(session_id)
    }

    /// Request a cooperative stop. Returns whether anything was in flight.
    pub fn stop_generation(&self, session_id: &str) -> bool {
        match self.in_flight.lock().get(session_id) {
            Some(token) => {
                info!("Stopping generation for session {}", session_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn stop_active(&self) -> bool {
        self.store
            .active_id()
            .is_some_and(|id| self.stop_generation(&id))
    }

    /// Empty a session's messages unless a send is in flight for it.
    pub fn clear_session(&self, session_id: &str) -> bool {
        if self.is_loading(session_id) {
            warn!("Refusing to clear session {} while it is loading", session_id);
            return false;
        }
        self.store.clear_messages(session_id)
    }

    fn emit(&self, event: StreamEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn begin(&self, session_id: &str) -> Option<InFlight<'_>> {
        let mut registry = self.in_flight.lock();
        if registry.contains_key(session_id) {
            return None;
        }
        let token = CancellationToken::new();
        registry.insert(session_id.to_string(), token.clone());
        Some(InFlight {
            registry: &self.in_flight,
            session_id: session_id.to_string(),
            token,
        })
    }

    /// Send to whichever session is active right now.
    pub async fn send(&self, outgoing: Outgoing) -> SendOutcome {
        match self.store.active_id() {
            Some(session_id) => self.send_to(&session_id, outgoing, SendKind::Fresh).await,
            None => SendOutcome::Ignored,
        }
    }

    /// Send to a specific session. All writes target `session_id`, even
    /// when another session becomes active meanwhile.
    pub async fn send_to(&self, session_id: &str, outgoing: Outgoing, kind: SendKind) -> SendOutcome {
        if outgoing.is_empty() {
            debug!("Ignoring empty send");
            return SendOutcome::Ignored;
        }
        let Some(session) = self.store.session(session_id) else {
            debug!("Ignoring send to missing session {}", session_id);
            return SendOutcome::Ignored;
        };
        let Some(in_flight) = self.begin(session_id) else {
            warn!("Session {} is already loading", session_id);
            return SendOutcome::Busy;
        };

        let history = match kind {
            SendKind::Fresh => &session.messages[..],
            SendKind::Regeneration => {
                let cut = session
                    .messages
                    .iter()
                    .rposition(|m| m.role == Role::User)
                    .unwrap_or(session.messages.len());
                &session.messages[..cut]
            }
        };
        let history = history_contents(history);

        if kind == SendKind::Fresh {
            let image_url = outgoing.image.as_ref().map(DataUri::to_string);
            let user = Message::user(outgoing.text.clone(), image_url);
            self.store.mutate_messages(session_id, |mut messages| {
                messages.push(user);
                messages
            });
        }

        if outgoing.image.is_none() && self.image_mode.swap(false, Ordering::SeqCst) {
            return self.generate_image(session_id, outgoing.text).await;
        }

        info!(
            "Sending to session {} with {} ({:?})",
            session_id, session.settings.model, kind
        );
        let request = ChatRequest {
            model: session.settings.model,
            history,
            turn: Content::user_turn(&outgoing.text, outgoing.image.map(Into::into)),
            config: GenerationConfig::from_settings(&session.settings, self.search_grounding()),
        };
        self.stream_chat(session_id, request, &in_flight.token).await
    }

    async fn stream_chat(
        &self,
        session_id: &str,
        request: ChatRequest,
        token: &CancellationToken,
    ) -> SendOutcome {
        let placeholder = Message::placeholder();
        let message_id = placeholder.id.clone();
        self.store.mutate_messages(session_id, |mut messages| {
            messages.push(placeholder);
            messages
        });
        self.emit(StreamEvent::Started {
            session_id: session_id.to_string(),
            message_id: message_id.clone(),
        });

        let consumed = self.consume(session_id, &message_id, request, token).await;
        let mut state = consumed.state;

        if let Some(citations) = consumed.citations.filter(|_| state != ResponseState::Errored) {
            let sources = citations.iter().map(Citation::to_source).collect();
            self.store.update_message(session_id, &message_id, |message| {
                message.grounding_sources = Some(sources);
            });
        }

        if let Some(err) = consumed.error {
            error!("Chat request for session {} failed: {}", session_id, err);
            let text = err.user_message();
            let mut overwritten = false;
            self.store.update_message(session_id, &message_id, |message| {
                if !message.has_text() {
                    message.text = Some(text);
                    overwritten = true;
                }
            });
            if !overwritten {
                debug!("Keeping partial response {}", message_id);
            }
            state = ResponseState::Errored;
        }
        self.store.flush();

        self.emit(StreamEvent::Finished {
            session_id: session_id.to_string(),
            message_id,
            state,
        });

        match state {
            ResponseState::Cancelled => SendOutcome::Cancelled,
            ResponseState::Errored => SendOutcome::Errored,
            _ => SendOutcome::Completed,
        }
    }

    async fn consume(
        &self,
        session_id: &str,
        message_id: &str,
        request: ChatRequest,
        token: &CancellationToken,
    ) -> Consumed {
        let mut stream = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Consumed { state: ResponseState::Cancelled, citations: None, error: None };
            }
            result = self.backend.stream_chat(request) => match result {
                Ok(stream) => stream,
                Err(e) => {
                    return Consumed { state: ResponseState::Errored, citations: None, error: Some(e) };
                }
            },
        };

        let mut state = ResponseState::Pending;
        let mut citations = None;
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Stream for {} cancelled", message_id);
                    return Consumed { state: ResponseState::Cancelled, citations, error: None };
                }
                next = stream.next() => next,
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    return Consumed { state: ResponseState::Errored, citations, error: Some(e) };
                }
                None => break,
            };

            citations = chunk.citations;
            if chunk.text.is_empty() {
                continue;
            }
            debug!("Chunk of {} bytes for {}", chunk.text.len(), message_id);
            state = ResponseState::Streaming;
            self.store.patch_message(session_id, message_id, |message| {
                message.text.get_or_insert_with(String::new).push_str(&chunk.text);
            });
            self.emit(StreamEvent::Delta {
                session_id: session_id.to_string(),
                message_id: message_id.to_string(),
                text: chunk.text,
            });
        }

        if state == ResponseState::Pending && citations.is_none() {
            return Consumed {
                state: ResponseState::Errored,
                citations: None,
                error: Some(ChatError::EmptyResponse(String::new())),
            };
        }
        Consumed { state: ResponseState::Complete, citations, error: None }
    }

    async fn generate_image(&self, session_id: &str, prompt: String) -> SendOutcome {
        info!("Generating image for session {}", session_id);
        let (message, outcome, state) = match self.backend.generate_image(prompt).await {
            Ok(image) => (
                Message::model_image(image.to_data_uri()),
                SendOutcome::ImageGenerated,
                ResponseState::Complete,
            ),
            Err(e) => {
                error!("Image generation for session {} failed: {}", session_id, e);
                (
                    Message::model_text(IMAGE_FAILURE_TEXT),
                    SendOutcome::ImageFailed,
                    ResponseState::Errored,
                )
            }
        };

        let message_id = message.id.clone();
        self.store.mutate_messages(session_id, |mut messages| {
            messages.push(message);
            messages
        });
        self.emit(StreamEvent::Finished {
            session_id: session_id.to_string(),
            message_id,
            state,
        });
        outcome
    }

    /// Read a message of the active session aloud, or stop it if it is
    /// already speaking.
    pub async fn speak(&self, message_id: &str) -> SpeakOutcome {
        let was_speaking = self.player.speaking();
        self.player.stop();
        if was_speaking.as_deref() == Some(message_id) {
            return SpeakOutcome::Stopped;
        }

        let text = self
            .store
            .active_session()
            .and_then(|session| session.message(message_id).map(|m| m.text().to_string()))
            .filter(|text| !text.trim().is_empty());
        let Some(text) = text else {
            debug!("Nothing to speak for message {}", message_id);
            return SpeakOutcome::Ignored;
        };

        let ticket = self.player.claim(message_id);
        let clip = match self
            .backend
            .synthesize_speech(text)
            .await
            .and_then(|bytes| decode_pcm16(&bytes, self.speech_sample_rate))
        {
            Ok(clip) => clip,
            Err(e) => {
                error!("Speech for message {} failed: {}", message_id, e);
                self.player.release(&ticket);
                return SpeakOutcome::Failed;
            }
        };

        if self.player.start(&ticket, clip) {
            SpeakOutcome::Playing
        } else {
            SpeakOutcome::Stopped
        }
    }
}
