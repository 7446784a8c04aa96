//! Integration tests for the chat core.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tempfile::tempdir;

use ryzer_chat::{
    export_session, write_export, AudioPlayer, ChatChunk, ChatError, ChatRequest, ChatResult,
    ChatSession, ChatStream, Citation, Coordinator, Feedback, GenerativeBackend, InlineData,
    ModelTier, Outgoing, Part, Role, SendOutcome, SessionPersistence, SessionStore, Settings,
    SpeakOutcome, StreamController, WavFileSink, SESSIONS_KEY,
};

/// Answers each prompt with a fixed list of chunks
#[derive(Default)]
struct ScriptedBackend {
    replies: HashMap<String, Vec<ChatChunk>>,
}

impl ScriptedBackend {
    fn reply(mut self, prompt: &str, chunks: &[&str]) -> Self {
        self.replies.insert(
            prompt.to_string(),
            chunks.iter().map(|c| ChatChunk::text(*c)).collect(),
        );
        self
    }

    fn reply_with(mut self, prompt: &str, chunks: Vec<ChatChunk>) -> Self {
        self.replies.insert(prompt.to_string(), chunks);
        self
    }
}

fn turn_text(request: &ChatRequest) -> String {
    request
        .turn
        .parts
        .iter()
        .find_map(|part| match part {
            Part::Text(text) => Some(text.clone()),
            Part::InlineData(_) => None,
        })
        .unwrap_or_default()
}

#[async_trait]
impl GenerativeBackend for ScriptedBackend {
    async fn stream_chat(&self, request: ChatRequest) -> ChatResult<ChatStream> {
        let prompt = turn_text(&request);
        let chunks = self
            .replies
            .get(&prompt)
            .cloned()
            .ok_or_else(|| ChatError::EmptyResponse(format!("no script for {}", prompt)))?;
        // Yield between chunks so concurrent sends interleave
        let stream: ChatStream = Box::pin(futures::stream::unfold(
            chunks.into_iter(),
            |mut chunks| async move {
                tokio::task::yield_now().await;
                chunks.next().map(|chunk| (Ok(chunk), chunks))
            },
        ));
        Ok(stream)
    }

    async fn generate_image(&self, prompt: String) -> ChatResult<InlineData> {
        Ok(InlineData {
            mime_type: "image/png".into(),
            data: STANDARD.encode(prompt.as_bytes()),
        })
    }

    async fn synthesize_speech(&self, _text: String) -> ChatResult<Vec<u8>> {
        // Two samples of silence and one quarter-scale sample
        Ok(vec![0, 0, 0, 0, 0, 0x20])
    }
}

fn controller_in(
    persistence: SessionPersistence,
    backend: ScriptedBackend,
    speech_dir: &std::path::Path,
) -> Arc<StreamController<ScriptedBackend>> {
    Arc::new(StreamController::new(
        Arc::new(backend),
        SessionStore::open(persistence),
        AudioPlayer::new(Arc::new(WavFileSink::new(speech_dir))),
    ))
}

/// Test the hello scenario end to end, including persistence.
#[tokio::test]
async fn test_hello_scenario_persists() {
    let temp = tempdir().unwrap();
    let data_dir = temp.path().join("data");
    let backend = ScriptedBackend::default().reply("Hello", &["Hi", " there", "!"]);
    let controller = controller_in(
        SessionPersistence::in_dir(&data_dir),
        backend,
        &temp.path().join("speech"),
    );

    let outcome = controller.send(Outgoing::text("Hello")).await;
    assert_eq!(outcome, SendOutcome::Completed);

    let session = controller.store().active_session().unwrap();
    assert_eq!(session.messages.len(), 2);
    assert_eq!(session.messages[0].role, Role::User);
    assert_eq!(session.messages[0].text(), "Hello");
    assert_eq!(session.messages[1].role, Role::Model);
    assert_eq!(session.messages[1].text(), "Hi there!");
    assert!(session.messages[1].feedback.is_none());

    // Reopen from disk
    let reopened = SessionStore::open(SessionPersistence::in_dir(&data_dir));
    assert_eq!(reopened.active_id(), Some(session.id.clone()));
    assert_eq!(reopened.active_session().unwrap(), session);
}

/// Test that concurrent sends to different sessions never mix.
#[tokio::test]
async fn test_concurrent_sessions_stay_isolated() {
    let temp = tempdir().unwrap();
    let backend = ScriptedBackend::default()
        .reply("from A", &["a1", "a2", "a3"])
        .reply("from B", &["b1", "b2", "b3"]);
    let controller = controller_in(SessionPersistence::in_memory(), backend, temp.path());
    let store = controller.store().clone();

    let a = store.active_id().unwrap();
    let b = store.create_session().id;

    let send_a = controller.send_to(&a, Outgoing::text("from A"), ryzer_chat::SendKind::Fresh);
    let send_b = async {
        // Switch back and forth while A streams
        store.set_active(&a);
        let outcome = controller
            .send_to(&b, Outgoing::text("from B"), ryzer_chat::SendKind::Fresh)
            .await;
        store.set_active(&b);
        outcome
    };
    let (outcome_a, outcome_b) = tokio::join!(send_a, send_b);
    assert_eq!(outcome_a, SendOutcome::Completed);
    assert_eq!(outcome_b, SendOutcome::Completed);

    let session_a = store.session(&a).unwrap();
    let session_b = store.session(&b).unwrap();
    assert_eq!(session_a.messages[1].text(), "a1a2a3");
    assert_eq!(session_b.messages[1].text(), "b1b2b3");
    assert!(session_a.messages.iter().all(|m| !m.text().contains('b')));
}

/// Test regenerate, feedback and grounding through the public API.
#[tokio::test]
async fn test_regenerate_and_feedback_workflow() {
    let temp = tempdir().unwrap();
    let backend = ScriptedBackend::default().reply_with(
        "What is Rust?",
        vec![
            ChatChunk::text("A language."),
            ChatChunk {
                text: String::new(),
                citations: Some(vec![Citation {
                    title: None,
                    uri: Some("https://rust-lang.org".into()),
                }]),
            },
        ],
    );
    let controller = controller_in(SessionPersistence::in_memory(), backend, temp.path());
    let coordinator = Coordinator::new(Arc::clone(&controller));
    controller.set_search_grounding(true);

    controller.send(Outgoing::text("What is Rust?")).await;
    let first = controller
        .store()
        .active_session()
        .unwrap()
        .last_model_message()
        .cloned()
        .unwrap();
    let sources = first.grounding_sources.clone().unwrap();
    assert_eq!(sources[0].title, "https://rust-lang.org");

    assert!(coordinator.set_feedback(&first.id, Feedback::Down));

    let outcome = coordinator.regenerate(&first.id).await;
    assert_eq!(outcome, SendOutcome::Completed);

    let session = controller.store().active_session().unwrap();
    assert_eq!(session.messages.len(), 2);
    let second = session.last_model_message().unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(second.text(), "A language.");
    assert!(second.feedback.is_none());
}

/// Test the image-generation path and that it only fires once.
#[tokio::test]
async fn test_image_mode_then_chat() {
    let temp = tempdir().unwrap();
    let backend = ScriptedBackend::default().reply("and now text", &["text reply"]);
    let controller = controller_in(SessionPersistence::in_memory(), backend, temp.path());

    controller.set_image_mode(true);
    assert_eq!(
        controller.send(Outgoing::text("a lighthouse")).await,
        SendOutcome::ImageGenerated
    );
    assert_eq!(
        controller.send(Outgoing::text("and now text")).await,
        SendOutcome::Completed
    );

    let messages = controller.store().active_session().unwrap().messages;
    assert_eq!(messages.len(), 4);
    assert!(messages[1]
        .image_url
        .as_deref()
        .unwrap()
        .starts_with("data:image/png;base64,"));
    assert_eq!(messages[3].text(), "text reply");
}

/// Test speech rendering to a WAV file and the speaking marker lifecycle.
#[tokio::test]
async fn test_speak_renders_wav() {
    let temp = tempdir().unwrap();
    let speech_dir = temp.path().join("speech");
    let backend = ScriptedBackend::default().reply("Say hi", &["Hi!"]);
    let controller = controller_in(SessionPersistence::in_memory(), backend, &speech_dir);

    controller.send(Outgoing::text("Say hi")).await;
    let reply_id = controller
        .store()
        .active_session()
        .unwrap()
        .last_model_message()
        .unwrap()
        .id
        .clone();

    assert_eq!(controller.speak(&reply_id).await, SpeakOutcome::Playing);
    controller.player().wait_idle().await;
    assert!(controller.player().speaking().is_none());

    let reader = hound::WavReader::open(speech_dir.join(format!("{}.wav", reply_id))).unwrap();
    assert_eq!(reader.spec().sample_rate, 24_000);
    assert_eq!(reader.len(), 3);
}

/// Test that exporting and parsing yields the same session.
#[test]
fn test_export_round_trip() {
    let temp = tempdir().unwrap();
    let store = SessionStore::in_memory();
    let id = store.active_id().unwrap();
    store.rename_session(&id, "Round trip");
    store.update_settings(
        &id,
        Settings::default()
            .with_model(ModelTier::FlashLite)
            .with_temperature(0.2),
    );
    store.mutate_messages(&id, |mut messages| {
        messages.push(ryzer_chat::Message::user(
            "look",
            Some("data:image/webp;base64,UklG".into()),
        ));
        messages.push(ryzer_chat::Message::model_text("A picture."));
        messages
    });
    let session = store.session(&id).unwrap();

    let parsed: ChatSession = serde_json::from_str(&export_session(&session).unwrap()).unwrap();
    assert_eq!(parsed, session);

    let path = write_export(temp.path(), &session).unwrap();
    let from_file: ChatSession = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(from_file, session);
}

/// Test recovery from corrupt storage and a dangling active pointer.
#[test]
fn test_reload_reconciliation() {
    let temp = tempdir().unwrap();
    let data_dir = temp.path();

    fs::write(data_dir.join(format!("{}.json", SESSIONS_KEY)), "{not json").unwrap();
    let store = SessionStore::open(SessionPersistence::in_dir(data_dir));
    assert_eq!(store.len(), 1);
    let survivor = store.active_id().unwrap();

    let persistence = SessionPersistence::in_dir(data_dir);
    persistence.save_active_id(Some("gone")).unwrap();
    let store = SessionStore::open(persistence);
    assert_eq!(store.len(), 1);
    assert_eq!(store.active_id(), Some(survivor));
}
