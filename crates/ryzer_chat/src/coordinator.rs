//! Regeneration and feedback over the active session.

use std::sync::Arc;

use tracing::{debug, info};

use crate::controller::{Outgoing, SendKind, SendOutcome, StreamController};
use crate::data_uri::DataUri;
use crate::llm::GenerativeBackend;
use crate::types::{Feedback, Role};

/// Re-runs answers and records ratings
pub struct Coordinator<B: GenerativeBackend> {
    controller: Arc<StreamController<B>>,
}

impl<B: GenerativeBackend> Coordinator<B> {
    pub fn new(controller: Arc<StreamController<B>>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &Arc<StreamController<B>> {
        &self.controller
    }

    /// Replace a model message with a fresh answer to the user turn
    /// before it.
    ///
    /// The list is cut just before the target and the preceding user
    /// message is re-sent without being appended again. Unknown ids,
    /// non-model messages and messages with no earlier sendable user turn
    /// are ignored and leave the session untouched.
    pub async fn regenerate(&self, message_id: &str) -> SendOutcome {
        let store = self.controller.store();
        let Some(session) = store.active_session() else {
            return SendOutcome::Ignored;
        };

        let target = match session.position(message_id) {
            Some(index) if index > 0 && session.messages[index].role == Role::Model => index,
            _ => {
                debug!("Nothing to regenerate for {}", message_id);
                return SendOutcome::Ignored;
            }
        };
        let Some(user) = session.messages[..target]
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
        else {
            debug!("No user turn before {}", message_id);
            return SendOutcome::Ignored;
        };

        let outgoing = Outgoing {
            text: user.text().to_string(),
            image: user
                .image_url
                .as_deref()
                .and_then(|uri| DataUri::parse(uri).ok()),
        };
        if outgoing.is_empty() {
            debug!("User turn before {} has nothing to re-send", message_id);
            return SendOutcome::Ignored;
        }

        if self.controller.is_loading(&session.id) {
            return SendOutcome::Busy;
        }

        info!("Regenerating {} in session {}", message_id, session.id);
        store.mutate_messages(&session.id, |mut messages| {
            messages.truncate(target);
            messages
        });
        self.controller
            .send_to(&session.id, outgoing, SendKind::Regeneration)
            .await
    }

    /// Toggle a rating on a message of the active session.
    pub fn set_feedback(&self, message_id: &str, feedback: Feedback) -> bool {
        self.controller.store().toggle_feedback(message_id, feedback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioPlayer, MockAudioSink};
    use crate::llm::{ChatChunk, ChatStream, MockGenerativeBackend, Part};
    use crate::store::SessionStore;
    use crate::types::Message;

    fn coordinator(backend: MockGenerativeBackend) -> Coordinator<MockGenerativeBackend> {
        let controller = StreamController::new(
            Arc::new(backend),
            SessionStore::in_memory(),
            AudioPlayer::new(Arc::new(MockAudioSink::new())),
        );
        Coordinator::new(Arc::new(controller))
    }

    fn seed(coordinator: &Coordinator<MockGenerativeBackend>, messages: Vec<Message>) {
        coordinator.controller().store().mutate_active_messages(|_| messages);
    }

    fn messages(coordinator: &Coordinator<MockGenerativeBackend>) -> Vec<Message> {
        coordinator
            .controller()
            .store()
            .active_session()
            .unwrap()
            .messages
    }

    fn reply(text: &'static str) -> ChatStream {
        Box::pin(futures::stream::iter(vec![Ok(ChatChunk::text(text))]))
    }

    #[tokio::test]
    async fn test_regenerate_replaces_answer() {
        let mut backend = MockGenerativeBackend::new();
        backend
            .expect_stream_chat()
            .withf(|request| {
                request.history.len() == 2
                    && request.turn.parts == vec![Part::Text("q2".into())]
            })
            .times(1)
            .returning(|_| Ok(reply("better a2")));
        let coordinator = coordinator(backend);

        let target = Message::model_text("a2");
        let target_id = target.id.clone();
        seed(
            &coordinator,
            vec![
                Message::user("q1", None),
                Message::model_text("a1"),
                Message::user("q2", None),
                target,
            ],
        );

        let outcome = coordinator.regenerate(&target_id).await;
        assert_eq!(outcome, SendOutcome::Completed);

        let messages = messages(&coordinator);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].text(), "q2");
        assert_eq!(messages[3].text(), "better a2");
        assert_ne!(messages[3].id, target_id);
    }

    #[tokio::test]
    async fn test_regenerate_without_user_turn_is_noop() {
        let coordinator = coordinator(MockGenerativeBackend::new());
        let greeting = Message::model_text("Welcome");
        let follow_up = Message::model_text("Still here");
        let follow_up_id = follow_up.id.clone();
        seed(&coordinator, vec![greeting, follow_up]);

        assert_eq!(
            coordinator.regenerate(&follow_up_id).await,
            SendOutcome::Ignored
        );
        assert_eq!(messages(&coordinator).len(), 2);
    }

    #[tokio::test]
    async fn test_regenerate_unknown_or_user_message_is_noop() {
        let coordinator = coordinator(MockGenerativeBackend::new());
        let question = Message::user("q", None);
        let question_id = question.id.clone();
        seed(&coordinator, vec![question, Message::model_text("a")]);

        assert_eq!(coordinator.regenerate("missing").await, SendOutcome::Ignored);
        assert_eq!(
            coordinator.regenerate(&question_id).await,
            SendOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn test_regenerate_resends_image() {
        let mut backend = MockGenerativeBackend::new();
        backend
            .expect_stream_chat()
            .withf(|request| request.history.is_empty() && request.turn.parts.len() == 2)
            .returning(|_| Ok(reply("A square again.")));
        let coordinator = coordinator(backend);

        let answer = Message::model_text("A square.");
        let answer_id = answer.id.clone();
        seed(
            &coordinator,
            vec![
                Message::user("What is this?", Some("data:image/png;base64,AAAA".into())),
                answer,
            ],
        );

        assert_eq!(
            coordinator.regenerate(&answer_id).await,
            SendOutcome::Completed
        );
        assert_eq!(messages(&coordinator)[1].text(), "A square again.");
    }

    #[tokio::test]
    async fn test_regenerate_unsendable_user_turn_keeps_answer() {
        let coordinator = coordinator(MockGenerativeBackend::new());
        let answer = Message::model_text("original answer");
        let answer_id = answer.id.clone();
        // An empty attachment yields a data URI with no payload
        seed(
            &coordinator,
            vec![
                Message::user("", Some("data:image/png;base64,".into())),
                answer,
            ],
        );

        assert_eq!(
            coordinator.regenerate(&answer_id).await,
            SendOutcome::Ignored
        );
        let messages = messages(&coordinator);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].id, answer_id);
        assert_eq!(messages[1].text(), "original answer");
    }

    #[test]
    fn test_feedback_tri_state() {
        let coordinator = coordinator(MockGenerativeBackend::new());
        let answer = Message::model_text("a");
        let id = answer.id.clone();
        seed(&coordinator, vec![Message::user("q", None), answer]);

        assert!(coordinator.set_feedback(&id, Feedback::Up));
        assert!(coordinator.set_feedback(&id, Feedback::Up));
        assert_eq!(messages(&coordinator)[1].feedback, None);

        coordinator.set_feedback(&id, Feedback::Up);
        coordinator.set_feedback(&id, Feedback::Down);
        assert_eq!(messages(&coordinator)[1].feedback, Some(Feedback::Down));

        assert!(!coordinator.set_feedback("missing", Feedback::Up));
    }
}
