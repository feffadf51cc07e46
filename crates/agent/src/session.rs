//! Turn controller: drives one request/response exchange into the transcript.

use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use parking_lot::RwLock;
use proto::{
    Attachment, ChatModel, Message, MessageId, Turn, TurnError, TurnEvent, TurnOutcome, TurnPhase,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::{
    llm::{ChatRequest, ImageRequest, ResponseChannel, project_history},
    transcript::TranscriptStore,
};

/// Greeting that opens every fresh transcript.
pub const DEFAULT_GREETING: &str = "Hello! I'm your Gemini AI assistant. How can I help you today?

I can analyze images you attach, help with writing and code, or generate an image if you switch to the image model.";

/// Reply shown when a streaming chat turn fails.
pub const CHAT_FAILURE_MESSAGE: &str =
    "I encountered an error. Please check your connection or API key.";

/// Reply shown when an image generation turn fails.
pub const IMAGE_FAILURE_MESSAGE: &str = "Sorry, I couldn't generate that image.";

/// Provisional placeholder content while an image is generated.
pub const IMAGE_PENDING_MESSAGE: &str = "Generating image...";

/// One conversation: the transcript plus the controller that feeds it.
///
/// At most one turn runs at a time; a second `submit_turn` while one is in
/// flight is rejected with [`TurnError::Busy`] instead of interleaving two
/// placeholders.
pub struct ChatSession {
    channel: Arc<dyn ResponseChannel>,
    transcript: Arc<TranscriptStore>,
    seed: Message,
    model: RwLock<ChatModel>,
    busy: watch::Sender<bool>,
    phase: watch::Sender<TurnPhase>,
}

/// Owns the busy flag for one turn.
///
/// Dropped without [`settle`](Self::settle) means the submit future was
/// cancelled mid-turn: the placeholder is resolved as an error and the phase
/// set to `Errored` before busy clears, so no message is left streaming.
struct TurnGuard<'a> {
    session: &'a ChatSession,
    placeholder: Option<(MessageId, &'static str)>,
    settled: bool,
}

impl<'a> TurnGuard<'a> {
    /// Sets the busy flag, or returns `None` if it was already set.
    fn acquire(session: &'a ChatSession) -> Option<Self> {
        let acquired = session.busy.send_if_modified(|flag| {
            if *flag {
                false
            } else {
                *flag = true;
                true
            }
        });
        acquired.then_some(Self {
            session,
            placeholder: None,
            settled: false,
        })
    }

    /// Records the placeholder to fail with `failure` if the turn is cancelled.
    fn track(&mut self, id: MessageId, failure: &'static str) {
        self.placeholder = Some((id, failure));
    }

    /// Marks the turn as having reached a terminal phase.
    fn settle(&mut self) {
        self.settled = true;
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            if let Some((id, failure)) = self.placeholder.take() {
                self.session.transcript.replace(&id, |m| m.as_error(failure));
                warn!(assistant_message_id = %id, "Turn cancelled before completion");
            }
            self.session.phase.send_replace(TurnPhase::Errored);
        }
        self.session.busy.send_replace(false);
    }
}

impl ChatSession {
    /// Creates a session whose transcript starts (and resets) to `seed`.
    pub fn new(channel: Arc<dyn ResponseChannel>, seed: Message) -> Self {
        let (busy, _) = watch::channel(false);
        let (phase, _) = watch::channel(TurnPhase::Idle);
        Self {
            channel,
            transcript: Arc::new(TranscriptStore::new(seed.clone())),
            seed,
            model: RwLock::new(ChatModel::default()),
            busy,
            phase,
        }
    }

    /// Creates a session seeded with [`DEFAULT_GREETING`].
    pub fn with_default_seed(channel: Arc<dyn ResponseChannel>) -> Self {
        Self::new(channel, Message::seed(DEFAULT_GREETING))
    }

    /// Shared handle to the transcript for rendering.
    pub fn transcript(&self) -> &Arc<TranscriptStore> {
        &self.transcript
    }

    /// The seed greeting the transcript resets to.
    pub fn seed(&self) -> &Message {
        &self.seed
    }

    /// Currently selected model.
    pub fn model(&self) -> ChatModel {
        *self.model.read()
    }

    /// Selects the model used by subsequent submissions.
    ///
    /// A turn already in flight keeps the model it was submitted with.
    pub fn select_model(&self, model: ChatModel) {
        *self.model.write() = model;
        info!(model = %model, "Model selected");
    }

    /// Returns true while a turn has not reached a terminal phase.
    pub fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    /// Subscribes to the busy flag.
    pub fn subscribe_busy(&self) -> watch::Receiver<bool> {
        self.busy.subscribe()
    }

    /// Phase of the current or most recent turn.
    pub fn phase(&self) -> TurnPhase {
        *self.phase.borrow()
    }

    /// Resets the transcript to the seed greeting.
    ///
    /// Allowed while a turn is in flight: its later updates target a removed
    /// id and become no-ops.
    pub fn clear_transcript(&self) {
        self.transcript.reset(self.seed.clone());
        info!(busy = self.is_busy(), "Transcript cleared");
    }

    /// Runs one turn to a terminal phase.
    pub async fn submit_turn(
        &self,
        prompt: impl Into<String>,
        attachment: Option<Attachment>,
        model: ChatModel,
    ) -> Result<TurnOutcome, TurnError> {
        self.run_turn(prompt.into(), attachment, model, None).await
    }

    /// Runs one turn, emitting [`TurnEvent`]s on `progress_tx` as it goes.
    ///
    /// Identical to [`submit_turn()`](Self::submit_turn) otherwise. A closed
    /// receiver does not affect the turn.
    pub async fn submit_turn_with_progress(
        &self,
        prompt: impl Into<String>,
        attachment: Option<Attachment>,
        model: ChatModel,
        progress_tx: mpsc::Sender<TurnEvent>,
    ) -> Result<TurnOutcome, TurnError> {
        self.run_turn(prompt.into(), attachment, model, Some(progress_tx))
            .await
    }

    async fn run_turn(
        &self,
        prompt: String,
        attachment: Option<Attachment>,
        model: ChatModel,
        progress: Option<mpsc::Sender<TurnEvent>>,
    ) -> Result<TurnOutcome, TurnError> {
        if prompt.trim().is_empty() && attachment.is_none() {
            return Err(TurnError::EmptySubmission);
        }
        let Some(mut guard) = TurnGuard::acquire(self) else {
            debug!("Turn rejected: another turn is in flight");
            return Err(TurnError::Busy);
        };
        let progress = Progress(progress);

        // History is the transcript as it stood before this turn.
        let history = project_history(&self.transcript.snapshot());

        let user = Message::user(prompt.clone(), attachment.clone());
        let user_message_id = user.id.clone();
        self.append(user);
        self.set_phase(TurnPhase::UserAppended, &progress);

        let (provisional, failure) = if model.is_image_generation() {
            (IMAGE_PENDING_MESSAGE, IMAGE_FAILURE_MESSAGE)
        } else {
            ("", CHAT_FAILURE_MESSAGE)
        };
        let placeholder = Message::assistant_placeholder(provisional);
        let assistant_message_id = placeholder.id.clone();
        self.append(placeholder);
        guard.track(assistant_message_id.clone(), failure);
        self.set_phase(TurnPhase::AssistantPlaceholdered, &progress);

        let turn = Turn {
            user_message_id,
            assistant_message_id,
            model,
            requested_at: Utc::now(),
        };
        info!(
            model = %model,
            assistant_message_id = %turn.assistant_message_id,
            history = history.len(),
            attachment = attachment.is_some(),
            "Turn started"
        );

        let phase = if model.is_image_generation() {
            if attachment.is_some() {
                debug!("Attachment ignored for image generation turn");
            }
            self.run_image_turn(&turn, prompt).await
        } else {
            let req = ChatRequest {
                model,
                prompt,
                attachment,
                history,
            };
            self.run_chat_turn(&turn, req, &progress).await
        };

        self.set_phase(phase, &progress);
        guard.settle();
        if let Some(message) = self.transcript.get(&turn.assistant_message_id) {
            progress.emit(TurnEvent::Completed { phase, message });
        }
        info!(phase = %phase, assistant_message_id = %turn.assistant_message_id, "Turn finished");

        // `guard` drops here, after the transcript holds the final state.
        Ok(TurnOutcome { turn, phase })
    }

    async fn run_image_turn(&self, turn: &Turn, prompt: String) -> TurnPhase {
        let id = &turn.assistant_message_id;
        match self.channel.generate_image(ImageRequest { prompt }).await {
            Ok(data_uri) if !data_uri.is_empty() => {
                self.transcript.replace(id, |m| m.as_image(data_uri));
                TurnPhase::Finalized
            }
            Ok(_) => {
                warn!(assistant_message_id = %id, "Image response contained no image part");
                self.transcript
                    .replace(id, |m| m.as_error(IMAGE_FAILURE_MESSAGE));
                TurnPhase::Errored
            }
            Err(e) => {
                warn!(assistant_message_id = %id, error = %e, "Image generation failed");
                self.transcript
                    .replace(id, |m| m.as_error(IMAGE_FAILURE_MESSAGE));
                TurnPhase::Errored
            }
        }
    }

    async fn run_chat_turn(&self, turn: &Turn, req: ChatRequest, progress: &Progress) -> TurnPhase {
        let id = &turn.assistant_message_id;
        let mut fragments = match self.channel.stream_chat(req).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(assistant_message_id = %id, error = %e, "Chat stream failed to start");
                self.transcript
                    .replace(id, |m| m.as_error(CHAT_FAILURE_MESSAGE));
                return TurnPhase::Errored;
            }
        };
        self.set_phase(TurnPhase::Streaming, progress);

        let mut accumulated = String::new();
        let mut count = 0usize;
        while let Some(item) = fragments.next().await {
            match item {
                Ok(delta) => {
                    if delta.is_empty() {
                        continue;
                    }
                    accumulated.push_str(&delta);
                    count += 1;
                    self.transcript
                        .replace(id, |m| m.with_content(accumulated.as_str()));
                    progress.emit(TurnEvent::Fragment {
                        delta,
                        accumulated: accumulated.clone(),
                    });
                }
                Err(e) => {
                    warn!(
                        assistant_message_id = %id,
                        error = %e,
                        fragments = count,
                        discarded_chars = accumulated.len(),
                        "Chat stream failed"
                    );
                    self.transcript
                        .replace(id, |m| m.as_error(CHAT_FAILURE_MESSAGE));
                    return TurnPhase::Errored;
                }
            }
        }

        debug!(assistant_message_id = %id, fragments = count, chars = accumulated.len(), "Chat stream completed");
        self.transcript.replace(id, Message::finalized);
        TurnPhase::Finalized
    }

    fn append(&self, message: Message) {
        // Ids are fresh UUIDs, so a collision here means a logic error upstream.
        if let Err(e) = self.transcript.append(message) {
            warn!(error = %e, "Transcript append rejected");
        }
    }

    fn set_phase(&self, phase: TurnPhase, progress: &Progress) {
        self.phase.send_replace(phase);
        progress.emit(TurnEvent::PhaseChanged { phase });
    }
}

/// Optional, best-effort progress sink for a single turn.
///
/// Events are dropped when the receiver lags or is gone; the transcript stays
/// the source of truth.
struct Progress(Option<mpsc::Sender<TurnEvent>>);

impl Progress {
    fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.0
            && tx.try_send(event).is_err()
        {
            trace!("Progress event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use async_trait::async_trait;
    use proto::{LlmError, MessageKind, Role};

    use super::*;
    use crate::llm::{FragmentStream, HistoryEntry};

    /// Queue-backed channel returning canned fragments and recording requests.
    struct MockChannel {
        replies: Mutex<VecDeque<Vec<Result<String, LlmError>>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl MockChannel {
        fn new(replies: Vec<Vec<Result<String, LlmError>>>) -> Self {
            Self {
                replies: Mutex::new(VecDeque::from(replies)),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ResponseChannel for MockChannel {
        async fn stream_chat(&self, req: ChatRequest) -> Result<FragmentStream, LlmError> {
            self.requests.lock().expect("lock requests").push(req);
            let reply = self
                .replies
                .lock()
                .expect("lock replies")
                .pop_front()
                .ok_or_else(|| LlmError::InvalidResponse("No mock reply left".to_string()))?;
            Ok(futures_util::stream::iter(reply).boxed())
        }

        async fn generate_image(&self, _req: ImageRequest) -> Result<String, LlmError> {
            Err(LlmError::Api("not scripted".to_string()))
        }
    }

    fn ok(parts: &[&str]) -> Vec<Result<String, LlmError>> {
        parts.iter().map(|p| Ok(p.to_string())).collect()
    }

    #[test]
    fn settled_guard_is_exclusive_and_only_clears_busy() {
        let session = ChatSession::with_default_seed(Arc::new(MockChannel::new(vec![])));
        let mut guard = TurnGuard::acquire(&session).expect("first acquire");
        assert!(session.is_busy());
        assert!(TurnGuard::acquire(&session).is_none());

        guard.settle();
        drop(guard);
        assert!(!session.is_busy());
        assert_eq!(session.phase(), TurnPhase::Idle);
        assert!(TurnGuard::acquire(&session).is_some());
    }

    #[test]
    fn unsettled_guard_fails_placeholder_before_clearing_busy() {
        let session = ChatSession::with_default_seed(Arc::new(MockChannel::new(vec![])));
        let placeholder = Message::assistant_placeholder("");
        let id = placeholder.id.clone();
        session.transcript().append(placeholder).expect("append");

        let mut guard = TurnGuard::acquire(&session).expect("acquire");
        guard.track(id.clone(), CHAT_FAILURE_MESSAGE);
        drop(guard);

        assert!(!session.is_busy());
        assert_eq!(session.phase(), TurnPhase::Errored);
        let failed = session.transcript().get(&id).expect("placeholder");
        assert_eq!(failed.kind, MessageKind::Error);
        assert_eq!(failed.content, CHAT_FAILURE_MESSAGE);
        assert!(!failed.streaming);
        assert_eq!(session.transcript().streaming_count(), 0);
    }

    #[test]
    fn select_model_updates_current_model() {
        let session = ChatSession::with_default_seed(Arc::new(MockChannel::new(vec![])));
        assert_eq!(session.model(), ChatModel::Flash);
        session.select_model(ChatModel::Pro);
        assert_eq!(session.model(), ChatModel::Pro);
        assert_eq!(session.seed().content, DEFAULT_GREETING);
        assert_eq!(session.phase(), TurnPhase::Idle);
    }

    #[tokio::test]
    async fn empty_submission_is_rejected_without_touching_transcript() {
        let session = ChatSession::with_default_seed(Arc::new(MockChannel::new(vec![])));
        let err = session
            .submit_turn("   ", None, ChatModel::Flash)
            .await
            .expect_err("empty");
        assert_eq!(err, TurnError::EmptySubmission);
        assert_eq!(session.transcript().len(), 1);
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn history_is_projected_from_transcript_before_the_turn() {
        let channel = Arc::new(MockChannel::new(vec![ok(&["one"]), ok(&["two"])]));
        let session = ChatSession::new(channel.clone(), Message::seed("hi there"));

        session
            .submit_turn("first", None, ChatModel::Flash)
            .await
            .expect("turn 1");
        session
            .submit_turn("second", Some(Attachment::new("image/png", "Zm9v")), ChatModel::Pro)
            .await
            .expect("turn 2");

        let requests = channel.requests.lock().expect("lock requests");
        assert_eq!(requests[0].history, vec![HistoryEntry::model("hi there")]);
        assert_eq!(
            requests[1].history,
            vec![
                HistoryEntry::model("hi there"),
                HistoryEntry::user("first"),
                HistoryEntry::model("one"),
            ]
        );
        assert_eq!(requests[1].prompt, "second");
        assert_eq!(requests[1].model, ChatModel::Pro);
        assert!(requests[1].attachment.is_some());
    }

    #[tokio::test]
    async fn empty_fragments_are_skipped() {
        let channel = Arc::new(MockChannel::new(vec![ok(&["", "a", "", "b"])]));
        let session = ChatSession::with_default_seed(channel);
        let (tx, mut rx) = mpsc::channel(32);

        let outcome = session
            .submit_turn_with_progress("x", None, ChatModel::Flash, tx)
            .await
            .expect("turn");
        assert_eq!(outcome.phase, TurnPhase::Finalized);

        let mut deltas = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let TurnEvent::Fragment { delta, .. } = event {
                deltas.push(delta);
            }
        }
        assert_eq!(deltas, vec!["a", "b"]);

        let reply = session
            .transcript()
            .get(&outcome.turn.assistant_message_id)
            .expect("reply");
        assert_eq!(reply.content, "ab");
        assert_eq!(reply.kind, MessageKind::Text);
        assert_eq!(reply.role, Role::Assistant);
    }

    #[tokio::test]
    async fn outcome_ids_match_transcript_entries() {
        let session =
            ChatSession::with_default_seed(Arc::new(MockChannel::new(vec![ok(&["ok"])])));
        let outcome = session
            .submit_turn("q", None, ChatModel::Flash)
            .await
            .expect("turn");

        let snapshot = session.transcript().snapshot();
        assert_eq!(snapshot[1].id, outcome.turn.user_message_id);
        assert_eq!(snapshot[2].id, outcome.turn.assistant_message_id);
        assert_eq!(outcome.turn.model, ChatModel::Flash);
        assert_ne!(outcome.turn.user_message_id, outcome.turn.assistant_message_id);
    }
}
