//! Conversation Loop
//!
//! Drives one session turn by turn:
//! `AwaitingInput -> AwaitingCompletion -> Displaying -> Persisting -> AwaitingInput`.
//!
//! Every turn is strictly sequential. The completion stream is the only
//! suspension point and it can be cancelled; a cancelled or failed turn keeps
//! the user's message so that a retry re-sends the same context, but nothing
//! partial is ever appended or persisted. Logging out consumes the loop.

use crate::{
    error::{CoachError, CoachResult, CompletionFailure},
    llm_client::{CompletionClient, CompletionSettings, DEFAULT_VOICE, SpeechSynthesizer, Transcriber},
    prompt::PromptComposer,
    retry::RetryPolicy,
    session::Session,
    store::RecordStore,
    transcript::{Role, Turn},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::{task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Where the loop is within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    AwaitingInput,
    AwaitingCompletion,
    Displaying,
    Persisting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A recoverable, user-visible message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Receives everything the chat screen shows.
#[async_trait]
pub trait DisplaySink: Send + Sync {
    /// Next fragment of the reply being generated.
    async fn fragment(&self, text: &str);
    /// The reply finished streaming.
    async fn completed(&self, full_text: &str);
    /// Fragments shown so far belong to a reply that was dropped.
    async fn discarded(&self);
    async fn notice(&self, notice: Notice);
    /// Transcribed voice input, shown before the reply starts.
    async fn transcription(&self, text: &str);
    /// Synthesized speech for the latest reply.
    async fn audio(&self, audio: Bytes);
}

/// Upper bounds on every external call.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutSettings {
    /// Until the completion stream opens.
    pub completion_start: Duration,
    /// Longest gap between two fragments.
    pub fragment_idle: Duration,
    pub transcription: Duration,
    pub synthesis: Duration,
    /// One store write attempt.
    pub store: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            completion_start: Duration::from_secs(30),
            fragment_idle: Duration::from_secs(30),
            transcription: Duration::from_secs(60),
            synthesis: Duration::from_secs(60),
            store: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub completion: CompletionSettings,
    pub timeouts: TimeoutSettings,
    pub retry: RetryPolicy,
    pub voice: String,
    pub speak_replies: bool,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            completion: CompletionSettings::default(),
            timeouts: TimeoutSettings::default(),
            retry: RetryPolicy::default(),
            voice: DEFAULT_VOICE.to_string(),
            speak_replies: false,
        }
    }
}

/// Result of one turn.
#[derive(Debug)]
pub enum TurnOutcome {
    Completed {
        reply: String,
        /// `false` when the store stayed unavailable; the transcript is kept in
        /// memory and written with the next successful turn.
        persisted: bool,
        /// Speech synthesis running in the background, if enabled.
        speech: Option<JoinHandle<()>>,
    },
    Cancelled,
    Failed(CoachError),
}

pub struct ConversationLoop {
    session: Session,
    state: ConversationState,
    store: Arc<dyn RecordStore>,
    completion: Arc<dyn CompletionClient>,
    transcriber: Option<Arc<dyn Transcriber>>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    sink: Arc<dyn DisplaySink>,
    composer: PromptComposer,
    settings: LoopSettings,
}

impl ConversationLoop {
    pub fn new(
        session: Session,
        store: Arc<dyn RecordStore>,
        completion: Arc<dyn CompletionClient>,
        sink: Arc<dyn DisplaySink>,
        composer: PromptComposer,
        settings: LoopSettings,
    ) -> Self {
        Self {
            session,
            state: ConversationState::AwaitingInput,
            store,
            completion,
            transcriber: None,
            synthesizer: None,
            sink,
            composer,
            settings,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Turns for the chat screen: no system instruction, no hidden turns.
    pub fn visible_turns(&self) -> Vec<Turn> {
        self.session.transcript().visible().cloned().collect()
    }

    pub fn set_speak_replies(&mut self, enabled: bool) {
        self.settings.speak_replies = enabled && self.synthesizer.is_some();
        info!(enabled = self.settings.speak_replies, "Spoken replies toggled");
    }

    /// Ends the loop and hands the session back, e.g. for logout.
    pub fn into_session(self) -> Session {
        self.session
    }

    fn transition(&mut self, next: ConversationState) {
        debug!(from = ?self.state, to = ?next, "Conversation state change");
        self.state = next;
    }

    async fn fail(&mut self, err: CoachError) -> TurnOutcome {
        warn!(error = %err, "Turn failed");
        self.sink.notice(Notice::error(err.user_message())).await;
        self.transition(ConversationState::AwaitingInput);
        TurnOutcome::Failed(err)
    }

    async fn cancelled(&mut self) -> TurnOutcome {
        info!("Turn cancelled; partial reply discarded");
        self.sink.discarded().await;
        self.transition(ConversationState::AwaitingInput);
        TurnOutcome::Cancelled
    }

    /// Appends a user turn and runs the completion for it.
    #[instrument(skip_all, fields(identifier = %self.session.profile().identifier))]
    pub async fn submit_text(&mut self, text: &str, cancel: CancellationToken) -> TurnOutcome {
        let text = text.trim();
        if text.is_empty() {
            return self.fail(CoachError::ValidationFailed { field: "message" }).await;
        }
        self.session.transcript_mut().push_user(text);
        self.run_completion(cancel).await
    }

    /// Transcribes a voice recording and submits it as a user turn.
    #[instrument(skip_all, fields(identifier = %self.session.profile().identifier, bytes = audio.len()))]
    pub async fn submit_voice(&mut self, audio: Bytes, cancel: CancellationToken) -> TurnOutcome {
        let Some(transcriber) = self.transcriber.clone() else {
            return self
                .fail(CoachError::TranscriptionFailed("voice input is not enabled".to_string()))
                .await;
        };

        let limit = self.settings.timeouts.transcription;
        let transcribed = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = timeout(limit, transcriber.transcribe(audio)) => Some(result),
        };

        let text = match transcribed {
            None => {
                self.transition(ConversationState::AwaitingInput);
                return TurnOutcome::Cancelled;
            }
            Some(Err(_)) => {
                return self
                    .fail(CoachError::TranscriptionFailed("transcription timed out".to_string()))
                    .await;
            }
            Some(Ok(Err(e))) => return self.fail(e).await,
            Some(Ok(Ok(text))) if text.trim().is_empty() => {
                return self
                    .fail(CoachError::TranscriptionFailed("no speech detected".to_string()))
                    .await;
            }
            Some(Ok(Ok(text))) => text,
        };

        self.sink.transcription(text.trim()).await;
        self.submit_text(&text, cancel).await
    }

    /// Re-runs the completion for a user turn left unanswered by a failure or
    /// cancellation.
    pub async fn retry_last(&mut self, cancel: CancellationToken) -> TurnOutcome {
        let unanswered = self
            .session
            .transcript()
            .last()
            .is_some_and(|t| t.role == Role::User);
        if !unanswered {
            self.sink.notice(Notice::info("There is nothing to retry.")).await;
            return TurnOutcome::Failed(CoachError::ValidationFailed { field: "message" });
        }
        self.run_completion(cancel).await
    }

    /// Switches the practice focus by appending a hidden instruction turn.
    pub fn change_topic(&mut self, topic: &str) -> CoachResult<()> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(CoachError::ValidationFailed { field: "topic" });
        }
        let pivot = self.composer.topic_pivot(topic);
        self.session.transcript_mut().push_instruction(pivot);
        self.session.set_topic(topic.to_string());
        info!(topic, "Practice topic changed");
        Ok(())
    }

    /// Starts the conversation over: fresh instruction (and greeting), stored
    /// transcript overwritten.
    pub async fn reset(&mut self) -> bool {
        let mut profile = self.session.profile().clone();
        profile.transcript.clear();
        self.session = Session::open(profile, &self.composer);
        self.transition(ConversationState::AwaitingInput);
        info!("Conversation reset");
        self.persist().await
    }

    async fn run_completion(&mut self, cancel: CancellationToken) -> TurnOutcome {
        self.transition(ConversationState::AwaitingCompletion);

        let timeouts = self.settings.timeouts.clone();
        let opened = {
            let request = self
                .completion
                .stream_reply(self.session.transcript().turns(), &self.settings.completion);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = timeout(timeouts.completion_start, request) => Some(result),
            }
        };
        let mut stream = match opened {
            None => return self.cancelled().await,
            Some(Err(_)) => {
                return self
                    .fail(CoachError::completion(
                        CompletionFailure::Timeout,
                        "completion did not start in time",
                    ))
                    .await;
            }
            Some(Ok(Err(e))) => return self.fail(e).await,
            Some(Ok(Ok(stream))) => stream,
        };

        self.transition(ConversationState::Displaying);
        let mut reply = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = timeout(timeouts.fragment_idle, stream.next()) => Some(item),
            };
            match next {
                None => return self.cancelled().await,
                Some(Err(_)) => {
                    if !reply.is_empty() {
                        self.sink.discarded().await;
                    }
                    return self
                        .fail(CoachError::completion(
                            CompletionFailure::Timeout,
                            "completion stalled",
                        ))
                        .await;
                }
                Some(Ok(None)) => break,
                Some(Ok(Some(Ok(fragment)))) => {
                    self.sink.fragment(&fragment).await;
                    reply.push_str(&fragment);
                }
                Some(Ok(Some(Err(e)))) => {
                    if !reply.is_empty() {
                        self.sink.discarded().await;
                    }
                    return self.fail(e).await;
                }
            }
        }

        if reply.trim().is_empty() {
            return self
                .fail(CoachError::completion(CompletionFailure::Unknown, "empty reply"))
                .await;
        }

        self.session.transcript_mut().push_assistant(reply.clone());
        self.sink.completed(&reply).await;

        let speech = self.speak(&reply);

        self.transition(ConversationState::Persisting);
        let persisted = self.persist().await;

        self.transition(ConversationState::AwaitingInput);
        info!(
            turns = self.session.transcript().len(),
            persisted, "Turn completed"
        );
        TurnOutcome::Completed {
            reply,
            persisted,
            speech,
        }
    }

    /// Writes the whole transcript with bounded retry. Failure is reported to the
    /// user and otherwise swallowed.
    async fn persist(&mut self) -> bool {
        let location = self.session.profile().storage_location;
        let limit = self.settings.timeouts.store;
        let store = &self.store;
        let transcript = self.session.transcript();

        let result = self
            .settings
            .retry
            .run("persist_transcript", move || async move {
                timeout(limit, store.persist_transcript(location, transcript))
                    .await
                    .unwrap_or_else(|_| Err(CoachError::store("write timed out")))
            })
            .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Transcript not saved; keeping it in memory");
                self.sink.notice(Notice::warning(e.user_message())).await;
                false
            }
        }
    }

    fn speak(&self, reply: &str) -> Option<JoinHandle<()>> {
        if !self.settings.speak_replies {
            return None;
        }
        let synthesizer = self.synthesizer.clone()?;
        let sink = self.sink.clone();
        let text = reply.to_string();
        let voice = self.settings.voice.clone();
        let limit = self.settings.timeouts.synthesis;

        Some(tokio::spawn(async move {
            let err = match timeout(limit, synthesizer.synthesize(text, voice)).await {
                Ok(Ok(audio)) => {
                    sink.audio(audio).await;
                    return;
                }
                Ok(Err(e)) => e,
                Err(_) => CoachError::SynthesisFailed("speech synthesis timed out".to_string()),
            };
            warn!(error = %err, "Speech synthesis failed");
            sink.notice(Notice::warning(err.user_message())).await;
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        llm_client::{MockSpeechSynthesizer, MockTranscriber, TextStream},
        profile::ProfileFields,
        session::SessionManager,
        store::tabular::{MemorySheet, TabularRecordStore},
    };
    use futures::stream;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Script {
        Reply(Vec<&'static str>),
        FailOpen(CompletionFailure),
        FailAfter(Vec<&'static str>),
        Stall,
    }

    struct ScriptedCompletion {
        scripts: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<Vec<Turn>>>,
    }

    impl ScriptedCompletion {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedCompletion {
        async fn stream_reply(&self, turns: &[Turn], _settings: &CompletionSettings) -> CoachResult<TextStream> {
            self.requests.lock().unwrap().push(turns.to_vec());
            let script = self.scripts.lock().unwrap().pop_front().expect("no script left");
            match script {
                Script::Reply(parts) => Ok(Box::pin(stream::iter(
                    parts.into_iter().map(|p| Ok(p.to_string())).collect::<Vec<_>>(),
                ))),
                Script::FailOpen(kind) => Err(CoachError::completion(kind, "scripted")),
                Script::FailAfter(parts) => {
                    let mut items: Vec<CoachResult<String>> =
                        parts.into_iter().map(|p| Ok(p.to_string())).collect();
                    items.push(Err(CoachError::completion(CompletionFailure::Network, "reset")));
                    Ok(Box::pin(stream::iter(items)))
                }
                Script::Stall => Ok(Box::pin(stream::pending::<CoachResult<String>>())),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Shown {
        Fragment(String),
        Completed(String),
        Discarded,
        Notice(NoticeLevel),
        Transcription(String),
        Audio(usize),
    }

    #[derive(Default)]
    struct RecordingSink {
        shown: Mutex<Vec<Shown>>,
    }

    impl RecordingSink {
        fn shown(&self) -> Vec<Shown> {
            self.shown.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DisplaySink for RecordingSink {
        async fn fragment(&self, text: &str) {
            self.shown.lock().unwrap().push(Shown::Fragment(text.to_string()));
        }
        async fn completed(&self, full_text: &str) {
            self.shown.lock().unwrap().push(Shown::Completed(full_text.to_string()));
        }
        async fn discarded(&self) {
            self.shown.lock().unwrap().push(Shown::Discarded);
        }
        async fn notice(&self, notice: Notice) {
            self.shown.lock().unwrap().push(Shown::Notice(notice.level));
        }
        async fn transcription(&self, text: &str) {
            self.shown.lock().unwrap().push(Shown::Transcription(text.to_string()));
        }
        async fn audio(&self, audio: Bytes) {
            self.shown.lock().unwrap().push(Shown::Audio(audio.len()));
        }
    }

    struct Harness {
        conversation: ConversationLoop,
        sink: Arc<RecordingSink>,
        completion: Arc<ScriptedCompletion>,
        sheet: MemorySheet,
    }

    async fn harness(scripts: Vec<Script>) -> Harness {
        let sheet = MemorySheet::new();
        let store: Arc<dyn RecordStore> = Arc::new(TabularRecordStore::in_memory(sheet.clone()));
        let manager = SessionManager::new(store.clone(), PromptComposer::default());
        let session = manager
            .register(
                "+7000",
                "abc",
                ProfileFields {
                    display_name: "Max".into(),
                    level: "Beginner".into(),
                    target: "6.5".into(),
                    native_language: None,
                },
            )
            .await
            .unwrap();
        let sink = Arc::new(RecordingSink::default());
        let completion = ScriptedCompletion::new(scripts);
        let settings = LoopSettings {
            timeouts: TimeoutSettings {
                fragment_idle: Duration::from_millis(50),
                ..TimeoutSettings::default()
            },
            retry: RetryPolicy {
                initial_delay: Duration::from_millis(1),
                jitter: false,
                ..RetryPolicy::default()
            },
            ..LoopSettings::default()
        };
        let conversation = ConversationLoop::new(
            session,
            store,
            completion.clone(),
            sink.clone(),
            PromptComposer::default(),
            settings,
        );
        Harness {
            conversation,
            sink,
            completion,
            sheet,
        }
    }

    #[tokio::test]
    async fn test_fragments_are_displayed_in_order_and_persisted() {
        let mut h = harness(vec![Script::Reply(vec!["Brilliant! ", "Let's ", "start."])]).await;

        let outcome = h.conversation.submit_text("Hello", CancellationToken::new()).await;
        match outcome {
            TurnOutcome::Completed { reply, persisted, speech } => {
                assert_eq!(reply, "Brilliant! Let's start.");
                assert!(persisted);
                assert!(speech.is_none());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(
            h.sink.shown(),
            vec![
                Shown::Fragment("Brilliant! ".into()),
                Shown::Fragment("Let's ".into()),
                Shown::Fragment("start.".into()),
                Shown::Completed("Brilliant! Let's start.".into()),
            ]
        );
        assert_eq!(h.conversation.state(), ConversationState::AwaitingInput);
        assert_eq!(h.conversation.session().transcript().len(), 3);

        let stored = h.sheet.raw_row(2).unwrap();
        assert!(stored[4].contains("Brilliant! Let's start."));
    }

    #[tokio::test]
    async fn test_completion_receives_hidden_system_turn() {
        let mut h = harness(vec![Script::Reply(vec!["ok"])]).await;
        h.conversation.submit_text("Hi", CancellationToken::new()).await;

        let requests = h.completion.requests.lock().unwrap();
        assert_eq!(requests[0][0].role, Role::System);
        assert_eq!(requests[0][1], Turn::user("Hi"));
        drop(requests);

        let visible = h.conversation.visible_turns();
        assert!(visible.iter().all(|t| t.role != Role::System));
        assert_eq!(visible.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_keeps_user_turn_and_retry_resends_it() {
        let mut h = harness(vec![
            Script::FailOpen(CompletionFailure::RateLimit),
            Script::Reply(vec!["Sure!"]),
        ])
        .await;

        let outcome = h.conversation.submit_text("Question", CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            TurnOutcome::Failed(CoachError::CompletionFailed {
                kind: CompletionFailure::RateLimit,
                ..
            })
        ));
        assert_eq!(h.conversation.session().transcript().last(), Some(&Turn::user("Question")));
        assert_eq!(h.sink.shown(), vec![Shown::Notice(NoticeLevel::Error)]);

        let outcome = h.conversation.retry_last(CancellationToken::new()).await;
        assert!(matches!(outcome, TurnOutcome::Completed { .. }));

        let requests = h.completion.requests.lock().unwrap();
        assert_eq!(requests[0], requests[1]);
        assert_eq!(h.conversation.session().transcript().len(), 3);
    }

    #[tokio::test]
    async fn test_mid_stream_error_discards_partial_reply() {
        let mut h = harness(vec![Script::FailAfter(vec!["Half a"])]).await;
        let outcome = h.conversation.submit_text("Hi", CancellationToken::new()).await;

        assert!(matches!(outcome, TurnOutcome::Failed(_)));
        assert_eq!(
            h.sink.shown(),
            vec![
                Shown::Fragment("Half a".into()),
                Shown::Discarded,
                Shown::Notice(NoticeLevel::Error)
            ]
        );
        assert_eq!(h.conversation.session().transcript().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_discards_without_persisting() {
        let mut h = harness(vec![Script::Stall]).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let outcome = h.conversation.submit_text("Hi", cancel).await;
        assert!(matches!(outcome, TurnOutcome::Cancelled));
        assert_eq!(h.sink.shown(), vec![Shown::Discarded]);

        let stored = h.sheet.raw_row(2).unwrap();
        assert_eq!(stored[4], "[]");
    }

    #[tokio::test]
    async fn test_stalled_stream_times_out() {
        let mut h = harness(vec![Script::Stall]).await;
        let outcome = h.conversation.submit_text("Hi", CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            TurnOutcome::Failed(CoachError::CompletionFailed {
                kind: CompletionFailure::Timeout,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_store_outage_keeps_transcript_in_memory() {
        let mut h = harness(vec![Script::Reply(vec!["one"]), Script::Reply(vec!["two"])]).await;

        h.sheet.set_offline(true);
        let outcome = h.conversation.submit_text("first", CancellationToken::new()).await;
        assert!(matches!(outcome, TurnOutcome::Completed { persisted: false, .. }));
        assert!(h.sink.shown().contains(&Shown::Notice(NoticeLevel::Warning)));
        assert_eq!(h.conversation.session().transcript().len(), 3);

        h.sheet.set_offline(false);
        let outcome = h.conversation.submit_text("second", CancellationToken::new()).await;
        assert!(matches!(outcome, TurnOutcome::Completed { persisted: true, .. }));
        let stored = h.sheet.raw_row(2).unwrap();
        assert!(stored[4].contains("first") && stored[4].contains("two"));
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let mut h = harness(vec![]).await;
        let outcome = h.conversation.submit_text("   ", CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            TurnOutcome::Failed(CoachError::ValidationFailed { field: "message" })
        ));
        assert_eq!(h.conversation.session().transcript().len(), 1);
    }

    #[tokio::test]
    async fn test_topic_change_appends_hidden_instruction() {
        let mut h = harness(vec![Script::Reply(vec!["Let's talk words."])]).await;
        h.conversation.change_topic("Vocabulary").unwrap();
        assert!(h.conversation.change_topic(" ").is_err());

        h.conversation.submit_text("ready", CancellationToken::new()).await;
        let turns = h.conversation.session().transcript().turns().to_vec();
        assert_eq!(turns[0].role, Role::System);
        assert!(turns[1].hidden);
        assert_eq!(h.conversation.session().topic(), Some("Vocabulary"));
        assert_eq!(turns.iter().filter(|t| t.role == Role::System).count(), 1);
        assert!(h.conversation.visible_turns().iter().all(|t| !t.hidden));
    }

    #[tokio::test]
    async fn test_voice_input_is_transcribed_then_submitted() {
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .times(1)
            .returning(|_| Ok("I like reading".to_string()));

        let mut h = harness(vec![Script::Reply(vec!["Nice!"])]).await;
        h.conversation = h.conversation.with_transcriber(Arc::new(transcriber));

        let outcome = h
            .conversation
            .submit_voice(Bytes::from_static(b"RIFF"), CancellationToken::new())
            .await;
        assert!(matches!(outcome, TurnOutcome::Completed { .. }));
        assert_eq!(h.sink.shown()[0], Shown::Transcription("I like reading".into()));
        assert_eq!(
            h.conversation.session().transcript().turns()[1],
            Turn::user("I like reading")
        );
    }

    #[tokio::test]
    async fn test_failed_transcription_appends_nothing() {
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .returning(|_| Err(CoachError::TranscriptionFailed("noise".into())));

        let mut h = harness(vec![]).await;
        h.conversation = h.conversation.with_transcriber(Arc::new(transcriber));
        let outcome = h
            .conversation
            .submit_voice(Bytes::from_static(b"RIFF"), CancellationToken::new())
            .await;
        assert!(matches!(outcome, TurnOutcome::Failed(CoachError::TranscriptionFailed(_))));
        assert_eq!(h.conversation.session().transcript().len(), 1);
    }

    #[tokio::test]
    async fn test_spoken_reply_is_delivered_in_background() {
        let mut synthesizer = MockSpeechSynthesizer::new();
        synthesizer
            .expect_synthesize()
            .withf(|text, voice| text == "Hello there" && voice == "alloy")
            .returning(|_, _| Ok(Bytes::from_static(b"mp3data")));

        let mut h = harness(vec![Script::Reply(vec!["Hello there"])]).await;
        h.conversation = h.conversation.with_synthesizer(Arc::new(synthesizer));
        h.conversation.set_speak_replies(true);

        let outcome = h.conversation.submit_text("Hi", CancellationToken::new()).await;
        let TurnOutcome::Completed { speech: Some(handle), .. } = outcome else {
            panic!("expected a speech task");
        };
        handle.await.unwrap();
        assert_eq!(h.sink.shown().last(), Some(&Shown::Audio(7)));
    }

    #[tokio::test]
    async fn test_speak_replies_requires_synthesizer() {
        let mut h = harness(vec![]).await;
        h.conversation.set_speak_replies(true);
        assert!(!h.conversation.settings.speak_replies);
    }

    #[tokio::test]
    async fn test_reset_starts_over_and_persists() {
        let mut h = harness(vec![Script::Reply(vec!["Hi!"])]).await;
        h.conversation.submit_text("Hello", CancellationToken::new()).await;

        assert!(h.conversation.reset().await);
        assert_eq!(h.conversation.session().transcript().len(), 1);
        let stored = h.sheet.raw_row(2).unwrap();
        assert!(!stored[4].contains("Hello"));
    }
}
