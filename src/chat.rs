//! Chat flow: submission and streamed replies.
//!
//! A message goes through [`ChatService::submit`] (moderation, post to the
//! remote thread, append the user turn) and the reply is then produced by
//! [`ChatService::stream_reply`], which starts a run on the remote thread,
//! folds its events into a new assistant turn and pushes rendered items to
//! the browser as [`UiEvent`]s.
//!
//! The session stays locked for the whole reply. A second submission or
//! reply for the same session fails with [`ChatError::RunInProgress`].

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{OwnedMutexGuard, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, instrument, warn};

use crate::assistant::{AssistantService, FileContent, Moderation, RunEventStream};
use crate::error::{ChatError, Result};
use crate::events::RunEvent;
use crate::reducer::EventReducer;
use crate::render::{render_item_slot, render_turn};
use crate::session::{ChatSession, SessionHandle, SessionStore};
use crate::transcript::{Role, Transcript, Turn};
use crate::ui_event::UiEvent;

/// Buffered UI events per reply before the run task waits on the browser.
const UI_CHANNEL_CAPACITY: usize = 64;

const TRUNCATED_NOTICE: &str = "The reply was cut off before it finished.";

/// How a run's event stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// A terminal marker (`RunCompleted` or `Done`) arrived.
    Completed,
    /// The stream ended without a terminal marker.
    Truncated,
    /// The reply was cancelled or the browser went away.
    Cancelled,
    /// The run reported a failure or the stream broke.
    Failed(String),
}

/// A user turn accepted by [`ChatService::submit`].
#[derive(Debug, Clone)]
pub struct Submission {
    /// Index of the user turn in the transcript.
    pub turn: usize,
    /// Rendered user turn, ready to insert into the page.
    pub user_html: String,
}

/// Entry point for everything a browser session can do.
pub struct ChatService {
    assistant: Arc<dyn AssistantService>,
    moderation: Arc<dyn Moderation>,
    assistant_id: String,
    greeting: String,
    sessions: SessionStore,
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("assistant_id", &self.assistant_id)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl ChatService {
    pub fn new(
        assistant: Arc<dyn AssistantService>,
        moderation: Arc<dyn Moderation>,
        assistant_id: impl Into<String>,
        greeting: impl Into<String>,
    ) -> Self {
        Self {
            assistant,
            moderation,
            assistant_id: assistant_id.into(),
            greeting: greeting.into(),
            sessions: SessionStore::new(),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Create a remote thread and a session seeded with the greeting.
    #[instrument(skip(self))]
    pub async fn open_session(&self) -> Result<SessionHandle> {
        let thread_id = self.assistant.create_thread().await?;
        let handle = self
            .sessions
            .create(thread_id, Transcript::seeded(self.greeting.as_str()));
        info!(
            name: "session.opened",
            session_id = %handle.id(),
            thread_id = %handle.thread_id(),
            "Session opened"
        );
        Ok(handle)
    }

    pub fn session(&self, session_id: &str) -> Result<SessionHandle> {
        self.sessions
            .get(session_id)
            .ok_or_else(|| ChatError::SessionNotFound(session_id.to_string()))
    }

    /// Snapshot of the completed turns.
    pub fn transcript(&self, session_id: &str) -> Result<Transcript> {
        let handle = self.session(session_id)?;
        let session = handle.try_lock()?;
        Ok(session.transcript.clone())
    }

    /// Drop the session and delete its remote thread.
    #[instrument(skip(self))]
    pub async fn close_session(&self, session_id: &str) -> Result<()> {
        let handle = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| ChatError::SessionNotFound(session_id.to_string()))?;
        handle.cancel();
        self.assistant.delete_thread(handle.thread_id()).await?;
        info!(name: "session.closed", session_id = %session_id, "Session closed");
        Ok(())
    }

    /// Moderate `text`, post it to the remote thread and append it as a user
    /// turn.
    ///
    /// On any error the transcript is left unchanged.
    #[instrument(skip(self, text), fields(chars = text.len()))]
    pub async fn submit(&self, session_id: &str, text: &str) -> Result<Submission> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let handle = self.session(session_id)?;
        let mut session = handle.try_lock()?;

        if self.moderation.check(text).await? {
            warn!(
                name: "chat.moderation_rejected",
                session_id = %session_id,
                "Message flagged by moderation"
            );
            return Err(ChatError::ModerationRejected);
        }

        self.assistant
            .post_message(handle.thread_id(), Role::User, text)
            .await?;

        let turn = Turn::user(text);
        let index = session.transcript.len();
        let user_html = render_turn(index, &turn);
        session.transcript.append(turn);
        session.awaiting_reply = true;

        debug!(session_id = %session_id, turn = index, "User turn appended");
        Ok(Submission {
            turn: index,
            user_html,
        })
    }

    /// Start the reply to the last submitted message.
    ///
    /// The run is consumed by a background task that holds the session until
    /// the reply ends. Dropping the returned stream cancels the run.
    pub fn stream_reply(&self, session_id: &str) -> Result<ReceiverStream<UiEvent>> {
        let handle = self.session(session_id)?;
        let mut session = handle.try_lock()?;
        if !session.awaiting_reply {
            return Err(ChatError::NothingToRun);
        }
        session.awaiting_reply = false;

        let cancel = CancellationToken::new();
        handle.set_cancel(cancel.clone());

        let (tx, rx) = mpsc::channel(UI_CHANNEL_CAPACITY);
        let span = tracing::info_span!(
            "reply",
            session_id = %handle.id(),
            thread_id = %handle.thread_id()
        );
        let reply = Reply {
            assistant: Arc::clone(&self.assistant),
            assistant_id: self.assistant_id.clone(),
            handle,
            cancel,
            sink: tx,
        };

        tokio::spawn(reply.run(session).instrument(span));

        Ok(ReceiverStream::new(rx))
    }

    /// Cancel the reply streaming for `session_id`, if any.
    pub fn cancel(&self, session_id: &str) -> Result<bool> {
        let cancelled = self.session(session_id)?.cancel();
        if cancelled {
            info!(name: "chat.cancelled", session_id = %session_id, "Reply cancelled");
        }
        Ok(cancelled)
    }

    /// Download a file the assistant generated in `session_id`.
    ///
    /// Any other file id is reported as not found.
    pub async fn file(&self, session_id: &str, file_id: &str) -> Result<FileContent> {
        if !self.session(session_id)?.serves_file(file_id) {
            return Err(ChatError::FileNotFound(file_id.to_string()));
        }
        Ok(self.assistant.file_content(file_id).await?)
    }

    /// Remove sessions idle longer than `timeout` and delete their threads.
    ///
    /// Returns the number of sessions removed.
    pub async fn reap_expired(&self, timeout: Duration) -> usize {
        let expired = self.sessions.take_expired(timeout);
        for handle in &expired {
            handle.cancel();
            if let Err(e) = self.assistant.delete_thread(handle.thread_id()).await {
                warn!(
                    thread_id = %handle.thread_id(),
                    error = %e,
                    "Failed to delete thread of expired session"
                );
            }
        }
        if !expired.is_empty() {
            info!(name: "session.reaped", count = expired.len(), "Expired sessions removed");
        }
        expired.len()
    }
}

/// One reply in flight.
struct Reply {
    assistant: Arc<dyn AssistantService>,
    assistant_id: String,
    handle: SessionHandle,
    cancel: CancellationToken,
    sink: mpsc::Sender<UiEvent>,
}

impl Reply {
    async fn run(self, mut session: OwnedMutexGuard<ChatSession>) {
        let thread_id = self.handle.thread_id();
        let started = tokio::select! {
            () = self.cancel.cancelled() => {
                drop(session);
                self.finish(None, false).await;
                return;
            }
            started = self.assistant.start_run(thread_id, &self.assistant_id) => started,
        };

        let events = match started {
            Ok(events) => events,
            Err(e) => {
                error!(name: "chat.run_failed", error = %e, "Run could not be started");
                drop(session);
                self.finish(Some(UiEvent::Error { message: e.to_string() }), false)
                    .await;
                return;
            }
        };

        let turn = session.transcript.len();
        let mut reducer =
            EventReducer::begin(&mut session.transcript).for_session(self.handle.id());
        let outcome = consume_events(
            events,
            &mut reducer,
            turn,
            &self.handle,
            &self.cancel,
            &self.sink,
        )
        .await;
        let committed = reducer.finalize(&mut session.transcript);

        // The remote run keeps going after the stream is dropped, and the
        // thread refuses new messages until it ends.
        if outcome == RunOutcome::Cancelled
            && let Some(run_id) = reducer.run_id()
        {
            self.cancel_remote_run(run_id).await;
        }
        drop(session);

        let notice = match outcome {
            RunOutcome::Completed => {
                info!(name: "chat.reply_completed", committed, "Reply completed");
                None
            }
            RunOutcome::Truncated => {
                warn!(name: "chat.reply_truncated", committed, "Run stream ended without a terminal event");
                Some(UiEvent::Warning {
                    message: TRUNCATED_NOTICE.to_string(),
                })
            }
            RunOutcome::Cancelled => {
                info!(name: "chat.reply_cancelled", committed, "Reply cancelled");
                None
            }
            RunOutcome::Failed(message) => {
                error!(name: "chat.reply_failed", committed, error = %message, "Run failed");
                Some(UiEvent::Error { message })
            }
        };
        self.finish(notice, committed).await;
    }

    async fn cancel_remote_run(&self, run_id: &str) {
        match self
            .assistant
            .cancel_run(self.handle.thread_id(), run_id)
            .await
        {
            Ok(()) => debug!(run_id = %run_id, "Remote run cancelled"),
            Err(e) => warn!(run_id = %run_id, error = %e, "Failed to cancel remote run"),
        }
    }

    /// Release the cancel token, then report the end of the reply.
    async fn finish(&self, notice: Option<UiEvent>, committed: bool) {
        self.handle.clear_cancel();
        self.handle.touch();

        // The browser may already be gone; nothing left to tell it.
        if let Some(notice) = notice {
            let _ = self.sink.send(notice).await;
        }
        let _ = self.sink.send(UiEvent::Done { committed }).await;
    }
}

/// Drive `events` through `reducer` one event at a time.
///
/// After every mutation the touched items of assistant turn `turn` are
/// rendered and sent to `sink`. Generated files are registered on `session`
/// before their markup is sent. Stops at the first terminal event, stream
/// error, end of stream or cancellation; the caller finalizes the turn. A
/// closed `sink` cancels the run.
pub async fn consume_events(
    mut events: RunEventStream,
    reducer: &mut EventReducer,
    turn: usize,
    session: &SessionHandle,
    cancel: &CancellationToken,
    sink: &mpsc::Sender<UiEvent>,
) -> RunOutcome {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return RunOutcome::Cancelled,
            next = events.next() => next,
        };

        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(e)) => return RunOutcome::Failed(e.to_string()),
            None => return RunOutcome::Truncated,
        };
        debug!(event = event.kind(), "Run event");

        for file_id in event.image_file_ids() {
            session.allow_file(file_id);
        }
        let touched = reducer.apply(&event);
        let updates: Vec<UiEvent> = reducer
            .turn()
            .map(|current| {
                touched
                    .iter()
                    .filter_map(|&index| {
                        current.items.get(index).map(|item| UiEvent::Item {
                            turn,
                            index,
                            html: render_item_slot(index, item),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        for update in updates {
            if sink.send(update).await.is_err() {
                debug!("UI stream closed, cancelling run");
                cancel.cancel();
                return RunOutcome::Cancelled;
            }
        }

        if event.is_terminal() {
            return match event {
                RunEvent::RunFailed { message } | RunEvent::Error { message } => {
                    RunOutcome::Failed(message)
                }
                _ => RunOutcome::Completed,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteServiceError;
    use crate::events::DeltaBlock;
    use crate::transcript::ContentItem;

    fn scripted(events: Vec<std::result::Result<RunEvent, RemoteServiceError>>) -> RunEventStream {
        Box::pin(futures::stream::iter(events))
    }

    fn delta(text: &str) -> RunEvent {
        RunEvent::MessageDelta {
            message_id: "msg_1".to_string(),
            blocks: vec![DeltaBlock::Text(text.to_string())],
        }
    }

    fn created() -> RunEvent {
        RunEvent::MessageCreated {
            message_id: "msg_1".to_string(),
        }
    }

    fn session() -> SessionHandle {
        SessionStore::new().create("thread_1", Transcript::new())
    }

    #[tokio::test]
    async fn test_consume_until_completed() {
        let mut transcript = Transcript::seeded("Hi");
        let mut reducer = EventReducer::begin(&mut transcript);
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let outcome = consume_events(
            scripted(vec![
                Ok(created()),
                Ok(delta("Hello")),
                Ok(delta(" world")),
                Ok(RunEvent::RunCompleted),
                Ok(delta(" ignored")),
            ]),
            &mut reducer,
            1,
            &session(),
            &cancel,
            &tx,
        )
        .await;
        assert_eq!(outcome, RunOutcome::Completed);
        assert!(reducer.finalize(&mut transcript));
        assert_eq!(
            transcript.current()[1].items,
            vec![ContentItem::text("Hello world")]
        );

        drop(tx);
        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            updates.push(update);
        }
        assert_eq!(updates.len(), 3);
        let UiEvent::Item { turn, index, html } = &updates[2] else {
            panic!("expected item update");
        };
        assert_eq!((*turn, *index), (1, 0));
        assert!(html.contains("Hello world"));
    }

    #[tokio::test]
    async fn test_consume_reports_truncation_and_failure() {
        let mut transcript = Transcript::new();
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let mut reducer = EventReducer::begin(&mut transcript);
        let outcome = consume_events(
            scripted(vec![Ok(created()), Ok(delta("Partial"))]),
            &mut reducer,
            0,
            &session(),
            &cancel,
            &tx,
        )
        .await;
        assert_eq!(outcome, RunOutcome::Truncated);
        assert!(reducer.finalize(&mut transcript));

        let mut reducer = EventReducer::begin(&mut transcript);
        let outcome = consume_events(
            scripted(vec![
                Ok(created()),
                Err(RemoteServiceError::new("stream run", None, "reset")),
            ]),
            &mut reducer,
            1,
            &session(),
            &cancel,
            &tx,
        )
        .await;
        assert_eq!(
            outcome,
            RunOutcome::Failed("stream run failed: reset".to_string())
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_first_event() {
        let mut transcript = Transcript::new();
        let mut reducer = EventReducer::begin(&mut transcript);
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = consume_events(
            scripted(vec![Ok(created()), Ok(delta("never"))]),
            &mut reducer,
            0,
            &session(),
            &cancel,
            &tx,
        )
        .await;
        assert_eq!(outcome, RunOutcome::Cancelled);
        assert!(!reducer.finalize(&mut transcript));
        assert!(transcript.is_empty());
    }

    #[tokio::test]
    async fn test_generated_images_are_registered_on_the_session() {
        let mut transcript = Transcript::new();
        let mut reducer = EventReducer::begin(&mut transcript);
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = session();

        let plot = RunEvent::StepCompleted {
            step_id: "step_1".to_string(),
            kind: crate::events::StepKind::ToolCalls,
            tool_calls: vec![crate::events::ToolCallDetails {
                index: 0,
                id: Some("call_1".to_string()),
                kind: crate::events::ToolKind::CodeInterpreter,
                input: None,
                outputs: vec![crate::events::ToolOutput::Image {
                    file_id: "file-plot".to_string(),
                }],
            }],
        };
        let outcome = consume_events(
            scripted(vec![Ok(plot), Ok(RunEvent::Done)]),
            &mut reducer,
            0,
            &handle,
            &cancel,
            &tx,
        )
        .await;
        assert_eq!(outcome, RunOutcome::Completed);
        assert!(handle.serves_file("file-plot"));
        assert!(!handle.serves_file("file-other"));
    }

    #[tokio::test]
    async fn test_closed_sink_cancels() {
        let mut transcript = Transcript::new();
        let mut reducer = EventReducer::begin(&mut transcript);
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let cancel = CancellationToken::new();

        let outcome = consume_events(
            scripted(vec![Ok(created()), Ok(delta("Hi"))]),
            &mut reducer,
            0,
            &session(),
            &cancel,
            &tx,
        )
        .await;
        assert_eq!(outcome, RunOutcome::Cancelled);
        assert!(cancel.is_cancelled());
    }
}
