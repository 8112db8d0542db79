mod common;

use std::time::Duration;

use futures::StreamExt;

use common::{
    FakeAssistant, GREETING, Script, chat_service, code_step, message_created, run_created,
    text_delta,
};
use guru_chat::error::{ChatError, RemoteServiceError};
use guru_chat::events::RunEvent;
use guru_chat::transcript::{ContentItem, Role};
use guru_chat::ui_event::UiEvent;

#[tokio::test]
async fn test_new_session_is_seeded_with_greeting() {
    let assistant = FakeAssistant::new();
    let chat = chat_service(&assistant);

    let handle = chat.open_session().await.unwrap();
    let transcript = chat.transcript(handle.id()).unwrap();

    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript.current()[0].role, Role::Assistant);
    assert_eq!(
        transcript.current()[0].items,
        vec![ContentItem::text(GREETING)]
    );
    assert_eq!(handle.thread_id(), "thread_1");
}

#[tokio::test]
async fn test_flagged_message_leaves_transcript_unchanged() {
    let assistant = FakeAssistant::new();
    let chat = chat_service(&assistant);
    let handle = chat.open_session().await.unwrap();

    let err = chat
        .submit(handle.id(), "something forbidden")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::ModerationRejected));

    assert_eq!(chat.transcript(handle.id()).unwrap().len(), 1);
    assert!(assistant.posted_texts().is_empty());
    assert!(matches!(
        chat.stream_reply(handle.id()),
        Err(ChatError::NothingToRun)
    ));
}

#[tokio::test]
async fn test_full_reply_is_streamed_and_committed() {
    let assistant = FakeAssistant::new();
    let mut events = vec![Ok(message_created()), Ok(text_delta("Let me check."))];
    events.extend(
        code_step("print(6 * 7)", "42\n", "file-plot")
            .into_iter()
            .map(Ok),
    );
    events.extend([
        Ok(message_created()),
        Ok(text_delta("Hello")),
        Ok(text_delta(" world")),
        Ok(RunEvent::RunCompleted),
        Ok(RunEvent::Done),
    ]);
    assistant.script(Script::Events(events));

    let chat = chat_service(&assistant);
    let handle = chat.open_session().await.unwrap();

    let submission = chat.submit(handle.id(), "Which board?").await.unwrap();
    assert_eq!(submission.turn, 1);
    assert!(submission.user_html.contains("Which board?"));
    assert_eq!(assistant.posted_texts(), vec!["Which board?".to_string()]);

    let updates: Vec<UiEvent> = chat.stream_reply(handle.id()).unwrap().collect().await;
    assert_eq!(updates.last(), Some(&UiEvent::Done { committed: true }));
    assert!(updates.iter().all(|u| match u {
        UiEvent::Item { turn, .. } => *turn == 2,
        _ => true,
    }));

    let transcript = chat.transcript(handle.id()).unwrap();
    assert_eq!(transcript.len(), 3);
    let reply = &transcript.current()[2];
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.items.len(), 5);
    assert_eq!(reply.items[0], ContentItem::text("Let me check."));
    assert_eq!(
        reply.items[1],
        ContentItem::CodeInput {
            content: "print(6 * 7)".to_string()
        }
    );
    assert_eq!(
        reply.items[2],
        ContentItem::CodeOutput {
            content: "42\n".to_string()
        }
    );
    assert!(matches!(&reply.items[3], ContentItem::Image { content } if content.len() == 1));
    assert_eq!(reply.items[4], ContentItem::text("Hello world"));
}

#[tokio::test]
async fn test_truncated_stream_commits_partial_turn() {
    let assistant = FakeAssistant::new();
    assistant.script(Script::Events(vec![
        Ok(message_created()),
        Ok(text_delta("Partial answ")),
    ]));
    let chat = chat_service(&assistant);
    let handle = chat.open_session().await.unwrap();

    chat.submit(handle.id(), "Camber or rocker?").await.unwrap();
    let updates: Vec<UiEvent> = chat.stream_reply(handle.id()).unwrap().collect().await;
    let n = updates.len();
    assert!(matches!(&updates[n - 2], UiEvent::Warning { .. }));
    assert_eq!(updates[n - 1], UiEvent::Done { committed: true });

    let transcript = chat.transcript(handle.id()).unwrap();
    assert_eq!(transcript.len(), 3);
    assert_eq!(
        transcript.current()[2].items,
        vec![ContentItem::text("Partial answ")]
    );
}

#[tokio::test]
async fn test_run_start_failure_reports_error() {
    let assistant = FakeAssistant::new();
    assistant.script(Script::Fail(RemoteServiceError::new(
        "start run",
        Some(401),
        "Incorrect API key provided",
    )));
    let chat = chat_service(&assistant);
    let handle = chat.open_session().await.unwrap();

    chat.submit(handle.id(), "Hi").await.unwrap();
    let updates: Vec<UiEvent> = chat.stream_reply(handle.id()).unwrap().collect().await;
    assert_eq!(
        updates,
        vec![
            UiEvent::Error {
                message: "start run failed: Incorrect API key provided".to_string()
            },
            UiEvent::Done { committed: false },
        ]
    );

    // The user turn stays; no assistant turn was added.
    assert_eq!(chat.transcript(handle.id()).unwrap().len(), 2);
}

#[tokio::test]
async fn test_run_failure_keeps_streamed_content() {
    let assistant = FakeAssistant::new();
    assistant.script(Script::Events(vec![
        Ok(message_created()),
        Ok(text_delta("Looking")),
        Ok(RunEvent::RunFailed {
            message: "Rate limit reached".to_string(),
        }),
    ]));
    let chat = chat_service(&assistant);
    let handle = chat.open_session().await.unwrap();

    chat.submit(handle.id(), "Hi").await.unwrap();
    let updates: Vec<UiEvent> = chat.stream_reply(handle.id()).unwrap().collect().await;
    let n = updates.len();
    assert_eq!(
        updates[n - 2],
        UiEvent::Error {
            message: "Rate limit reached".to_string()
        }
    );
    assert_eq!(updates[n - 1], UiEvent::Done { committed: true });
    assert_eq!(chat.transcript(handle.id()).unwrap().len(), 3);
}

#[tokio::test]
async fn test_session_is_busy_while_streaming_and_cancel_commits() {
    let assistant = FakeAssistant::new();
    assistant.script(Script::Hang(vec![
        run_created("run_long"),
        message_created(),
        text_delta("Thinking about"),
    ]));
    let chat = chat_service(&assistant);
    let handle = chat.open_session().await.unwrap();

    chat.submit(handle.id(), "Long question").await.unwrap();
    let mut updates = chat.stream_reply(handle.id()).unwrap();

    // Wait until the first delta has been rendered.
    loop {
        match updates.next().await {
            Some(UiEvent::Item { html, .. }) if html.contains("Thinking about") => break,
            Some(_) => {}
            None => panic!("stream ended early"),
        }
    }

    assert!(matches!(
        chat.submit(handle.id(), "Another one").await,
        Err(ChatError::RunInProgress)
    ));
    assert!(matches!(
        chat.transcript(handle.id()),
        Err(ChatError::RunInProgress)
    ));

    assert!(chat.cancel(handle.id()).unwrap());
    let rest: Vec<UiEvent> = updates.collect().await;
    assert_eq!(rest.last(), Some(&UiEvent::Done { committed: true }));

    let transcript = chat.transcript(handle.id()).unwrap();
    assert_eq!(transcript.len(), 3);
    assert_eq!(
        transcript.current()[2].items,
        vec![ContentItem::text("Thinking about")]
    );
    assert!(!chat.cancel(handle.id()).unwrap());

    // The remote run is stopped too, so the thread accepts the next message.
    assert_eq!(
        assistant.cancelled_runs(),
        vec![("thread_1".to_string(), "run_long".to_string())]
    );
    chat.submit(handle.id(), "Next question").await.unwrap();
}

#[tokio::test]
async fn test_completed_run_is_not_cancelled_remotely() {
    let assistant = FakeAssistant::new();
    assistant.script(Script::Events(vec![
        Ok(run_created("run_1")),
        Ok(message_created()),
        Ok(text_delta("Done")),
        Ok(RunEvent::RunCompleted),
    ]));
    let chat = chat_service(&assistant);
    let handle = chat.open_session().await.unwrap();

    chat.submit(handle.id(), "Hi").await.unwrap();
    let updates: Vec<UiEvent> = chat.stream_reply(handle.id()).unwrap().collect().await;
    assert_eq!(updates.last(), Some(&UiEvent::Done { committed: true }));
    assert!(assistant.cancelled_runs().is_empty());
}

#[tokio::test]
async fn test_close_and_reap_delete_remote_threads() {
    let assistant = FakeAssistant::new();
    let chat = chat_service(&assistant);

    let closed = chat.open_session().await.unwrap();
    let idle = chat.open_session().await.unwrap();

    chat.close_session(closed.id()).await.unwrap();
    assert!(matches!(
        chat.session(closed.id()),
        Err(ChatError::SessionNotFound(_))
    ));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(chat.reap_expired(Duration::from_millis(5)).await, 1);
    assert!(chat.sessions().is_empty());
    assert_eq!(
        assistant.deleted_threads(),
        vec![closed.thread_id().to_string(), idle.thread_id().to_string()]
    );
}

#[tokio::test]
async fn test_empty_message_is_rejected() {
    let assistant = FakeAssistant::new();
    let chat = chat_service(&assistant);
    let handle = chat.open_session().await.unwrap();

    assert!(matches!(
        chat.submit(handle.id(), "   ").await,
        Err(ChatError::EmptyMessage)
    ));
    assert!(matches!(
        chat.submit("no-such-session", "Hi").await,
        Err(ChatError::SessionNotFound(_))
    ));
}
