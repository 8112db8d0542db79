//! Scripted stand-ins for the remote assistant and moderation services.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Bytes;
use futures::{StreamExt, stream};

use guru_chat::assistant::{AssistantService, FileContent, Moderation, RunEventStream};
use guru_chat::chat::ChatService;
use guru_chat::error::RemoteServiceError;
use guru_chat::events::{
    DeltaBlock, RunEvent, StepKind, ToolCallDelta, ToolCallDetails, ToolKind, ToolOutput,
};
use guru_chat::transcript::Role;

pub const GREETING: &str = "Hi! Tell me how you ride.";

/// One scripted run.
pub enum Script {
    /// Yield these events, then end.
    Events(Vec<Result<RunEvent, RemoteServiceError>>),
    /// Yield these events, then never end.
    Hang(Vec<RunEvent>),
    /// Refuse to start the run.
    Fail(RemoteServiceError),
}

#[derive(Default)]
pub struct FakeAssistant {
    scripts: Mutex<VecDeque<Script>>,
    pub posted: Mutex<Vec<(String, Role, String)>>,
    pub deleted: Mutex<Vec<String>>,
    pub cancelled: Mutex<Vec<(String, String)>>,
    threads: Mutex<usize>,
}

impl FakeAssistant {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn posted_texts(&self) -> Vec<String> {
        self.posted
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, text)| text.clone())
            .collect()
    }

    pub fn deleted_threads(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    /// `(thread_id, run_id)` of every run cancel request.
    pub fn cancelled_runs(&self) -> Vec<(String, String)> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssistantService for FakeAssistant {
    async fn create_thread(&self) -> Result<String, RemoteServiceError> {
        let mut n = self.threads.lock().unwrap();
        *n += 1;
        Ok(format!("thread_{n}"))
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), RemoteServiceError> {
        self.deleted.lock().unwrap().push(thread_id.to_string());
        Ok(())
    }

    async fn post_message(
        &self,
        thread_id: &str,
        role: Role,
        text: &str,
    ) -> Result<(), RemoteServiceError> {
        self.posted
            .lock()
            .unwrap()
            .push((thread_id.to_string(), role, text.to_string()));
        Ok(())
    }

    async fn start_run(
        &self,
        _thread_id: &str,
        _assistant_id: &str,
    ) -> Result<RunEventStream, RemoteServiceError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Events(Vec::new()));
        match script {
            Script::Events(events) => Ok(Box::pin(stream::iter(events))),
            Script::Hang(events) => Ok(Box::pin(
                stream::iter(events.into_iter().map(Ok)).chain(stream::pending()),
            )),
            Script::Fail(err) => Err(err),
        }
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), RemoteServiceError> {
        self.cancelled
            .lock()
            .unwrap()
            .push((thread_id.to_string(), run_id.to_string()));
        Ok(())
    }

    async fn file_content(&self, file_id: &str) -> Result<FileContent, RemoteServiceError> {
        if file_id == "file-missing" {
            return Err(RemoteServiceError::new(
                "download file",
                Some(404),
                "No such File object",
            ));
        }
        Ok(FileContent {
            content_type: "image/png".to_string(),
            bytes: Bytes::from_static(b"\x89PNG"),
        })
    }
}

/// Flags any text containing "forbidden".
#[derive(Debug, Default)]
pub struct KeywordModeration;

#[async_trait]
impl Moderation for KeywordModeration {
    async fn check(&self, text: &str) -> Result<bool, RemoteServiceError> {
        Ok(text.contains("forbidden"))
    }
}

pub fn chat_service(assistant: &Arc<FakeAssistant>) -> Arc<ChatService> {
    Arc::new(ChatService::new(
        Arc::clone(assistant) as Arc<dyn AssistantService>,
        Arc::new(KeywordModeration),
        "asst_test",
        GREETING,
    ))
}

pub fn run_created(run_id: &str) -> RunEvent {
    RunEvent::RunCreated {
        run_id: run_id.to_string(),
    }
}

pub fn message_created() -> RunEvent {
    RunEvent::MessageCreated {
        message_id: "msg_1".to_string(),
    }
}

pub fn text_delta(text: &str) -> RunEvent {
    RunEvent::MessageDelta {
        message_id: "msg_1".to_string(),
        blocks: vec![DeltaBlock::Text(text.to_string())],
    }
}

pub fn code_step(code: &str, logs: &str, image: &str) -> Vec<RunEvent> {
    vec![
        RunEvent::StepCreated {
            step_id: "step_1".to_string(),
            kind: StepKind::ToolCalls,
        },
        RunEvent::StepDelta {
            step_id: "step_1".to_string(),
            tool_calls: vec![ToolCallDelta {
                index: 0,
                id: Some("call_1".to_string()),
                kind: ToolKind::CodeInterpreter,
                code: Some(code.to_string()),
            }],
        },
        RunEvent::StepCompleted {
            step_id: "step_1".to_string(),
            kind: StepKind::ToolCalls,
            tool_calls: vec![ToolCallDetails {
                index: 0,
                id: Some("call_1".to_string()),
                kind: ToolKind::CodeInterpreter,
                input: Some(code.to_string()),
                outputs: vec![
                    ToolOutput::Logs(logs.to_string()),
                    ToolOutput::Image {
                        file_id: image.to_string(),
                    },
                ],
            }],
        },
    ]
}

/// A completed code interpreter step that produced `file_ids` as images.
pub fn image_step(file_ids: &[&str]) -> RunEvent {
    RunEvent::StepCompleted {
        step_id: "step_img".to_string(),
        kind: StepKind::ToolCalls,
        tool_calls: vec![ToolCallDetails {
            index: 0,
            id: Some("call_img".to_string()),
            kind: ToolKind::CodeInterpreter,
            input: Some("plot()".to_string()),
            outputs: file_ids
                .iter()
                .map(|id| ToolOutput::Image {
                    file_id: (*id).to_string(),
                })
                .collect(),
        }],
    }
}
