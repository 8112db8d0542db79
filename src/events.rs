//! Run events streamed by the assistant service.
//!
//! The remote run stream is a sequence of SSE frames, each with an event name
//! (`thread.message.delta`, `thread.run.step.completed`, ...) and a JSON
//! payload. [`RunEvent::decode`] folds every frame into the closed
//! [`RunEvent`] enum. Frames this module does not model, and frames whose
//! payload does not match the expected shape, become
//! [`RunEvent::Unrecognized`] so a new remote event kind never stops a stream.
//!
//! # Example
//!
//! ```rust
//! use guru_chat::events::{DeltaBlock, RunEvent};
//!
//! let event = RunEvent::decode(
//!     "thread.message.delta",
//!     r#"{"id":"msg_1","delta":{"content":[{"index":0,"type":"text","text":{"value":"Hi"}}]}}"#,
//! );
//! assert_eq!(
//!     event,
//!     RunEvent::MessageDelta {
//!         message_id: "msg_1".to_string(),
//!         blocks: vec![DeltaBlock::Text("Hi".to_string())],
//!     }
//! );
//! ```

use serde::Deserialize;
use serde::de::DeserializeOwned;

/// One unit of the remote run stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    // ─────────────────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────────────────
    /// The assistant started a new message.
    MessageCreated { message_id: String },

    /// Incremental content for the current message.
    MessageDelta {
        message_id: String,
        blocks: Vec<DeltaBlock>,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Run steps
    // ─────────────────────────────────────────────────────────────────────
    StepCreated { step_id: String, kind: StepKind },

    /// Incremental tool call data for a step.
    StepDelta {
        step_id: String,
        tool_calls: Vec<ToolCallDelta>,
    },

    /// A step finished; tool calls carry their final input and outputs.
    StepCompleted {
        step_id: String,
        kind: StepKind,
        tool_calls: Vec<ToolCallDetails>,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Run lifecycle
    // ─────────────────────────────────────────────────────────────────────
    /// The run was created; its id is needed to cancel it.
    RunCreated { run_id: String },

    RunCompleted,

    /// The run ended without completing (failed, cancelled, expired, ...).
    RunFailed { message: String },

    /// The service reported a stream-level error.
    Error { message: String },

    /// End-of-stream sentinel (`data: [DONE]`).
    Done,

    /// Any event kind this client does not model.
    Unrecognized { event: String },
}

/// A content block inside a message delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaBlock {
    Text(String),
    /// Image files, annotations and other non-text blocks.
    Other,
}

/// Kind of a run step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    MessageCreation,
    ToolCalls,
    Other,
}

/// Kind of a tool call within a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    CodeInterpreter,
    Other,
}

/// Streamed fragment of one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallDelta {
    /// Position of the call within its step.
    pub index: usize,
    pub id: Option<String>,
    pub kind: ToolKind,
    /// Code fragment to append to the call's input.
    pub code: Option<String>,
}

/// Final state of one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallDetails {
    /// Position of the call within its step.
    pub index: usize,
    pub id: Option<String>,
    pub kind: ToolKind,
    pub input: Option<String>,
    pub outputs: Vec<ToolOutput>,
}

/// An output produced by a code interpreter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutput {
    Logs(String),
    Image { file_id: String },
}

impl RunEvent {
    /// Decode one SSE frame into a [`RunEvent`].
    pub fn decode(event: &str, data: &str) -> Self {
        match event {
            "thread.message.created" => parse::<WireMessage>(event, data)
                .map_or_else(unrecognized(event), |m| Self::MessageCreated {
                    message_id: m.id,
                }),
            "thread.message.delta" => parse::<WireMessageDelta>(event, data)
                .map_or_else(unrecognized(event), WireMessageDelta::into_event),
            "thread.run.step.created" => parse::<WireStep>(event, data)
                .map_or_else(unrecognized(event), |s| Self::StepCreated {
                    kind: s.step_kind(),
                    step_id: s.id,
                }),
            "thread.run.step.delta" => parse::<WireStepDelta>(event, data)
                .map_or_else(unrecognized(event), WireStepDelta::into_event),
            "thread.run.step.completed" => parse::<WireStep>(event, data)
                .map_or_else(unrecognized(event), WireStep::into_completed),
            "thread.run.created" => parse::<WireRun>(event, data)
                .map_or_else(unrecognized(event), |r| Self::RunCreated { run_id: r.id }),
            "thread.run.completed" => Self::RunCompleted,
            "thread.run.failed"
            | "thread.run.cancelled"
            | "thread.run.expired"
            | "thread.run.incomplete" => Self::RunFailed {
                message: run_failure_message(event, data),
            },
            "error" => Self::Error {
                message: error_message(data),
            },
            "done" => Self::Done,
            _ if data.trim() == "[DONE]" => Self::Done,
            other => Self::Unrecognized {
                event: other.to_string(),
            },
        }
    }

    /// Stable name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageCreated { .. } => "message.created",
            Self::MessageDelta { .. } => "message.delta",
            Self::StepCreated { .. } => "step.created",
            Self::StepDelta { .. } => "step.delta",
            Self::StepCompleted { .. } => "step.completed",
            Self::RunCreated { .. } => "run.created",
            Self::RunCompleted => "run.completed",
            Self::RunFailed { .. } => "run.failed",
            Self::Error { .. } => "error",
            Self::Done => "done",
            Self::Unrecognized { .. } => "unrecognized",
        }
    }

    /// Ids of the images a completed code interpreter step produced.
    pub fn image_file_ids(&self) -> impl Iterator<Item = &str> {
        let calls: &[ToolCallDetails] = match self {
            Self::StepCompleted { tool_calls, .. } => tool_calls,
            _ => &[],
        };
        calls
            .iter()
            .flat_map(|call| &call.outputs)
            .filter_map(|output| match output {
                ToolOutput::Image { file_id } => Some(file_id.as_str()),
                ToolOutput::Logs(_) => None,
            })
    }

    /// Whether this event marks the end of the run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RunCompleted | Self::RunFailed { .. } | Self::Error { .. } | Self::Done
        )
    }
}

fn parse<T: DeserializeOwned>(event: &str, data: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(data).inspect_err(|e| {
        tracing::warn!(event = %event, error = %e, "Malformed run event payload");
    })
}

fn unrecognized(event: &str) -> impl FnOnce(serde_json::Error) -> RunEvent + '_ {
    move |_| RunEvent::Unrecognized {
        event: event.to_string(),
    }
}

fn run_failure_message(event: &str, data: &str) -> String {
    let status = event.trim_start_matches("thread.run.");
    serde_json::from_str::<serde_json::Value>(data)
        .ok()
        .and_then(|v| {
            v.get("last_error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| format!("Run {status}"))
}

fn error_message(data: &str) -> String {
    let Ok(v) = serde_json::from_str::<serde_json::Value>(data) else {
        return data.to_string();
    };
    v.get("error")
        .unwrap_or(&v)
        .get("message")
        .and_then(|m| m.as_str())
        .map_or_else(|| data.to_string(), ToString::to_string)
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct WireMessage {
    id: String,
}

#[derive(Deserialize)]
struct WireRun {
    id: String,
}

#[derive(Deserialize)]
struct WireMessageDelta {
    id: String,
    delta: WireMessageDeltaBody,
}

#[derive(Deserialize)]
struct WireMessageDeltaBody {
    #[serde(default)]
    content: Vec<WireContentDelta>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireContentDelta {
    Text {
        #[serde(default)]
        text: Option<WireTextDelta>,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct WireTextDelta {
    #[serde(default)]
    value: Option<String>,
}

impl WireMessageDelta {
    fn into_event(self) -> RunEvent {
        let blocks = self
            .delta
            .content
            .into_iter()
            .map(|block| match block {
                WireContentDelta::Text { text } => {
                    DeltaBlock::Text(text.and_then(|t| t.value).unwrap_or_default())
                }
                WireContentDelta::Other => DeltaBlock::Other,
            })
            .collect();
        RunEvent::MessageDelta {
            message_id: self.id,
            blocks,
        }
    }
}

#[derive(Deserialize)]
struct WireStep {
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    step_details: Option<WireStepDetails>,
}

impl WireStep {
    fn step_kind(&self) -> StepKind {
        match self.kind.as_str() {
            "message_creation" => StepKind::MessageCreation,
            "tool_calls" => StepKind::ToolCalls,
            _ => StepKind::Other,
        }
    }
}

#[derive(Deserialize)]
struct WireStepDelta {
    id: String,
    delta: WireStepDeltaBody,
}

#[derive(Deserialize)]
struct WireStepDeltaBody {
    #[serde(default)]
    step_details: Option<WireStepDetails>,
}

#[derive(Deserialize)]
struct WireStepDetails {
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    code_interpreter: Option<WireCodeInterpreter>,
}

impl WireToolCall {
    fn tool_kind(&self) -> ToolKind {
        match self.kind.as_deref() {
            Some("code_interpreter") => ToolKind::CodeInterpreter,
            // Deltas after the first may omit the type but still carry code.
            None if self.code_interpreter.is_some() => ToolKind::CodeInterpreter,
            _ => ToolKind::Other,
        }
    }
}

#[derive(Deserialize)]
struct WireCodeInterpreter {
    #[serde(default)]
    input: Option<String>,
    #[serde(default)]
    outputs: Vec<WireCodeOutput>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireCodeOutput {
    Logs {
        #[serde(default)]
        logs: String,
    },
    Image {
        image: WireImage,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct WireImage {
    file_id: String,
}

impl WireStepDelta {
    fn into_event(self) -> RunEvent {
        let tool_calls = self
            .delta
            .step_details
            .map(|d| d.tool_calls)
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(position, call)| {
                let kind = call.tool_kind();
                ToolCallDelta {
                    index: call.index.unwrap_or(position),
                    id: call.id,
                    kind,
                    code: call.code_interpreter.and_then(|c| c.input),
                }
            })
            .collect();
        RunEvent::StepDelta {
            step_id: self.id,
            tool_calls,
        }
    }
}

impl WireStep {
    fn into_completed(self) -> RunEvent {
        let kind = self.step_kind();
        let tool_calls = self
            .step_details
            .map(|d| d.tool_calls)
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(position, call)| {
                let kind = call.tool_kind();
                let (input, outputs) = match call.code_interpreter {
                    Some(ci) => (ci.input, ci.outputs.into_iter().filter_map(into_output).collect()),
                    None => (None, Vec::new()),
                };
                ToolCallDetails {
                    index: call.index.unwrap_or(position),
                    id: call.id,
                    kind,
                    input,
                    outputs,
                }
            })
            .collect();
        RunEvent::StepCompleted {
            step_id: self.id,
            kind,
            tool_calls,
        }
    }
}

fn into_output(output: WireCodeOutput) -> Option<ToolOutput> {
    match output {
        WireCodeOutput::Logs { logs } => Some(ToolOutput::Logs(logs)),
        WireCodeOutput::Image { image } => Some(ToolOutput::Image {
            file_id: image.file_id,
        }),
        WireCodeOutput::Other => None,
    }
}
