//! Folds a run's event stream into the open assistant turn.
//!
//! The reducer owns the [`OpenTurn`] for the duration of a run. Each call to
//! [`EventReducer::apply`] handles exactly one [`RunEvent`] and reports which
//! items it touched so the caller can re-render just those. Events are applied
//! strictly in arrival order; text fragments are concatenated, never
//! reordered.
//!
//! # Example
//!
//! ```rust
//! use guru_chat::events::{DeltaBlock, RunEvent};
//! use guru_chat::reducer::EventReducer;
//! use guru_chat::transcript::Transcript;
//!
//! let mut transcript = Transcript::seeded("Hi!");
//! let mut reducer = EventReducer::begin(&mut transcript);
//!
//! reducer.apply(&RunEvent::MessageCreated { message_id: "m".into() });
//! reducer.apply(&RunEvent::MessageDelta {
//!     message_id: "m".into(),
//!     blocks: vec![DeltaBlock::Text("Hello".into())],
//! });
//! assert!(reducer.finalize(&mut transcript));
//! assert_eq!(transcript.len(), 2);
//! ```

use std::collections::HashMap;

use crate::events::{
    DeltaBlock, RunEvent, StepKind, ToolCallDelta, ToolCallDetails, ToolKind, ToolOutput,
};
use crate::render::image_markup;
use crate::transcript::{ContentItem, OpenTurn, Transcript, Turn};

/// Items created for one tool call, keyed by `(step id, call index)`.
#[derive(Debug, Default)]
struct ToolCallSlots {
    input: Option<usize>,
    output: Option<usize>,
    images: Option<usize>,
}

/// Stateful event-to-turn reducer for a single run.
#[derive(Debug)]
pub struct EventReducer {
    open: Option<OpenTurn>,
    state: ReduceState,
    run_id: Option<String>,
    /// Session that owns generated images, for the proxy URL.
    session_id: Option<String>,
}

/// Bookkeeping that outlives single events but not the run.
#[derive(Debug, Default)]
struct ReduceState {
    /// Text item receiving message deltas.
    active_text: Option<usize>,
    tool_calls: HashMap<(String, usize), ToolCallSlots>,
}

impl EventReducer {
    pub fn new(open: OpenTurn) -> Self {
        Self {
            open: Some(open),
            state: ReduceState::default(),
            run_id: None,
            session_id: None,
        }
    }

    /// Point image markup at the file proxy of `session_id`.
    #[must_use]
    pub fn for_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Open a new assistant turn on `transcript` and start reducing into it.
    ///
    /// # Panics
    ///
    /// Panics if the transcript already has an open turn.
    pub fn begin(transcript: &mut Transcript) -> Self {
        Self::new(transcript.begin_assistant_turn())
    }

    /// The turn being built, or `None` once finalized.
    pub fn turn(&self) -> Option<&Turn> {
        self.open.as_ref().map(OpenTurn::turn)
    }

    pub fn is_finalized(&self) -> bool {
        self.open.is_none()
    }

    /// Id of the remote run, once `RunCreated` has been seen.
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Apply one event. Returns the indices of the items it created or
    /// changed, in ascending order.
    pub fn apply(&mut self, event: &RunEvent) -> Vec<usize> {
        if let RunEvent::RunCreated { run_id } = event {
            self.run_id = Some(run_id.clone());
        }
        let Some(open) = self.open.as_mut() else {
            tracing::trace!(event = event.kind(), "Event after finalize ignored");
            return Vec::new();
        };
        let items = open.items_mut();
        let state = &mut self.state;

        match event {
            RunEvent::MessageCreated { .. } => {
                let index = push(items, ContentItem::text(""));
                state.active_text = Some(index);
                vec![index]
            }
            RunEvent::MessageDelta { blocks, .. } => state.append_text(items, blocks),
            RunEvent::StepCreated { kind, .. } => {
                if *kind == StepKind::ToolCalls {
                    state.active_text = None;
                }
                Vec::new()
            }
            RunEvent::StepDelta {
                step_id,
                tool_calls,
            } => state.append_code(items, step_id, tool_calls),
            RunEvent::StepCompleted {
                step_id,
                tool_calls,
                ..
            } => state.complete_step(items, step_id, tool_calls, self.session_id.as_deref()),
            RunEvent::RunCreated { .. }
            | RunEvent::RunCompleted
            | RunEvent::RunFailed { .. }
            | RunEvent::Error { .. }
            | RunEvent::Done => Vec::new(),
            RunEvent::Unrecognized { event } => {
                tracing::trace!(event = %event, "Unrecognized run event ignored");
                Vec::new()
            }
        }
    }

    /// Commit the turn to `transcript`.
    ///
    /// Returns `true` if a turn was appended. A turn that never received any
    /// item is released without being appended. Calling this again after the
    /// first call does nothing and returns `false`.
    pub fn finalize(&mut self, transcript: &mut Transcript) -> bool {
        let Some(open) = self.open.take() else {
            return false;
        };
        self.state = ReduceState::default();

        if open.turn().is_empty() {
            transcript.discard(open);
            false
        } else {
            transcript.commit(open);
            true
        }
    }
}

fn push(items: &mut Vec<ContentItem>, item: ContentItem) -> usize {
    items.push(item);
    items.len() - 1
}

fn sorted(mut touched: Vec<usize>) -> Vec<usize> {
    touched.sort_unstable();
    touched.dedup();
    touched
}

impl ReduceState {
    fn append_text(&mut self, items: &mut Vec<ContentItem>, blocks: &[DeltaBlock]) -> Vec<usize> {
        let fragments: Vec<&str> = blocks
            .iter()
            .filter_map(|b| match b {
                DeltaBlock::Text(text) => Some(text.as_str()),
                DeltaBlock::Other => None,
            })
            .collect();
        if fragments.is_empty() {
            return Vec::new();
        }

        let index = match self.active_text {
            Some(index) => index,
            None => {
                tracing::debug!("Message delta without a started message; opening a text item");
                let index = push(items, ContentItem::text(""));
                self.active_text = Some(index);
                index
            }
        };

        if let Some(ContentItem::Text { content }) = items.get_mut(index) {
            for fragment in fragments {
                content.push_str(fragment);
            }
        }
        vec![index]
    }

    fn append_code(
        &mut self,
        items: &mut Vec<ContentItem>,
        step_id: &str,
        calls: &[ToolCallDelta],
    ) -> Vec<usize> {
        let mut touched = Vec::new();
        for call in calls {
            if call.kind != ToolKind::CodeInterpreter {
                continue;
            }
            let Some(fragment) = call.code.as_deref() else {
                continue;
            };
            self.active_text = None;

            let slots = self
                .tool_calls
                .entry((step_id.to_string(), call.index))
                .or_default();
            let index = *slots.input.get_or_insert_with(|| {
                push(
                    items,
                    ContentItem::CodeInput {
                        content: String::new(),
                    },
                )
            });

            if let Some(ContentItem::CodeInput { content }) = items.get_mut(index) {
                content.push_str(fragment);
            }
            touched.push(index);
        }
        sorted(touched)
    }

    fn complete_step(
        &mut self,
        items: &mut Vec<ContentItem>,
        step_id: &str,
        calls: &[ToolCallDetails],
        session_id: Option<&str>,
    ) -> Vec<usize> {
        let mut touched = Vec::new();
        for call in calls {
            if call.kind != ToolKind::CodeInterpreter {
                continue;
            }
            self.active_text = None;
            let slots = self
                .tool_calls
                .entry((step_id.to_string(), call.index))
                .or_default();

            // Input streamed as deltas wins; the completed input only fills in
            // a call whose deltas never arrived.
            if slots.input.is_none()
                && let Some(input) = call.input.as_deref().filter(|s| !s.is_empty())
            {
                let index = push(
                    items,
                    ContentItem::CodeInput {
                        content: input.to_string(),
                    },
                );
                slots.input = Some(index);
                touched.push(index);
            }

            let logs: Vec<&str> = call
                .outputs
                .iter()
                .filter_map(|o| match o {
                    ToolOutput::Logs(text) => Some(text.as_str()),
                    ToolOutput::Image { .. } => None,
                })
                .collect();
            if !logs.is_empty() && slots.output.is_none() {
                let index = push(
                    items,
                    ContentItem::CodeOutput {
                        content: logs.concat(),
                    },
                );
                slots.output = Some(index);
                touched.push(index);
            }

            for output in &call.outputs {
                let ToolOutput::Image { file_id } = output else {
                    continue;
                };
                let markup = image_markup(file_id, session_id);
                let index = match slots.images {
                    Some(index) => {
                        if let Some(ContentItem::Image { content }) = items.get_mut(index) {
                            content.push(markup);
                        }
                        index
                    }
                    None => {
                        let index = push(
                            items,
                            ContentItem::Image {
                                content: vec![markup],
                            },
                        );
                        slots.images = Some(index);
                        index
                    }
                };
                touched.push(index);
            }
        }
        sorted(touched)
    }
}
