//! Events pushed to the browser while a reply streams.
//!
//! Each [`UiEvent`] becomes one SSE message whose `event:` name is
//! [`UiEvent::event_name`] and whose data is the JSON payload. The browser
//! script swaps `html` into the slot addressed by `turn` and `index`.
//!
//! # Example
//!
//! ```rust
//! use guru_chat::ui_event::UiEvent;
//!
//! let event = UiEvent::Done { committed: true };
//! assert_eq!(event.event_name(), "done");
//! assert_eq!(event.payload(), r#"{"committed":true}"#);
//! ```

use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum UiEvent {
    /// Rendered HTML for one item of the assistant turn being built.
    Item {
        turn: usize,
        index: usize,
        html: String,
    },

    /// Transient notice; the conversation is unchanged.
    Warning { message: String },

    /// The reply failed. Content streamed so far is kept.
    Error { message: String },

    /// The reply ended. `committed` is false when nothing was produced.
    Done { committed: bool },
}

impl UiEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Item { .. } => "item",
            Self::Warning { .. } => "warning",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    /// JSON data line for the SSE message.
    pub fn payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "message": e.to_string() }).to_string()
        })
    }
}
