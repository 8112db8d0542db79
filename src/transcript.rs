//! Conversation transcript: turns and their typed content items.
//!
//! A [`Transcript`] is append-only for completed turns. The single in-progress
//! assistant turn lives outside of it as an [`OpenTurn`] until the run that
//! produces it is finalized.

use serde::{Deserialize, Serialize};

/// Author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single typed piece of rendered output.
///
/// `Text` is append-only. `CodeInput` and `CodeOutput` are set once per tool
/// call. `Image` holds opaque markup strings, one per generated image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text { content: String },
    CodeInput { content: String },
    CodeOutput { content: String },
    Image { content: Vec<String> },
    /// An item type this build does not know. Rendered as nothing.
    #[serde(other)]
    Unknown,
}

impl ContentItem {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    /// Text content of a `Text` item.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { content } => Some(content),
            _ => None,
        }
    }
}

/// One participant's contribution to the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub items: Vec<ContentItem>,
}

impl Turn {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            items: Vec::new(),
        }
    }

    /// A user turn holding a single text item.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            items: vec![ContentItem::text(text)],
        }
    }

    /// An assistant turn holding a single text item.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            items: vec![ContentItem::text(text)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The in-progress assistant turn.
///
/// Obtained from [`Transcript::begin_assistant_turn`] and handed back through
/// [`Transcript::commit`] or [`Transcript::discard`]. Not `Clone`: there is
/// exactly one handle per open turn.
#[derive(Debug)]
pub struct OpenTurn {
    turn: Turn,
}

impl OpenTurn {
    pub fn turn(&self) -> &Turn {
        &self.turn
    }

    pub(crate) fn items_mut(&mut self) -> &mut Vec<ContentItem> {
        &mut self.turn.items
    }
}

/// Ordered sequence of completed turns for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    turns: Vec<Turn>,
    #[serde(skip)]
    open: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transcript holding only the assistant greeting.
    pub fn seeded(greeting: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::assistant(greeting)],
            open: false,
        }
    }

    /// Add a completed turn to the end.
    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// All completed turns, oldest first.
    pub fn current(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn has_open_turn(&self) -> bool {
        self.open
    }

    /// Open a new, empty assistant turn.
    ///
    /// # Panics
    ///
    /// Panics if an assistant turn is already open. Only one run may write to
    /// a transcript at a time.
    pub fn begin_assistant_turn(&mut self) -> OpenTurn {
        assert!(
            !self.open,
            "an assistant turn is already open for this transcript"
        );
        self.open = true;
        OpenTurn {
            turn: Turn::new(Role::Assistant),
        }
    }

    /// Append the open turn and release it.
    pub fn commit(&mut self, open: OpenTurn) {
        debug_assert!(self.open, "committing a turn that was never opened");
        self.open = false;
        self.turns.push(open.turn);
    }

    /// Release the open turn without appending it.
    pub fn discard(&mut self, open: OpenTurn) {
        debug_assert!(self.open, "discarding a turn that was never opened");
        self.open = false;
        drop(open);
    }
}
