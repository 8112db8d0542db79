//! Per-browser chat sessions.
//!
//! A session pairs a remote conversation thread with the local transcript
//! rendered for that browser page. Sessions are identified by UUID and live
//! in memory only.
//!
//! # Architecture
//!
//! - [`ChatSession`]: mutable conversation state, guarded by an async mutex
//!   that is held for the whole of a streamed reply
//! - [`SessionHandle`]: cheap, cloneable reference to one session
//! - [`SessionStore`]: thread-safe map of all active sessions
//!
//! # Example
//!
//! ```rust
//! use guru_chat::session::SessionStore;
//! use guru_chat::transcript::Transcript;
//!
//! let store = SessionStore::new();
//! let handle = store.create("thread_abc", Transcript::seeded("Hi!"));
//!
//! assert_eq!(store.get(handle.id()).unwrap().thread_id(), "thread_abc");
//! ```

mod store;

pub use store::{ChatSession, SessionHandle, SessionStore};
