//! Snowboard Guru chat
//!
//! A browser chat front-end that relays messages to a hosted assistant
//! (`OpenAI` Assistants v2) and renders its streamed replies (text, code
//! interpreter input and output, generated images) as HTML.
//!
//! # Architecture
//!
//! - **Server**: Axum HTTP server; replies reach the browser over SSE
//! - **Reducer**: folds the remote run's event stream into one assistant turn
//! - **Renderer**: pure HTML projection of the transcript
//!
//! # Modules
//!
//! - [`transcript`]: turns and content items
//! - [`events`]: remote run events and their decoding
//! - [`reducer`]: event-to-turn reducer
//! - [`render`]: HTML rendering
//! - [`assistant`]: remote assistant and moderation services
//! - [`session`]: per-browser sessions
//! - [`chat`]: submission and reply streaming
//! - [`server`]: HTTP routes

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod assistant;
pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod reducer;
pub mod render;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod transcript;
pub mod ui_event;
