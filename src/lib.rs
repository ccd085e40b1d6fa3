//! Plausch is a terminal chat companion that talks to remote LLM APIs.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns conversational state, language profiles, runtime
//!   configuration, and the streaming completion client.
//! - [`ui`] renders the scrollback interface and runs the interactive event
//!   loop that drives user input and display updates.
//! - [`api`] defines the chat payloads exchanged with the completion
//!   endpoint, for both event-stream and whole-body responses.
//!
//! The binary entrypoint (`src/main.rs`) parses CLI arguments and dispatches
//! into [`ui::chat_loop`] for interactive sessions.

pub mod api;
pub mod core;
pub mod ui;
pub mod utils;
