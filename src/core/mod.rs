pub mod chat_stream;
pub mod config;
pub mod error;
pub mod language;
pub mod transcript;
