//! Messenger bot REST API (chatrooms and direct messages)

pub mod chat;
pub mod client;

pub use client::MessengerClient;
