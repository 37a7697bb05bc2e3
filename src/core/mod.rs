//! Core conversation components
//!
//! The engine that runs a chat turn by turn, and the store that keeps chats between runs.

mod chat;
mod session;

pub use chat::{ChatError, ConversationEngine, EngineState, TurnOutcome};
pub use session::SessionStore;
