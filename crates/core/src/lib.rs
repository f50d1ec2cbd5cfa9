//! Core of the IELTS speaking and writing coach: profiles and their stored
//! transcripts, the coach's hidden instruction, and the turn-by-turn
//! conversation loop. Transport (HTTP, WebSocket, database) lives in the
//! service crates.

pub mod conversation;
pub mod credential;
pub mod error;
pub mod llm_client;
pub mod profile;
pub mod prompt;
pub mod retry;
pub mod session;
pub mod store;
pub mod transcript;

pub use conversation::{ConversationLoop, ConversationState, DisplaySink, LoopSettings, Notice, TurnOutcome};
pub use error::{CoachError, CoachResult};
pub use session::{Session, SessionManager};
