//! WebSocket Chat Screen
//!
//! This module carries the live conversation with the coach over WebSockets.
//! It is structured into submodules for clarity:
//!
//! - `protocol`: Defines the JSON-based message format for client-server communication.
//! - `session`: Manages the WebSocket connection lifecycle, from login to logout.
//! - `sink`: Turns conversation loop output into outgoing protocol messages.

pub mod protocol;
pub mod session;
mod sink;

pub use session::ws_handler;
