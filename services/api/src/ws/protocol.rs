//! Defines the WebSocket message protocol between the browser client and the API server.

use crate::models::ProfileView;
use coach_core::{
    conversation::{Notice, NoticeLevel},
    transcript::Turn,
};
use serde::{Deserialize, Serialize};

/// Messages sent from the client (browser) to the server. Not `Debug`: `Init`
/// carries a password.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Logs in. This must be the first message.
    Init { identifier: String, password: String },
    /// A typed answer.
    UserMessage { text: String },
    /// A spoken answer: base64 PCM16 mono at `sample_rate`.
    Voice { audio: String, sample_rate: u32 },
    /// Switches the practice focus (Speaking, Writing, Vocabulary, ...).
    SetTopic { topic: String },
    /// Toggles spoken replies.
    SetVoiceEnabled { enabled: bool },
    /// Asks again for a reply that failed or was cancelled.
    Retry,
    /// Stops the reply being generated.
    Cancel,
    /// Starts the conversation over.
    Reset,
    Logout,
}

/// One visible transcript entry.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

impl From<&Turn> for HistoryEntry {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role.to_string(),
            content: turn.content.clone(),
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl From<NoticeLevel> for Level {
    fn from(level: NoticeLevel) -> Self {
        match level {
            NoticeLevel::Info => Level::Info,
            NoticeLevel::Warning => Level::Warning,
            NoticeLevel::Error => Level::Error,
        }
    }
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Login accepted; carries the visible conversation so far.
    Initialized {
        profile: ProfileView,
        history: Vec<HistoryEntry>,
        voice_available: bool,
    },
    /// Signals the beginning of a streamed reply from the coach.
    ResponseStart,
    /// A chunk of a streamed reply.
    ResponseChunk { chunk: String },
    /// Signals the end of a streamed reply.
    ResponseEnd { text: String },
    /// Chunks sent since `response_start` belong to a dropped reply.
    ResponseDiscarded,
    /// What the coach heard in a voice message.
    Transcription { text: String },
    /// Spoken reply, base64 MP3.
    AudioChunk { data: String },
    TopicChanged { topic: String },
    /// A recoverable problem the user should know about.
    Notice { level: Level, message: String },
    /// Reports a fatal error to the client.
    Error { message: String },
    LoggedOut,
}

impl From<Notice> for ServerMessage {
    fn from(notice: Notice) -> Self {
        ServerMessage::Notice {
            level: notice.level.into(),
            message: notice.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_messages_parse() {
        let init: ClientMessage =
            serde_json::from_str(r#"{"type":"init","identifier":"+7000","password":"abc"}"#).unwrap();
        assert!(matches!(init, ClientMessage::Init { identifier, .. } if identifier == "+7000"));

        let voice: ClientMessage =
            serde_json::from_str(r#"{"type":"voice","audio":"AAA=","sample_rate":48000}"#).unwrap();
        assert!(matches!(voice, ClientMessage::Voice { sample_rate: 48000, .. }));

        let cancel: ClientMessage = serde_json::from_str(r#"{"type":"cancel"}"#).unwrap();
        assert!(matches!(cancel, ClientMessage::Cancel));

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"shout"}"#).is_err());
    }

    #[test]
    fn test_server_messages_are_tagged() {
        let value = serde_json::to_value(ServerMessage::ResponseChunk { chunk: "Hi".into() }).unwrap();
        assert_eq!(value, json!({"type": "response_chunk", "chunk": "Hi"}));

        let value = serde_json::to_value(ServerMessage::from(Notice::warning("saved later"))).unwrap();
        assert_eq!(
            value,
            json!({"type": "notice", "level": "warning", "message": "saved later"})
        );

        let value = serde_json::to_value(ServerMessage::ResponseDiscarded).unwrap();
        assert_eq!(value, json!({"type": "response_discarded"}));
    }

    #[test]
    fn test_history_entry_from_turn() {
        let entry = HistoryEntry::from(&Turn::assistant("Brilliant!"));
        assert_eq!(entry.role, "assistant");
        assert_eq!(entry.content, "Brilliant!");
    }
}
