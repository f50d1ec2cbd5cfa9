use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// One message in a conversation.
///
/// `hidden` turns are instructions for the completion service (topic pivots);
/// they travel with the transcript but are never displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            hidden: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn instruction(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            hidden: true,
        }
    }

    /// Whether the turn belongs on the chat screen.
    pub fn is_visible(&self) -> bool {
        self.role != Role::System && !self.hidden
    }
}

/// Append-only, ordered conversation history.
///
/// At most one `system` turn exists and, when present, it is the first element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a transcript from stored turns, dropping any `system` turn that is
    /// not at index 0.
    pub fn from_turns(turns: Vec<Turn>) -> Self {
        let mut kept = Vec::with_capacity(turns.len());
        for (index, turn) in turns.into_iter().enumerate() {
            if turn.role == Role::System && index != 0 {
                warn!(index, "Dropping misplaced system turn from stored transcript");
                continue;
            }
            kept.push(turn);
        }
        Self { turns: kept }
    }

    /// Parses a stored `transcript_json` value. Blank or malformed input yields
    /// an empty transcript rather than an error.
    pub fn from_json_lenient(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::new();
        }
        match serde_json::from_str::<Vec<Turn>>(raw) {
            Ok(turns) => Self::from_turns(turns),
            Err(e) => {
                warn!(error = %e, "Stored transcript is malformed; starting from an empty transcript");
                Self::new()
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.turns)
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn system_instruction(&self) -> Option<&str> {
        self.turns
            .first()
            .filter(|t| t.role == Role::System)
            .map(|t| t.content.as_str())
    }

    /// Installs the instruction as the leading system turn, replacing an
    /// existing one in place.
    pub fn set_system(&mut self, instruction: impl Into<String>) {
        let turn = Turn::system(instruction);
        match self.turns.first_mut() {
            Some(first) if first.role == Role::System => *first = turn,
            _ => self.turns.insert(0, turn),
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::assistant(content));
    }

    pub fn push_instruction(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::instruction(content));
    }

    pub fn visible(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter().filter(|t| t.is_visible())
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
