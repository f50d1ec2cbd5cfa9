//! Error taxonomy shared by every coach component.

use thiserror::Error;

/// Classification of completion failures, used to decide what the user is told
/// and whether a retry makes sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionFailure {
    /// Network issues - retryable
    Network,
    /// Rate limited (429) - retryable after a pause
    RateLimit,
    /// No response within the configured bound
    Timeout,
    /// Provider-side 5xx
    ServerError,
    /// Bad or missing API key - not retryable
    Auth,
    /// Rejected request - not retryable
    InvalidRequest,
    Unknown,
}

impl CompletionFailure {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network | Self::RateLimit | Self::Timeout | Self::ServerError
        )
    }
}

/// Every failure a coach operation can report.
#[derive(Debug, Error)]
pub enum CoachError {
    #[error("No profile registered for '{identifier}'")]
    NotFound { identifier: String },

    #[error("A profile for '{identifier}' already exists")]
    AlreadyExists { identifier: String },

    #[error("The password does not match")]
    BadCredential,

    #[error("Required field '{field}' is missing")]
    ValidationFailed { field: &'static str },

    #[error("Record store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Completion failed ({kind:?}): {message}")]
    CompletionFailed {
        kind: CompletionFailure,
        message: String,
    },

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("Speech synthesis failed: {0}")]
    SynthesisFailed(String),
}

impl CoachError {
    pub fn not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            identifier: identifier.into(),
        }
    }

    pub fn already_exists(identifier: impl Into<String>) -> Self {
        Self::AlreadyExists {
            identifier: identifier.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::StoreUnavailable(message.into())
    }

    pub fn completion(kind: CompletionFailure, message: impl Into<String>) -> Self {
        Self::CompletionFailed {
            kind,
            message: message.into(),
        }
    }

    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StoreUnavailable(_) => true,
            Self::CompletionFailed { kind, .. } => kind.is_retryable(),
            _ => false,
        }
    }

    /// Short user-facing text. Never contains credentials or provider internals.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound { .. } => "We couldn't find that phone number or handle.".to_string(),
            Self::AlreadyExists { .. } => "That phone number or handle is already registered.".to_string(),
            Self::BadCredential => "Wrong password, please try again.".to_string(),
            Self::ValidationFailed { field } => format!("Please fill in '{}'.", field),
            Self::StoreUnavailable(_) => {
                "Your progress could not be saved right now. We'll keep it in this session.".to_string()
            }
            Self::CompletionFailed {
                kind: CompletionFailure::RateLimit,
                ..
            } => "Alex is a bit busy right now. Please try again in a moment.".to_string(),
            Self::CompletionFailed {
                kind: CompletionFailure::Timeout,
                ..
            } => "Alex took too long to answer. Please try again.".to_string(),
            Self::CompletionFailed { .. } => {
                "Alex couldn't answer just now. Please try again.".to_string()
            }
            Self::TranscriptionFailed(_) => {
                "Sorry, I couldn't make out that recording. Try again or type your answer.".to_string()
            }
            Self::SynthesisFailed(_) => "Voice playback is unavailable for this reply.".to_string(),
        }
    }
}

pub type CoachResult<T> = std::result::Result<T, CoachError>;
