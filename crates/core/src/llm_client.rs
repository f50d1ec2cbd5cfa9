use crate::{
    error::{CoachError, CoachResult, CompletionFailure},
    transcript::{Role, Turn},
};
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        AudioInput, ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateSpeechRequestArgs, CreateTranscriptionRequestArgs,
        SpeechModel, Voice,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;

pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_VOICE: &str = "alloy";
const TRANSCRIPTION_MODEL: &str = "whisper-1";

/// A lazy sequence of reply fragments, in generation order.
pub type TextStream = Pin<Box<dyn Stream<Item = CoachResult<String>> + Send>>;

/// Model configuration sent with every completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionSettings {
    pub model: String,
    pub temperature: f32,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// Streams a reply for an ordered list of turns.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn stream_reply(&self, turns: &[Turn], settings: &CompletionSettings) -> CoachResult<TextStream>;
}

/// Speech-to-text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribes a WAV recording.
    async fn transcribe(&self, audio: Bytes) -> CoachResult<String>;
}

/// Text-to-speech.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: String, voice: String) -> CoachResult<Bytes>;
}

/// Classifies provider errors for the user-facing notice and retry decisions.
pub fn classify(err: &OpenAIError) -> CompletionFailure {
    match err {
        OpenAIError::Reqwest(_) => CompletionFailure::Network,
        OpenAIError::ApiError(api) => {
            let message = api.message.to_lowercase();
            if message.contains("rate limit") || message.contains("quota") {
                CompletionFailure::RateLimit
            } else if message.contains("api key") || message.contains("unauthorized") {
                CompletionFailure::Auth
            } else if message.contains("server") || message.contains("overloaded") {
                CompletionFailure::ServerError
            } else {
                CompletionFailure::InvalidRequest
            }
        }
        OpenAIError::InvalidArgument(_) => CompletionFailure::InvalidRequest,
        _ => CompletionFailure::Unknown,
    }
}

fn completion_error(err: OpenAIError) -> CoachError {
    CoachError::completion(classify(&err), err.to_string())
}

/// Maps transcript turns to chat messages. Hidden instruction turns are sent
/// as user messages.
pub fn to_chat_messages(turns: &[Turn]) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
    turns
        .iter()
        .map(|turn| {
            Ok(match turn.role {
                Role::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(turn.content.clone())
                    .build()?
                    .into(),
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(turn.content.clone())
                    .build()?
                    .into(),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(turn.content.clone())
                    .build()?
                    .into(),
            })
        })
        .collect()
}

fn voice_from(selector: &str) -> Voice {
    match selector.to_lowercase().as_str() {
        "echo" => Voice::Echo,
        "fable" => Voice::Fable,
        "onyx" => Voice::Onyx,
        "nova" => Voice::Nova,
        "shimmer" => Voice::Shimmer,
        _ => Voice::Alloy,
    }
}

/// Completion, transcription and speech over any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            client: Client::with_config(config),
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAICompatibleClient {
    async fn stream_reply(&self, turns: &[Turn], settings: &CompletionSettings) -> CoachResult<TextStream> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&settings.model)
            .messages(to_chat_messages(turns).map_err(completion_error)?)
            .temperature(settings.temperature)
            .stream(true)
            .build()
            .map_err(completion_error)?;

        let stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(completion_error)?;

        Ok(Box::pin(stream.filter_map(|result| async move {
            match result {
                Ok(response) => response
                    .choices
                    .first()
                    .and_then(|choice| choice.delta.content.clone())
                    .filter(|content| !content.is_empty())
                    .map(Ok),
                Err(e) => Some(Err(completion_error(e))),
            }
        })))
    }
}

#[async_trait]
impl Transcriber for OpenAICompatibleClient {
    async fn transcribe(&self, audio: Bytes) -> CoachResult<String> {
        let request = CreateTranscriptionRequestArgs::default()
            .file(AudioInput::from_bytes("voice.wav".to_string(), audio))
            .model(TRANSCRIPTION_MODEL)
            .build()
            .map_err(|e| CoachError::TranscriptionFailed(e.to_string()))?;
        let response = self
            .client
            .audio()
            .transcribe(request)
            .await
            .map_err(|e| CoachError::TranscriptionFailed(e.to_string()))?;
        Ok(response.text)
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAICompatibleClient {
    async fn synthesize(&self, text: String, voice: String) -> CoachResult<Bytes> {
        let request = CreateSpeechRequestArgs::default()
            .input(text)
            .voice(voice_from(&voice))
            .model(SpeechModel::Tts1)
            .build()
            .map_err(|e| CoachError::SynthesisFailed(e.to_string()))?;
        let response = self
            .client
            .audio()
            .speech(request)
            .await
            .map_err(|e| CoachError::SynthesisFailed(e.to_string()))?;
        Ok(response.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turns_map_to_chat_messages_in_order() {
        let turns = vec![
            Turn::system("rules"),
            Turn::user("hi"),
            Turn::assistant("hello"),
            Turn::instruction("switch to writing"),
        ];
        let messages = to_chat_messages(&turns).unwrap();
        assert_eq!(messages.len(), 4);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[1], ChatCompletionRequestMessage::User(_)));
        assert!(matches!(messages[2], ChatCompletionRequestMessage::Assistant(_)));
        assert!(matches!(messages[3], ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    fn test_default_settings_match_coach() {
        let settings = CompletionSettings::default();
        assert_eq!(settings.model, "gpt-4o");
        assert!((settings.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_voice_selector_falls_back_to_alloy() {
        assert!(matches!(voice_from("NOVA"), Voice::Nova));
        assert!(matches!(voice_from("unknown"), Voice::Alloy));
    }

    #[test]
    fn test_invalid_argument_is_not_retryable() {
        let kind = classify(&OpenAIError::InvalidArgument("bad".into()));
        assert_eq!(kind, CompletionFailure::InvalidRequest);
        assert!(!kind.is_retryable());
    }
}
