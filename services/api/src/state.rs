//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the session manager and service clients.

use crate::config::Config;
use coach_core::{
    conversation::LoopSettings,
    llm_client::{CompletionClient, SpeechSynthesizer, Transcriber},
    session::SessionManager,
};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
    pub completion: Arc<dyn CompletionClient>,
    /// Absent when no audio-capable provider is configured.
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    pub loop_settings: LoopSettings,
    pub login_reveal_reason: bool,
}

impl AppState {
    pub fn from_config(
        config: &Config,
        sessions: SessionManager,
        completion: Arc<dyn CompletionClient>,
        transcriber: Option<Arc<dyn Transcriber>>,
        synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    ) -> Self {
        Self {
            sessions,
            completion,
            transcriber,
            synthesizer,
            loop_settings: config.loop_settings(),
            login_reveal_reason: config.login_reveal_reason,
        }
    }
}
