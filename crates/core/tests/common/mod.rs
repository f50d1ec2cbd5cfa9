use async_trait::async_trait;
use bytes::Bytes;
use coach_core::{
    CoachResult, DisplaySink, Notice, SessionManager,
    llm_client::{CompletionClient, CompletionSettings, TextStream},
    profile::ProfileFields,
    prompt::PromptComposer,
    store::tabular::{MemorySheet, TabularRecordStore},
    transcript::Turn,
};
use futures::stream;
use std::sync::{Arc, Mutex};

/// Replies with the same fragments for every request.
pub struct EchoCompletion {
    pub fragments: Vec<&'static str>,
}

#[async_trait]
impl CompletionClient for EchoCompletion {
    async fn stream_reply(&self, _turns: &[Turn], _settings: &CompletionSettings) -> CoachResult<TextStream> {
        let items: Vec<CoachResult<String>> = self.fragments.iter().map(|f| Ok(f.to_string())).collect();
        Ok(Box::pin(stream::iter(items)))
    }
}

/// Discards everything except notices.
#[derive(Default)]
pub struct QuietSink {
    pub notices: Mutex<Vec<Notice>>,
}

#[async_trait]
impl DisplaySink for QuietSink {
    async fn fragment(&self, _text: &str) {}
    async fn completed(&self, _full_text: &str) {}
    async fn discarded(&self) {}
    async fn notice(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
    async fn transcription(&self, _text: &str) {}
    async fn audio(&self, _audio: Bytes) {}
}

pub fn fields(display_name: &str, level: &str, target: &str) -> ProfileFields {
    ProfileFields {
        display_name: display_name.to_string(),
        level: level.to_string(),
        target: target.to_string(),
        native_language: None,
    }
}

pub fn sheet_manager() -> (MemorySheet, SessionManager) {
    let sheet = MemorySheet::new();
    let store = Arc::new(TabularRecordStore::in_memory(sheet.clone()));
    (sheet, SessionManager::new(store, PromptComposer::default()))
}
