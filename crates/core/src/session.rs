//! Session/Profile Manager
//!
//! Turns registration and login form input into an authenticated `Session`.
//! A `Session` is the explicit per-run context: the profile, its in-memory
//! transcript and the current topic. Nothing here is process-global, so
//! concurrent runs stay isolated.

use crate::{
    credential::{hash_credential, verify_credential},
    error::{CoachError, CoachResult},
    profile::{Level, NewProfile, Profile, ProfileFields},
    prompt::PromptComposer,
    store::RecordStore,
    transcript::Transcript,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// The authenticated state of one interactive run.
#[derive(Debug, Clone)]
pub struct Session {
    profile: Profile,
    topic: Option<String>,
}

impl Session {
    /// Opens a session, installing a freshly composed system instruction as the
    /// first turn and, if enabled and nothing has been said yet, the greeting.
    pub fn open(mut profile: Profile, composer: &PromptComposer) -> Self {
        let instruction = composer.compose(&profile, None);
        profile.transcript.set_system(instruction);
        if composer.policy().greeting && profile.transcript.visible().next().is_none() {
            let greeting = composer.greeting(&profile);
            profile.transcript.push_assistant(greeting);
        }
        Self {
            profile,
            topic: None,
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn transcript(&self) -> &Transcript {
        &self.profile.transcript
    }

    pub(crate) fn transcript_mut(&mut self) -> &mut Transcript {
        &mut self.profile.transcript
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub(crate) fn set_topic(&mut self, topic: String) {
        self.topic = Some(topic);
    }
}

fn required(value: &str, field: &'static str) -> CoachResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CoachError::ValidationFailed { field });
    }
    Ok(trimmed.to_string())
}

/// Mediates between form input and the Record Store.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn RecordStore>,
    composer: PromptComposer,
}

impl SessionManager {
    pub fn new(store: Arc<dyn RecordStore>, composer: PromptComposer) -> Self {
        Self { store, composer }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn composer(&self) -> &PromptComposer {
        &self.composer
    }

    /// Validates the form, hashes the credential and inserts the profile.
    #[instrument(skip_all, fields(identifier = %identifier.trim()))]
    pub async fn register(
        &self,
        identifier: &str,
        password_candidate: &str,
        fields: ProfileFields,
    ) -> CoachResult<Session> {
        let identifier = required(identifier, "identifier")?;
        let password = required(password_candidate, "password")?;
        let display_name = required(&fields.display_name, "display_name")?;
        let level = required(&fields.level, "level")?;
        let target = required(&fields.target, "target")?;
        let native_language = fields
            .native_language
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());

        let profile = self
            .store
            .create(NewProfile {
                identifier,
                display_name,
                level: Level::new(level),
                target,
                native_language,
                credential: hash_credential(&password),
            })
            .await?;
        info!(location = %profile.storage_location, "Profile registered");
        Ok(Session::open(profile, &self.composer))
    }

    /// Looks the profile up and checks the password. `NotFound` and
    /// `BadCredential` stay distinct; callers decide what to reveal.
    #[instrument(skip_all, fields(identifier = %identifier.trim()))]
    pub async fn authenticate(&self, identifier: &str, password_candidate: &str) -> CoachResult<Session> {
        let profile = self.store.find(identifier.trim()).await?;
        if !verify_credential(&profile.credential, password_candidate) {
            warn!("Login rejected: credential mismatch");
            return Err(CoachError::BadCredential);
        }
        info!(turns = profile.transcript.len(), "Login succeeded");
        Ok(Session::open(profile, &self.composer))
    }

    /// Ends the run. The in-memory transcript is dropped; the store is untouched.
    pub fn logout(&self, session: Session) {
        info!(identifier = %session.profile.identifier, "Logged out");
        drop(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::PromptPolicy;
    use crate::store::tabular::{MemorySheet, TabularRecordStore};
    use crate::transcript::Role;

    fn fields(name: &str) -> ProfileFields {
        ProfileFields {
            display_name: name.into(),
            level: "Beginner".into(),
            target: "6.5".into(),
            native_language: None,
        }
    }

    fn manager() -> SessionManager {
        SessionManager::new(
            Arc::new(TabularRecordStore::in_memory(MemorySheet::new())),
            PromptComposer::default(),
        )
    }

    #[tokio::test]
    async fn test_register_validates_required_fields() {
        let manager = manager();
        let err = manager.register("  ", "abc", fields("Max")).await.unwrap_err();
        assert!(matches!(err, CoachError::ValidationFailed { field: "identifier" }));

        let err = manager.register("+7000", "", fields("Max")).await.unwrap_err();
        assert!(matches!(err, CoachError::ValidationFailed { field: "password" }));

        let err = manager.register("+7000", "abc", fields(" ")).await.unwrap_err();
        assert!(matches!(err, CoachError::ValidationFailed { field: "display_name" }));

        assert!(matches!(
            manager.store().find("+7000").await,
            Err(CoachError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_register_stores_hash_not_password() {
        let manager = manager();
        manager.register("+7000", "abc", fields("Max")).await.unwrap();
        let stored = manager.store().find("+7000").await.unwrap();
        assert_ne!(stored.credential, "abc");
        assert!(stored.credential.starts_with("sha256$"));
    }

    #[tokio::test]
    async fn test_authenticate_distinguishes_failures() {
        let manager = manager();
        manager.register("+7000", "abc", fields("Max")).await.unwrap();

        assert!(matches!(
            manager.authenticate("+7001", "abc").await,
            Err(CoachError::NotFound { .. })
        ));
        assert!(matches!(
            manager.authenticate("+7000", "ABC").await,
            Err(CoachError::BadCredential)
        ));
        let session = manager.authenticate(" +7000 ", "abc ").await.unwrap();
        assert_eq!(session.profile().display_name, "Max");
    }

    #[tokio::test]
    async fn test_session_opens_with_system_turn_first() {
        let session = manager().register("+7000", "abc", fields("Max")).await.unwrap();
        let turns = session.transcript().turns();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::System);
        assert!(turns[0].content.contains("Max"));
    }

    #[tokio::test]
    async fn test_greeting_is_added_once() {
        let composer = PromptComposer::new(PromptPolicy {
            greeting: true,
            ..PromptPolicy::default()
        });
        let manager = SessionManager::new(
            Arc::new(TabularRecordStore::in_memory(MemorySheet::new())),
            composer.clone(),
        );
        let session = manager.register("+7000", "abc", fields("Max")).await.unwrap();
        assert_eq!(session.transcript().len(), 2);
        assert_eq!(session.transcript().turns()[1].role, Role::Assistant);

        let reopened = Session::open(session.profile().clone(), &composer);
        assert_eq!(reopened.transcript().len(), 2);
    }

    #[tokio::test]
    async fn test_logout_leaves_store_untouched() {
        let manager = manager();
        let session = manager.register("+7000", "abc", fields("Max")).await.unwrap();
        manager.logout(session);
        assert!(manager.store().find("+7000").await.is_ok());
    }
}
