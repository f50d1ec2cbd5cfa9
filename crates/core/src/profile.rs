//! Profile data model.
//!
//! A `Profile` is the persisted record of one student: identity, self-assessed
//! proficiency, goal and the full conversation transcript.

use crate::transcript::Transcript;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Language assumed when a profile does not name one.
pub const DEFAULT_NATIVE_LANGUAGE: &str = "English";

/// Choices offered by the registration form. Other values are accepted.
pub const LEVEL_OPTIONS: [&str; 3] = ["Beginner (A1-A2)", "Intermediate (B1-B2)", "Advanced (C1-C2)"];
pub const TARGET_OPTIONS: [&str; 5] = ["Band 6.0", "Band 6.5", "Band 7.0", "Band 7.5", "Band 8.0+"];

/// Recognised proficiency tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    Beginner,
    Intermediate,
    Advanced,
}

/// Self-assessed proficiency, kept as the label the student picked
/// (e.g. `"Beginner (A1-A2)"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Level(String);

impl Level {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into().trim().to_string())
    }

    pub fn label(&self) -> &str {
        &self.0
    }

    /// Tier derived from the leading word of the label, if recognised.
    pub fn tier(&self) -> Option<Tier> {
        let head = self
            .0
            .split(|c: char| !c.is_alphabetic())
            .next()
            .unwrap_or_default()
            .to_lowercase();
        match head.as_str() {
            "beginner" => Some(Tier::Beginner),
            "intermediate" => Some(Tier::Intermediate),
            "advanced" => Some(Tier::Advanced),
            _ => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend-specific handle used for in-place updates (row number, primary key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageLocation(pub i64);

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Profile fields collected by the registration form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFields {
    pub display_name: String,
    pub level: String,
    pub target: String,
    #[serde(default)]
    pub native_language: Option<String>,
}

/// A profile ready to be inserted. The credential is already in its stored form.
#[derive(Clone)]
pub struct NewProfile {
    pub identifier: String,
    pub display_name: String,
    pub level: Level,
    pub target: String,
    pub native_language: Option<String>,
    pub credential: String,
}

impl fmt::Debug for NewProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewProfile")
            .field("identifier", &self.identifier)
            .field("display_name", &self.display_name)
            .field("level", &self.level)
            .field("target", &self.target)
            .field("native_language", &self.native_language)
            .field("credential", &"<redacted>")
            .finish()
    }
}

/// Persisted user record.
#[derive(Clone, PartialEq)]
pub struct Profile {
    pub identifier: String,
    pub display_name: String,
    pub level: Level,
    pub target: String,
    pub native_language: Option<String>,
    pub credential: String,
    pub transcript: Transcript,
    pub storage_location: StorageLocation,
}

impl Profile {
    pub fn from_new(new: NewProfile, storage_location: StorageLocation) -> Self {
        Self {
            identifier: new.identifier,
            display_name: new.display_name,
            level: new.level,
            target: new.target,
            native_language: new.native_language,
            credential: new.credential,
            transcript: Transcript::new(),
            storage_location,
        }
    }

    /// Native language, falling back to English.
    pub fn native_language(&self) -> &str {
        self.native_language
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(DEFAULT_NATIVE_LANGUAGE)
    }

    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            identifier: self.identifier.clone(),
            display_name: self.display_name.clone(),
            level: self.level.label().to_string(),
            target: self.target.clone(),
            native_language: self.native_language().to_string(),
        }
    }
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("identifier", &self.identifier)
            .field("display_name", &self.display_name)
            .field("level", &self.level)
            .field("target", &self.target)
            .field("native_language", &self.native_language)
            .field("credential", &"<redacted>")
            .field("turns", &self.transcript.len())
            .field("storage_location", &self.storage_location)
            .finish()
    }
}

/// Public view of a profile, safe to send to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub identifier: String,
    pub display_name: String,
    pub level: String,
    pub target: String,
    pub native_language: String,
}
