//! API Models
//!
//! Request and response bodies of the REST endpoints, documented with `utoipa`.

use coach_core::profile::{Profile, ProfileFields};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema, Clone)]
pub struct RegisterPayload {
    /// Phone number or other unique handle.
    #[schema(example = "+77001234567")]
    pub identifier: String,
    #[schema(example = "s3cret")]
    pub password: String,
    #[schema(example = "Max")]
    pub display_name: String,
    #[schema(example = "Intermediate (B1-B2)")]
    pub level: String,
    #[schema(example = "Band 7.0")]
    pub target: String,
    #[serde(default)]
    #[schema(example = "Russian")]
    pub native_language: Option<String>,
}

impl RegisterPayload {
    pub fn fields(&self) -> ProfileFields {
        ProfileFields {
            display_name: self.display_name.clone(),
            level: self.level.clone(),
            target: self.target.clone(),
            native_language: self.native_language.clone(),
        }
    }
}

#[derive(Deserialize, ToSchema, Clone)]
pub struct LoginPayload {
    #[schema(example = "+77001234567")]
    pub identifier: String,
    #[schema(example = "s3cret")]
    pub password: String,
}

/// Public profile data. Never carries the credential or the transcript.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ProfileView {
    pub identifier: String,
    pub display_name: String,
    pub level: String,
    pub target: String,
    pub native_language: String,
}

impl From<&Profile> for ProfileView {
    fn from(profile: &Profile) -> Self {
        let summary = profile.summary();
        Self {
            identifier: summary.identifier,
            display_name: summary.display_name,
            level: summary.level,
            target: summary.target,
            native_language: summary.native_language,
        }
    }
}

/// Choices for the registration form.
#[derive(Serialize, ToSchema, Debug)]
pub struct FormOptions {
    pub levels: Vec<String>,
    pub targets: Vec<String>,
    pub practice_areas: Vec<String>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub message: String,
    /// Form field that failed validation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
        }
    }
}
