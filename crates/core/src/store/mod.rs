//! Record Store
//!
//! Durable mapping from a student's identifier to their `Profile`. The backing
//! collaborator is abstracted behind `RecordStore`; `tabular` provides the
//! spreadsheet-shaped implementation and `connection` the lazily established,
//! periodically refreshed connection both implementations share.
//!
//! Transcript writes are last-write-wins: one human is expected to use one
//! identifier from one session at a time.

pub mod connection;
pub mod tabular;

use crate::{
    error::CoachResult,
    profile::{Level, NewProfile, Profile, StorageLocation},
    transcript::Transcript,
};
use async_trait::async_trait;

/// Fixed column order of a profile row.
pub const COLUMNS: [&str; 7] = [
    "identifier",
    "display_name",
    "level",
    "target",
    "transcript_json",
    "credential",
    "native_language",
];

pub const COL_IDENTIFIER: usize = 0;
pub const COL_TRANSCRIPT: usize = 4;

/// Keyed persistence for profiles.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Looks a profile up by identifier. Missing optional columns resolve to
    /// defaults and a malformed transcript resolves to an empty one.
    async fn find(&self, identifier: &str) -> CoachResult<Profile>;

    /// Inserts a profile unless the identifier is already taken. The check and
    /// the write are a single atomic step.
    async fn create(&self, profile: NewProfile) -> CoachResult<Profile>;

    /// Overwrites the stored transcript with the full in-memory one.
    async fn persist_transcript(
        &self,
        location: StorageLocation,
        transcript: &Transcript,
    ) -> CoachResult<()>;

    /// Removes a profile.
    async fn delete(&self, identifier: &str) -> CoachResult<()>;
}

fn cell(row: &[String], index: usize) -> &str {
    row.get(index).map(String::as_str).unwrap_or_default()
}

/// Decodes a row into a profile. Returns `None` for blank rows.
pub fn profile_from_row(row: &[String], location: StorageLocation) -> Option<Profile> {
    let identifier = cell(row, 0).trim();
    if identifier.is_empty() {
        return None;
    }
    let native_language = Some(cell(row, 6).trim())
        .filter(|l| !l.is_empty())
        .map(str::to_string);

    Some(Profile {
        identifier: identifier.to_string(),
        display_name: cell(row, 1).to_string(),
        level: Level::new(cell(row, 2)),
        target: cell(row, 3).to_string(),
        transcript: Transcript::from_json_lenient(cell(row, 4)),
        credential: cell(row, 5).to_string(),
        native_language,
        storage_location: location,
    })
}

/// Encodes a new profile as a row with an empty transcript.
pub fn row_from_new(profile: &NewProfile) -> Vec<String> {
    vec![
        profile.identifier.clone(),
        profile.display_name.clone(),
        profile.level.label().to_string(),
        profile.target.clone(),
        "[]".to_string(),
        profile.credential.clone(),
        profile.native_language.clone().unwrap_or_default(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_short_row_uses_defaults() {
        let profile = profile_from_row(&row(&["+7000", "Max", "Beginner", "6.5"]), StorageLocation(2))
            .expect("row should decode");
        assert_eq!(profile.native_language(), "English");
        assert_eq!(profile.credential, "");
        assert!(profile.transcript.is_empty());
        assert_eq!(profile.storage_location, StorageLocation(2));
    }

    #[test]
    fn test_blank_identifier_is_skipped() {
        assert!(profile_from_row(&row(&["", "ghost"]), StorageLocation(3)).is_none());
        assert!(profile_from_row(&[], StorageLocation(3)).is_none());
    }

    #[test]
    fn test_full_row_decodes() {
        let profile = profile_from_row(
            &row(&[
                "@max",
                "Max",
                "Advanced (C1-C2)",
                "Band 8.0+",
                r#"[{"role":"user","content":"hi"}]"#,
                "secret",
                "Russian",
            ]),
            StorageLocation(5),
        )
        .unwrap();
        assert_eq!(profile.transcript.len(), 1);
        assert_eq!(profile.native_language(), "Russian");
        assert_eq!(profile.level.label(), "Advanced (C1-C2)");
    }

    #[test]
    fn test_row_from_new_matches_column_order() {
        let new = NewProfile {
            identifier: "+7000".into(),
            display_name: "Max".into(),
            level: Level::new("Beginner"),
            target: "6.5".into(),
            native_language: None,
            credential: "hash".into(),
        };
        let encoded = row_from_new(&new);
        assert_eq!(encoded.len(), COLUMNS.len());
        assert_eq!(encoded[COL_IDENTIFIER], "+7000");
        assert_eq!(encoded[COL_TRANSCRIPT], "[]");
        assert_eq!(encoded[6], "");
    }
}
