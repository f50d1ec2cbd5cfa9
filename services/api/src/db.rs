//! Data Access Layer
//!
//! PostgreSQL implementation of the `RecordStore`. The pool is opened lazily
//! through the shared `ConnectionCache` and rebuilt once it is older than the
//! configured freshness window.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coach_core::{
    error::{CoachError, CoachResult},
    profile::{Level, NewProfile, Profile, StorageLocation},
    store::{
        RecordStore,
        connection::{ConnectionCache, Connector},
    },
    transcript::Transcript,
};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens a connection pool for `database_url`.
pub struct PgConnector {
    database_url: String,
}

impl PgConnector {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Connection = PgPool;

    async fn connect(&self) -> CoachResult<PgPool> {
        PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(&self.database_url)
            .await
            .map_err(|e| CoachError::store(format!("database connection failed: {}", e)))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    id: i64,
    identifier: String,
    display_name: String,
    level: String,
    target: String,
    transcript_json: String,
    credential: String,
    native_language: Option<String>,
    updated_at: DateTime<Utc>,
}

impl ProfileRow {
    fn into_profile(self) -> Profile {
        Profile {
            identifier: self.identifier,
            display_name: self.display_name,
            level: Level::new(self.level),
            target: self.target,
            native_language: self.native_language.filter(|l| !l.trim().is_empty()),
            credential: self.credential,
            transcript: Transcript::from_json_lenient(&self.transcript_json),
            storage_location: StorageLocation(self.id),
        }
    }
}

/// `RecordStore` over the `profiles` table.
pub struct PgRecordStore {
    connection: ConnectionCache<PgConnector>,
}

impl PgRecordStore {
    pub fn new(database_url: impl Into<String>, freshness: Duration) -> Self {
        Self {
            connection: ConnectionCache::new(PgConnector::new(database_url), freshness),
        }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        let pool = self.connection.get().await?;
        sqlx::migrate!("./migrations").run(&*pool).await?;
        Ok(())
    }

    /// Maps a database error, dropping the cached pool when the database
    /// itself is unreachable.
    async fn unavailable(&self, err: sqlx::Error) -> CoachError {
        if matches!(
            err,
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
        ) {
            warn!(error = %err, "Database unreachable; dropping cached pool");
            self.connection.invalidate().await;
        }
        CoachError::store(err.to_string())
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn find(&self, identifier: &str) -> CoachResult<Profile> {
        let pool = self.connection.get().await?;
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT id, identifier, display_name, level, target, transcript_json,
                   credential, native_language, updated_at
            FROM profiles
            WHERE identifier = $1
            "#,
        )
        .bind(identifier.trim())
        .fetch_optional(&*pool)
        .await;

        match row {
            Ok(Some(row)) => {
                debug!(id = row.id, updated_at = %row.updated_at, "Profile loaded");
                Ok(row.into_profile())
            }
            Ok(None) => Err(CoachError::not_found(identifier.trim())),
            Err(e) => Err(self.unavailable(e).await),
        }
    }

    #[instrument(skip_all, fields(identifier = %profile.identifier))]
    async fn create(&self, profile: NewProfile) -> CoachResult<Profile> {
        let pool = self.connection.get().await?;
        let inserted: Result<Option<i64>, sqlx::Error> = sqlx::query_scalar(
            r#"
            INSERT INTO profiles (identifier, display_name, level, target, credential, native_language)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (identifier) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&profile.identifier)
        .bind(&profile.display_name)
        .bind(profile.level.label())
        .bind(&profile.target)
        .bind(&profile.credential)
        .bind(&profile.native_language)
        .fetch_optional(&*pool)
        .await;

        match inserted {
            Ok(Some(id)) => {
                info!(id, "Profile inserted");
                Ok(Profile::from_new(profile, StorageLocation(id)))
            }
            Ok(None) => Err(CoachError::already_exists(profile.identifier)),
            Err(e) => Err(self.unavailable(e).await),
        }
    }

    async fn persist_transcript(
        &self,
        location: StorageLocation,
        transcript: &Transcript,
    ) -> CoachResult<()> {
        let json = transcript
            .to_json()
            .map_err(|e| CoachError::store(format!("transcript serialization failed: {}", e)))?;
        let pool = self.connection.get().await?;
        let result = sqlx::query(
            "UPDATE profiles SET transcript_json = $1, updated_at = now() WHERE id = $2",
        )
        .bind(json)
        .bind(location.0)
        .execute(&*pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(CoachError::store(format!(
                "no profile at location {}",
                location
            ))),
            Ok(_) => Ok(()),
            Err(e) => Err(self.unavailable(e).await),
        }
    }

    async fn delete(&self, identifier: &str) -> CoachResult<()> {
        let pool = self.connection.get().await?;
        let result = sqlx::query("DELETE FROM profiles WHERE identifier = $1")
            .bind(identifier.trim())
            .execute(&*pool)
            .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(CoachError::not_found(identifier.trim())),
            Ok(_) => {
                info!(identifier = %identifier.trim(), "Profile deleted");
                Ok(())
            }
            Err(e) => Err(self.unavailable(e).await),
        }
    }
}
