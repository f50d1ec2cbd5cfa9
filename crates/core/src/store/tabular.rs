//! Spreadsheet-shaped record store.
//!
//! Row 1 holds the column headers; each profile occupies one data row from
//! row 2 on. The row number is the profile's `StorageLocation`.

use super::{
    COL_IDENTIFIER, COL_TRANSCRIPT, COLUMNS, RecordStore,
    connection::{ConnectionCache, Connector},
    profile_from_row, row_from_new,
};
use crate::{
    error::{CoachError, CoachResult},
    profile::{NewProfile, Profile, StorageLocation},
    transcript::Transcript,
};
use async_trait::async_trait;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Row-level operations of a tabular backend (a spreadsheet API, a CSV file,
/// an in-memory sheet).
#[async_trait]
pub trait TabularBackend: Send + Sync {
    /// Every row, header included, in sheet order.
    async fn rows(&self) -> CoachResult<Vec<Vec<String>>>;

    /// Appends `row` unless a data row already has the same value in
    /// `key_column`. Returns the new row number, or `None` if the key exists.
    async fn append_if_absent(&self, key_column: usize, row: Vec<String>) -> CoachResult<Option<i64>>;

    async fn update_cell(&self, row: i64, column: usize, value: String) -> CoachResult<()>;

    /// Blanks a row without shifting the rows below it.
    async fn clear_row(&self, row: i64) -> CoachResult<()>;
}

/// In-process sheet. Clones share the same cells.
#[derive(Clone)]
pub struct MemorySheet {
    cells: Arc<Mutex<Vec<Vec<String>>>>,
    offline: Arc<AtomicBool>,
}

impl Default for MemorySheet {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySheet {
    pub fn new() -> Self {
        let header = COLUMNS.iter().map(|c| c.to_string()).collect();
        Self {
            cells: Arc::new(Mutex::new(vec![header])),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulates the backing service going away (or coming back).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Appends a raw row as-is, bypassing the uniqueness check. Used to load
    /// existing sheets, including partially filled rows.
    pub fn push_raw_row(&self, row: Vec<String>) -> CoachResult<i64> {
        let mut cells = self.lock()?;
        cells.push(row);
        Ok(cells.len() as i64)
    }

    pub fn raw_row(&self, row: i64) -> Option<Vec<String>> {
        let cells = self.lock().ok()?;
        let index = usize::try_from(row).ok()?.checked_sub(1)?;
        cells.get(index).cloned()
    }

    fn lock(&self) -> CoachResult<std::sync::MutexGuard<'_, Vec<Vec<String>>>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CoachError::store("sheet is offline"));
        }
        self.cells
            .lock()
            .map_err(|_| CoachError::store("sheet lock poisoned"))
    }

    fn index_of(row: i64, len: usize) -> CoachResult<usize> {
        usize::try_from(row)
            .ok()
            .and_then(|r| r.checked_sub(1))
            .filter(|&i| i >= 1 && i < len)
            .ok_or_else(|| CoachError::store(format!("row {} is out of range", row)))
    }
}

#[async_trait]
impl TabularBackend for MemorySheet {
    async fn rows(&self) -> CoachResult<Vec<Vec<String>>> {
        Ok(self.lock()?.clone())
    }

    async fn append_if_absent(&self, key_column: usize, row: Vec<String>) -> CoachResult<Option<i64>> {
        let key = row.get(key_column).map(|k| k.trim()).unwrap_or_default();
        let mut cells = self.lock()?;
        let taken = cells
            .iter()
            .skip(1)
            .any(|existing| existing.get(key_column).map(|k| k.trim()) == Some(key));
        if taken {
            return Ok(None);
        }
        cells.push(row);
        Ok(Some(cells.len() as i64))
    }

    async fn update_cell(&self, row: i64, column: usize, value: String) -> CoachResult<()> {
        let mut cells = self.lock()?;
        let index = Self::index_of(row, cells.len())?;
        let target = &mut cells[index];
        if target.len() <= column {
            target.resize(column + 1, String::new());
        }
        target[column] = value;
        Ok(())
    }

    async fn clear_row(&self, row: i64) -> CoachResult<()> {
        let mut cells = self.lock()?;
        let index = Self::index_of(row, cells.len())?;
        cells[index] = vec![String::new(); COLUMNS.len()];
        Ok(())
    }
}

/// Hands out the shared in-memory sheet as a "connection".
pub struct MemorySheetConnector {
    sheet: MemorySheet,
}

impl MemorySheetConnector {
    pub fn new(sheet: MemorySheet) -> Self {
        Self { sheet }
    }
}

#[async_trait]
impl Connector for MemorySheetConnector {
    type Connection = MemorySheet;

    async fn connect(&self) -> CoachResult<MemorySheet> {
        if self.sheet.offline.load(Ordering::SeqCst) {
            return Err(CoachError::store("sheet is offline"));
        }
        Ok(self.sheet.clone())
    }
}

/// `RecordStore` over any tabular backend reached through a cached connection.
pub struct TabularRecordStore<C: Connector> {
    connection: ConnectionCache<C>,
}

impl TabularRecordStore<MemorySheetConnector> {
    /// Store over an in-memory sheet; the connection never expires.
    pub fn in_memory(sheet: MemorySheet) -> Self {
        Self::new(MemorySheetConnector::new(sheet), Duration::MAX)
    }
}

impl<C> TabularRecordStore<C>
where
    C: Connector,
    C::Connection: TabularBackend,
{
    pub fn new(connector: C, freshness: Duration) -> Self {
        Self {
            connection: ConnectionCache::new(connector, freshness),
        }
    }

    /// Runs `result` through and drops the cached connection if the backend
    /// reported itself unavailable.
    async fn checked<T>(&self, result: CoachResult<T>) -> CoachResult<T> {
        if let Err(CoachError::StoreUnavailable(reason)) = &result {
            warn!(%reason, "Store operation failed; dropping cached connection");
            self.connection.invalidate().await;
        }
        result
    }

    async fn locate(&self, identifier: &str) -> CoachResult<Profile> {
        let sheet = self.connection.get().await?;
        let rows = self.checked(sheet.rows().await).await?;
        let wanted = identifier.trim();
        rows.iter()
            .enumerate()
            .skip(1)
            .filter(|(_, row)| row.get(COL_IDENTIFIER).map(|c| c.trim()) == Some(wanted))
            .find_map(|(index, row)| profile_from_row(row, StorageLocation(index as i64 + 1)))
            .ok_or_else(|| CoachError::not_found(wanted))
    }
}

#[async_trait]
impl<C> RecordStore for TabularRecordStore<C>
where
    C: Connector,
    C::Connection: TabularBackend,
{
    async fn find(&self, identifier: &str) -> CoachResult<Profile> {
        self.locate(identifier).await
    }

    #[instrument(skip_all, fields(identifier = %profile.identifier))]
    async fn create(&self, profile: NewProfile) -> CoachResult<Profile> {
        let sheet = self.connection.get().await?;
        let row = row_from_new(&profile);
        match self.checked(sheet.append_if_absent(COL_IDENTIFIER, row).await).await? {
            Some(row_number) => {
                info!(row = row_number, "Profile row appended");
                Ok(Profile::from_new(profile, StorageLocation(row_number)))
            }
            None => Err(CoachError::already_exists(profile.identifier)),
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
        let sheet = self.connection.get().await?;
        self.checked(sheet.update_cell(location.0, COL_TRANSCRIPT, json).await)
            .await
    }

    async fn delete(&self, identifier: &str) -> CoachResult<()> {
        let profile = self.locate(identifier).await?;
        let sheet = self.connection.get().await?;
        self.checked(sheet.clear_row(profile.storage_location.0).await)
            .await?;
        info!(identifier = %profile.identifier, row = %profile.storage_location, "Profile row cleared");
        Ok(())
    }
}
