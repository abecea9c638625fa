//! Progress store
//!
//! One row per book with unfinished progress, keyed by book id. The
//! dispatcher reads a record when a card is scanned, upserts it on every
//! progress tick and deletes it when the book finishes.

use async_trait::async_trait;
use bookplayer_common::{BookId, Error, ProgressRecord, Result};
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Durable last-known playback position per book
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get(&self, book_id: &BookId) -> Result<Option<ProgressRecord>>;

    /// Insert or replace the record for `record.book_id`
    async fn upsert(&self, record: &ProgressRecord) -> Result<()>;

    /// Remove the record; deleting a missing record is not an error
    async fn delete(&self, book_id: &BookId) -> Result<()>;
}

/// Progress store backed by the SQLite `progress` table
#[derive(Debug, Clone)]
pub struct SqliteProgressStore {
    db: Pool<Sqlite>,
}

impl SqliteProgressStore {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProgressStore for SqliteProgressStore {
    async fn get(&self, book_id: &BookId) -> Result<Option<ProgressRecord>> {
        let row = sqlx::query(
            "SELECT track, position_secs, updated_at FROM progress WHERE book_id = ?",
        )
        .bind(book_id.as_str())
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let track: i64 = row.try_get("track")?;
        let position_secs: f64 = row.try_get("position_secs")?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

        Ok(Some(ProgressRecord {
            book_id: book_id.clone(),
            track: u32::try_from(track).map_err(|_| {
                Error::Store(format!("Invalid track {} stored for {}", track, book_id))
            })?,
            position_secs: position_secs.max(0.0),
            updated_at,
        }))
    }

    async fn upsert(&self, record: &ProgressRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO progress (book_id, track, position_secs, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(book_id) DO UPDATE SET
                track = excluded.track,
                position_secs = excluded.position_secs,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.book_id.as_str())
        .bind(i64::from(record.track))
        .bind(record.position_secs)
        .bind(record.updated_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn delete(&self, book_id: &BookId) -> Result<()> {
        sqlx::query("DELETE FROM progress WHERE book_id = ?")
            .bind(book_id.as_str())
            .execute(&self.db)
            .await?;

        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryProgressState {
    records: HashMap<BookId, ProgressRecord>,
    writes: usize,
    failing: bool,
}

/// In-memory progress store
///
/// Clones share the same records. Counts writes so tests can assert that a
/// tick produced exactly one upsert.
#[derive(Debug, Clone, Default)]
pub struct MemoryProgressStore {
    state: Arc<Mutex<MemoryProgressState>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryProgressState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every later operation fail with a store error
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// Number of successful upserts and deletes
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    pub fn snapshot(&self, book_id: &BookId) -> Option<ProgressRecord> {
        self.lock().records.get(book_id).cloned()
    }

    fn check(state: &MemoryProgressState) -> Result<()> {
        if state.failing {
            Err(Error::Store("progress store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn get(&self, book_id: &BookId) -> Result<Option<ProgressRecord>> {
        let state = self.lock();
        Self::check(&state)?;
        Ok(state.records.get(book_id).cloned())
    }

    async fn upsert(&self, record: &ProgressRecord) -> Result<()> {
        let mut state = self.lock();
        Self::check(&state)?;
        state.records.insert(record.book_id.clone(), record.clone());
        state.writes += 1;
        Ok(())
    }

    async fn delete(&self, book_id: &BookId) -> Result<()> {
        let mut state = self.lock();
        Self::check(&state)?;
        state.records.remove(book_id);
        state.writes += 1;
        Ok(())
    }
}
