use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use inference_common::{BatchItemResult, BatchStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{BatchRecord, PurgedBatches, StoreError};

/// SQLite-backed batch metadata store.
pub struct BatchStore {
    conn: Mutex<Connection>,
}

fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl BatchStore {
    pub fn new(database_url: &str) -> Result<Self, StoreError> {
        // Parse sqlite: prefix if present
        let path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            // Create parent directories if needed
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::IoError(e.to_string()))?;
            }
            Connection::open(path)?
        };

        conn.execute(
            "CREATE TABLE IF NOT EXISTS batches (
                batch_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                model TEXT NOT NULL,
                job_ref TEXT NOT NULL,
                status TEXT NOT NULL,
                input_count INTEGER NOT NULL,
                processed_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                completed_at TEXT,
                error TEXT,
                results TEXT,
                processing_time_ms INTEGER
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_batches_status ON batches(status)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_batches_completed_at ON batches(completed_at)",
            [],
        )?;

        tracing::info!("Batch store initialized with database: {}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::new("sqlite::memory:")
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))
    }

    /// Persist a newly submitted batch.
    pub fn insert(&self, record: &BatchRecord) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let results = record
            .results
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        conn.execute(
            "INSERT INTO batches (batch_id, owner_id, model, job_ref, status, input_count,
                processed_count, created_at, completed_at, error, results, processing_time_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.batch_id,
                record.owner_id,
                record.model,
                record.job_ref,
                record.status.as_str(),
                record.input_count as i64,
                record.processed_count as i64,
                timestamp(record.created_at),
                record.completed_at.map(timestamp),
                record.error,
                results,
                record.processing_time_ms.map(|ms| ms as i64),
            ],
        )?;

        tracing::debug!("Stored batch: {}", record.batch_id);
        Ok(())
    }

    /// Link a batch to the queue job processing it.
    pub fn attach_job(&self, batch_id: &str, job_ref: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE batches SET job_ref = ?1 WHERE batch_id = ?2",
            params![job_ref, batch_id],
        )?;
        Ok(())
    }

    pub fn delete(&self, batch_id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM batches WHERE batch_id = ?1", params![batch_id])?;
        Ok(())
    }

    /// Mark a queued batch as picked up by a worker.
    pub fn mark_active(&self, batch_id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE batches SET status = 'active' WHERE batch_id = ?1 AND status = 'queued'",
            params![batch_id],
        )?;
        Ok(())
    }

    /// Record a completed batch. Returns false if it was already terminal.
    pub fn finalize_completed(
        &self,
        batch_id: &str,
        results: &[BatchItemResult],
        processing_time_ms: u64,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let body =
            serde_json::to_string(results).map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        let updated = conn.execute(
            "UPDATE batches
             SET status = 'completed', processed_count = ?1, completed_at = ?2,
                 results = ?3, processing_time_ms = ?4, error = NULL
             WHERE batch_id = ?5 AND status IN ('queued', 'active')",
            params![
                results.len() as i64,
                timestamp(Utc::now()),
                body,
                processing_time_ms as i64,
                batch_id,
            ],
        )?;
        Ok(updated > 0)
    }

    /// Record a failed batch. Returns false if it was already terminal.
    pub fn finalize_failed(
        &self,
        batch_id: &str,
        error: &str,
        processed_count: usize,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE batches
             SET status = 'failed', processed_count = ?1, completed_at = ?2, error = ?3
             WHERE batch_id = ?4 AND status IN ('queued', 'active')",
            params![processed_count as i64, timestamp(Utc::now()), error, batch_id],
        )?;
        Ok(updated > 0)
    }

    pub fn get(&self, batch_id: &str) -> Result<Option<BatchRecord>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT batch_id, owner_id, model, job_ref, status, input_count, processed_count,
                    created_at, completed_at, error, results, processing_time_ms
                 FROM batches WHERE batch_id = ?1",
                params![batch_id],
                RawBatch::from_row,
            )
            .optional()?;

        row.map(RawBatch::into_record).transpose()
    }

    /// Delete batches whose retention window has passed.
    ///
    /// Terminal batches age from `completed_at`, unfinished ones from
    /// `created_at`.
    pub fn purge_expired(&self, retention: Duration) -> Result<PurgedBatches, StoreError> {
        let cutoff = timestamp(Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default());
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let abandoned_jobs = {
            let mut stmt = tx.prepare(
                "SELECT job_ref FROM batches
                 WHERE status IN ('queued', 'active') AND job_ref != '' AND created_at < ?1",
            )?;
            let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        let deleted = tx.execute(
            "DELETE FROM batches WHERE COALESCE(completed_at, created_at) < ?1",
            params![cutoff],
        )?;
        tx.commit()?;

        if deleted > 0 {
            tracing::info!(
                unfinished = abandoned_jobs.len(),
                "Purged {} expired batches",
                deleted
            );
        }
        Ok(PurgedBatches {
            deleted,
            abandoned_jobs,
        })
    }

    /// Fail batches a previous process left unfinished.
    pub fn fail_interrupted(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE batches SET status = 'failed', completed_at = ?1,
                error = 'interrupted by gateway restart'
             WHERE status IN ('queued', 'active')",
            params![timestamp(Utc::now())],
        )?;

        if updated > 0 {
            tracing::warn!("Marked {} interrupted batches as failed", updated);
        }
        Ok(updated)
    }
}

/// Column values as stored, before decoding.
struct RawBatch {
    batch_id: String,
    owner_id: String,
    model: String,
    job_ref: String,
    status: String,
    input_count: i64,
    processed_count: i64,
    created_at: String,
    completed_at: Option<String>,
    error: Option<String>,
    results: Option<String>,
    processing_time_ms: Option<i64>,
}

impl RawBatch {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            batch_id: row.get(0)?,
            owner_id: row.get(1)?,
            model: row.get(2)?,
            job_ref: row.get(3)?,
            status: row.get(4)?,
            input_count: row.get(5)?,
            processed_count: row.get(6)?,
            created_at: row.get(7)?,
            completed_at: row.get(8)?,
            error: row.get(9)?,
            results: row.get(10)?,
            processing_time_ms: row.get(11)?,
        })
    }

    fn into_record(self) -> Result<BatchRecord, StoreError> {
        let corrupt = || StoreError::Corrupt(self.batch_id.clone());

        let status = BatchStatus::parse(&self.status).ok_or_else(corrupt)?;
        let created_at = parse_timestamp(&self.created_at).ok_or_else(corrupt)?;
        let results = match &self.results {
            Some(body) => Some(
                serde_json::from_str::<Vec<BatchItemResult>>(body).map_err(|_| corrupt())?,
            ),
            None => None,
        };

        Ok(BatchRecord {
            status,
            created_at,
            results,
            completed_at: self.completed_at.as_deref().and_then(parse_timestamp),
            input_count: self.input_count.max(0) as usize,
            processed_count: self.processed_count.max(0) as usize,
            processing_time_ms: self.processing_time_ms.map(|ms| ms.max(0) as u64),
            batch_id: self.batch_id,
            owner_id: self.owner_id,
            model: self.model,
            job_ref: self.job_ref,
            error: self.error,
        })
    }
}
