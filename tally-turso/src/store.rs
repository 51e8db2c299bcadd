//! Turso/libSQL implementation of the engine's storage collaborators.
//!
//! One database holds three tables:
//! - `events` - the append-only event log, summed by [`EventCounter`]
//! - `checkpoints` - one row per subject, replaced by an atomic upsert
//! - `subjects` - denormalized subject fields read by formulas and the sampling gate
//!
//! Timestamps are stored as integer microseconds since the Unix epoch so that window bounds
//! compare numerically.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Database};
use tally_core::{
    Category, CategoryCounts, Checkpoint, CheckpointStore, EventCounter, EventRecord,
    SubjectContext, SubjectKey, SubjectKind, SubjectSource, TallyError, TimeWindow,
};
use tracing::{debug, instrument};

use crate::error::{Error, Result};

const SCHEMA_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_kind TEXT NOT NULL,
    subject_id TEXT NOT NULL,
    category TEXT NOT NULL,
    counts_for INTEGER NOT NULL DEFAULT 1 CHECK (counts_for >= 0),
    created_at INTEGER NOT NULL
)
"#;

const INDEX_EVENTS: &str = r#"
CREATE INDEX IF NOT EXISTS idx_events_subject_category_time
ON events(subject_kind, subject_id, category, created_at)
"#;

const SCHEMA_CHECKPOINTS: &str = r#"
CREATE TABLE IF NOT EXISTS checkpoints (
    subject_kind TEXT NOT NULL,
    subject_id TEXT NOT NULL,
    last_tabulated_at INTEGER,
    cumulative_counts TEXT NOT NULL,
    derived_metric REAL NOT NULL,
    PRIMARY KEY (subject_kind, subject_id)
)
"#;

const SCHEMA_SUBJECTS: &str = r#"
CREATE TABLE IF NOT EXISTS subjects (
    subject_kind TEXT NOT NULL,
    subject_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    published_at INTEGER,
    body TEXT,
    author TEXT,
    magnitude INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (subject_kind, subject_id)
)
"#;

const SUM_EVENTS: &str = "SELECT COALESCE(SUM(counts_for), 0) FROM events \
     WHERE subject_kind = ? AND subject_id = ? AND category = ? \
     AND created_at > ? AND created_at <= ?";

/// Replace-or-create, refusing to move `last_tabulated_at` backwards.
const UPSERT_CHECKPOINT: &str = "INSERT INTO checkpoints \
     (subject_kind, subject_id, last_tabulated_at, cumulative_counts, derived_metric) \
     VALUES (?, ?, ?, ?, ?) \
     ON CONFLICT(subject_kind, subject_id) DO UPDATE SET \
     last_tabulated_at = excluded.last_tabulated_at, \
     cumulative_counts = excluded.cumulative_counts, \
     derived_metric = excluded.derived_metric \
     WHERE checkpoints.last_tabulated_at IS NULL \
     OR excluded.last_tabulated_at >= checkpoints.last_tabulated_at";

const UPSERT_SUBJECT: &str = "INSERT INTO subjects \
     (subject_kind, subject_id, created_at, published_at, body, author, magnitude) \
     VALUES (?, ?, ?, ?, ?, ?, ?) \
     ON CONFLICT(subject_kind, subject_id) DO UPDATE SET \
     created_at = excluded.created_at, \
     published_at = excluded.published_at, \
     body = excluded.body, \
     author = excluded.author, \
     magnitude = excluded.magnitude";

/// libSQL-backed event log, checkpoint store and subject source.
///
/// All three collaborator traits are implemented on the same handle, so one store can be
/// shared by every aggregator in a process. Cheap to clone.
#[derive(Clone)]
pub struct TursoStore {
    // Keeps the database open for as long as any clone lives.
    _db: Arc<Database>,
    conn: Connection,
}

impl TursoStore {
    /// Open (or create) a local embedded database file.
    pub async fn new_local(path: &Path) -> Result<Self> {
        let db = Builder::new_local(path).build().await?;
        Self::open(db).await
    }

    /// Connect to a remote Turso database.
    pub async fn new_remote(url: &str, token: &str) -> Result<Self> {
        let db = Builder::new_remote(url.to_string(), token.to_string())
            .build()
            .await?;
        Self::open(db).await
    }

    /// Create an in-memory database (for testing).
    pub async fn new_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::open(db).await
    }

    async fn open(db: Database) -> Result<Self> {
        let conn = db.connect()?;
        let store = Self {
            _db: Arc::new(db),
            conn,
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn ensure_schema(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute(SCHEMA_EVENTS, ()).await?;
        conn.execute(INDEX_EVENTS, ()).await?;
        conn.execute(SCHEMA_CHECKPOINTS, ()).await?;
        conn.execute(SCHEMA_SUBJECTS, ()).await?;
        Ok(())
    }

    /// Append one event to the log.
    #[instrument(skip(self, event), fields(subject = %event.subject), level = "debug")]
    pub async fn append_event(&self, event: &EventRecord) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO events (subject_kind, subject_id, category, counts_for, created_at) VALUES (?, ?, ?, ?, ?)",
                libsql::params![
                    event.subject.kind.as_str(),
                    event.subject.id.clone(),
                    event.category.as_str().to_string(),
                    to_i64(event.counts_for, "counts_for")?,
                    to_micros(event.created_at)
                ],
            )
            .await?;
        Ok(())
    }

    /// Append several events, returning how many were written.
    pub async fn append_events(&self, events: &[EventRecord]) -> Result<usize> {
        for event in events {
            self.append_event(event).await?;
        }
        Ok(events.len())
    }

    /// Insert or replace a subject's denormalized fields.
    #[instrument(skip(self, subject), fields(subject = %subject.key), level = "debug")]
    pub async fn upsert_subject(&self, subject: &SubjectContext) -> Result<()> {
        self.conn()
            .execute(
                UPSERT_SUBJECT,
                libsql::params![
                    subject.key.kind.as_str(),
                    subject.key.id.clone(),
                    to_micros(subject.created_at),
                    subject.published_at.map(to_micros),
                    subject.body.clone(),
                    subject.author.clone(),
                    to_i64(subject.magnitude, "magnitude")?
                ],
            )
            .await?;
        Ok(())
    }

    /// Update a subject's magnitude. Returns `false` when the subject does not exist.
    #[instrument(skip(self), level = "debug")]
    pub async fn set_magnitude(&self, key: &SubjectKey, magnitude: u64) -> Result<bool> {
        let changed = self
            .conn()
            .execute(
                "UPDATE subjects SET magnitude = ? WHERE subject_kind = ? AND subject_id = ?",
                libsql::params![
                    to_i64(magnitude, "magnitude")?,
                    key.kind.as_str(),
                    key.id.clone()
                ],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn sum_events(
        &self,
        subject: &SubjectKey,
        category: &Category,
        window: TimeWindow,
    ) -> Result<u64> {
        let after = window.after.map(to_micros).unwrap_or(i64::MIN);
        let until = window.until.map(to_micros).unwrap_or(i64::MAX);
        let mut rows = self
            .conn()
            .query(
                SUM_EVENTS,
                libsql::params![
                    subject.kind.as_str(),
                    subject.id.clone(),
                    category.as_str().to_string(),
                    after,
                    until
                ],
            )
            .await?;

        let total: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        u64::try_from(total).map_err(|_| Error::InvalidData(format!("negative sum {total}")))
    }

    async fn read_checkpoint(&self, subject: &SubjectKey) -> Result<Option<Checkpoint>> {
        let mut rows = self
            .conn()
            .query(
                "SELECT last_tabulated_at, cumulative_counts, derived_metric FROM checkpoints WHERE subject_kind = ? AND subject_id = ?",
                libsql::params![subject.kind.as_str(), subject.id.clone()],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let last_tabulated_at: Option<i64> = row.get(0)?;
        let counts_json: String = row.get(1)?;
        let derived_metric: f64 = row.get(2)?;

        Ok(Some(Checkpoint {
            subject: subject.clone(),
            last_tabulated_at: last_tabulated_at.map(from_micros).transpose()?,
            cumulative_counts: serde_json::from_str::<CategoryCounts>(&counts_json)?,
            derived_metric,
        }))
    }

    /// Returns `false` when a newer checkpoint is already stored.
    async fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<bool> {
        let counts_json = serde_json::to_string(&checkpoint.cumulative_counts)?;
        let changed = self
            .conn()
            .execute(
                UPSERT_CHECKPOINT,
                libsql::params![
                    checkpoint.subject.kind.as_str(),
                    checkpoint.subject.id.clone(),
                    checkpoint.last_tabulated_at.map(to_micros),
                    counts_json,
                    checkpoint.derived_metric
                ],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn load_subject(&self, key: &SubjectKey) -> Result<Option<SubjectContext>> {
        let mut rows = self
            .conn()
            .query(
                "SELECT created_at, published_at, body, author, magnitude FROM subjects WHERE subject_kind = ? AND subject_id = ?",
                libsql::params![key.kind.as_str(), key.id.clone()],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let created_at: i64 = row.get(0)?;
        let published_at: Option<i64> = row.get(1)?;
        let body: Option<String> = row.get(2)?;
        let author: Option<String> = row.get(3)?;
        let magnitude: i64 = row.get(4)?;

        Ok(Some(SubjectContext {
            key: key.clone(),
            created_at: from_micros(created_at)?,
            published_at: published_at.map(from_micros).transpose()?,
            body,
            author,
            magnitude: u64::try_from(magnitude)
                .map_err(|_| Error::InvalidData(format!("negative magnitude for {key}")))?,
        }))
    }

    async fn list_subjects(&self, kind: SubjectKind) -> Result<Vec<SubjectKey>> {
        let mut rows = self
            .conn()
            .query(
                "SELECT subject_id FROM subjects WHERE subject_kind = ? ORDER BY subject_id",
                [kind.as_str()],
            )
            .await?;

        let mut keys = Vec::new();
        while let Some(row) = rows.next().await? {
            let id: String = row.get(0)?;
            keys.push(SubjectKey::new(kind, id));
        }
        Ok(keys)
    }
}

impl std::fmt::Debug for TursoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TursoStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl EventCounter for TursoStore {
    #[instrument(skip(self), level = "debug")]
    async fn sum_window(
        &self,
        subject: &SubjectKey,
        category: &Category,
        window: TimeWindow,
    ) -> tally_core::Result<u64> {
        Ok(self.sum_events(subject, category, window).await?)
    }
}

#[async_trait]
impl CheckpointStore for TursoStore {
    #[instrument(skip(self), level = "debug")]
    async fn read(&self, subject: &SubjectKey) -> tally_core::Result<Checkpoint> {
        Ok(self
            .read_checkpoint(subject)
            .await?
            .unwrap_or_else(|| Checkpoint::empty(subject.clone())))
    }

    #[instrument(skip(self, checkpoint), fields(subject = %checkpoint.subject), level = "debug")]
    async fn commit(&self, checkpoint: &Checkpoint) -> tally_core::Result<()> {
        if self.write_checkpoint(checkpoint).await? {
            debug!(derived_metric = checkpoint.derived_metric, "checkpoint stored");
            Ok(())
        } else {
            Err(TallyError::Conflict(format!(
                "a newer checkpoint for {} is already stored",
                checkpoint.subject
            )))
        }
    }
}

#[async_trait]
impl SubjectSource for TursoStore {
    #[instrument(skip(self), level = "debug")]
    async fn load(&self, subject: &SubjectKey) -> tally_core::Result<Option<SubjectContext>> {
        Ok(self.load_subject(subject).await?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn list(&self, kind: SubjectKind) -> tally_core::Result<Vec<SubjectKey>> {
        Ok(self.list_subjects(kind).await?)
    }
}

fn to_micros(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| Error::InvalidData(format!("timestamp out of range: {micros}")))
}

fn to_i64(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::InvalidData(format!("{field} too large: {value}")))
}
