//! Persisted per-character records.
//!
//! The orchestrator reads and writes a handful of text records keyed by
//! participant id, plus a directional standing score between two
//! participants. It is agnostic to the storage engine; [`SqliteDatastore`]
//! is the shipped implementation.
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS records (
//!     owner      INTEGER NOT NULL,
//!     kind       TEXT    NOT NULL,
//!     value      TEXT    NOT NULL,
//!     updated_at TEXT    NOT NULL,
//!     PRIMARY KEY (owner, kind)
//! );
//! CREATE TABLE IF NOT EXISTS standings (
//!     subject    INTEGER NOT NULL,
//!     other      INTEGER NOT NULL,
//!     score      INTEGER NOT NULL,
//!     updated_at TEXT    NOT NULL,
//!     PRIMARY KEY (subject, other)
//! );
//! ```

use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::types::ParticipantId;

/// Standing scores are clamped to `-STANDING_LIMIT..=STANDING_LIMIT`.
pub const STANDING_LIMIT: i64 = 100;

/// Kind of persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Free-form trait description of a bot.
    PersonalityTraits,
    /// Backstory text.
    Backstory,
    /// Rolling log of recent conversation lines.
    ConversationLog,
    /// Last detected emotional state.
    EmotionalState,
    /// Id of the personality profile used for the latest reply.
    LastPersonality,
}

impl RecordKind {
    /// Column value for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PersonalityTraits => "personality_traits",
            Self::Backstory => "backstory",
            Self::ConversationLog => "conversation_log",
            Self::EmotionalState => "emotional_state",
            Self::LastPersonality => "last_personality",
        }
    }
}

/// Key/value persistence consumed by the pipeline.
pub trait Datastore: Send + Sync {
    /// Read a record.
    ///
    /// # Errors
    /// Storage failures.
    fn get(&self, owner: ParticipantId, kind: RecordKind) -> Result<Option<String>>;

    /// Replace a record.
    ///
    /// # Errors
    /// Storage failures.
    fn put(&self, owner: ParticipantId, kind: RecordKind, value: &str) -> Result<()>;

    /// Append a line to a record, keeping only the last `keep_last` lines.
    ///
    /// # Errors
    /// Storage failures.
    fn append(&self, owner: ParticipantId, kind: RecordKind, line: &str, keep_last: usize)
    -> Result<()>;

    /// How `subject` regards `other` (0 when unknown).
    ///
    /// # Errors
    /// Storage failures.
    fn standing(&self, subject: ParticipantId, other: ParticipantId) -> Result<i64>;

    /// Shift the standing by `delta` and return the clamped result.
    ///
    /// # Errors
    /// Storage failures.
    fn adjust_standing(&self, subject: ParticipantId, other: ParticipantId, delta: i64)
    -> Result<i64>;
}

/// Participant ids are opaque 64-bit values; SQLite stores signed integers.
fn key(id: ParticipantId) -> i64 {
    i64::from_ne_bytes(id.0.to_ne_bytes())
}

fn keep_tail(existing: Option<String>, line: &str, keep_last: usize) -> String {
    let mut lines: Vec<&str> = existing
        .as_deref()
        .map(|s| s.lines().collect())
        .unwrap_or_default();
    lines.push(line);
    let skip = lines.len().saturating_sub(keep_last);
    lines[skip..].join("\n")
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// [`Datastore`] on a single SQLite connection.
pub struct SqliteDatastore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDatastore").finish_non_exhaustive()
    }
}

impl SqliteDatastore {
    /// Open (or create) a database file. WAL mode is enabled.
    ///
    /// # Errors
    /// Returns [`crate::BanterError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        let store = Self::with_schema(conn)?;
        info!(path = %path.display(), "Datastore opened");
        Ok(store)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns [`crate::BanterError::Database`] on SQLite failures.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_schema(Connection::open_in_memory()?)
    }

    fn with_schema(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                owner      INTEGER NOT NULL,
                kind       TEXT    NOT NULL,
                value      TEXT    NOT NULL,
                updated_at TEXT    NOT NULL,
                PRIMARY KEY (owner, kind)
            );
            CREATE TABLE IF NOT EXISTS standings (
                subject    INTEGER NOT NULL,
                other      INTEGER NOT NULL,
                score      INTEGER NOT NULL,
                updated_at TEXT    NOT NULL,
                PRIMARY KEY (subject, other)
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn read(conn: &Connection, owner: ParticipantId, kind: RecordKind) -> Result<Option<String>> {
        Ok(conn
            .query_row(
                "SELECT value FROM records WHERE owner = ?1 AND kind = ?2",
                params![key(owner), kind.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn read_standing(conn: &Connection, subject: ParticipantId, other: ParticipantId) -> Result<i64> {
        let score: Option<i64> = conn
            .query_row(
                "SELECT score FROM standings WHERE subject = ?1 AND other = ?2",
                params![key(subject), key(other)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(score.unwrap_or(0))
    }

    fn write(conn: &Connection, owner: ParticipantId, kind: RecordKind, value: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO records (owner, kind, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(owner, kind) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            params![key(owner), kind.as_str(), value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

impl Datastore for SqliteDatastore {
    fn get(&self, owner: ParticipantId, kind: RecordKind) -> Result<Option<String>> {
        Self::read(&self.conn.lock(), owner, kind)
    }

    fn put(&self, owner: ParticipantId, kind: RecordKind, value: &str) -> Result<()> {
        Self::write(&self.conn.lock(), owner, kind, value)?;
        debug!(owner = %owner, kind = kind.as_str(), bytes = value.len(), "Record stored");
        Ok(())
    }

    fn append(
        &self,
        owner: ParticipantId,
        kind: RecordKind,
        line: &str,
        keep_last: usize,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let existing = Self::read(&tx, owner, kind)?;
        Self::write(&tx, owner, kind, &keep_tail(existing, line, keep_last))?;
        tx.commit()?;
        Ok(())
    }

    fn standing(&self, subject: ParticipantId, other: ParticipantId) -> Result<i64> {
        Self::read_standing(&self.conn.lock(), subject, other)
    }

    fn adjust_standing(
        &self,
        subject: ParticipantId,
        other: ParticipantId,
        delta: i64,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        let updated = Self::read_standing(&conn, subject, other)?
            .saturating_add(delta)
            .clamp(-STANDING_LIMIT, STANDING_LIMIT);
        conn.execute(
            "INSERT INTO standings (subject, other, score, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(subject, other) DO UPDATE SET
                score = excluded.score,
                updated_at = excluded.updated_at",
            params![key(subject), key(other), updated, Utc::now().to_rfc3339()],
        )?;
        debug!(subject = %subject, other = %other, delta, score = updated, "Standing adjusted");
        Ok(updated)
    }
}
