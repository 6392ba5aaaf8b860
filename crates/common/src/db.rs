use std::str::FromStr;

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

use crate::error::{TimelineError, TimelineResult};
use crate::types::{Entry, GlossaryEntry};

/// Synchronous handle, used by the curator CLI and by tests.
pub struct Database {
    pub conn: Connection,
}

/// Async database wrapper around `tokio_rusqlite::Connection`.
///
/// Runs all SQLite operations on a dedicated background thread via
/// `tokio_rusqlite`, keeping the Tokio runtime cooperative. Clone is
/// cheap (shared mpsc sender to the background thread).
#[derive(Clone)]
pub struct AsyncDb {
    conn: tokio_rusqlite::Connection,
}

impl AsyncDb {
    /// Open a database at `path`, set PRAGMAs and run migrations on the
    /// background thread.
    pub async fn open(path: &str) -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open(path).await?;

        // The curator may hold the write lock while importing. Retry migrations
        // with backoff instead of failing startup on `database is locked`.
        let mut backoff = std::time::Duration::from_millis(250);
        let max_backoff = std::time::Duration::from_secs(10);
        let max_total_wait = std::time::Duration::from_secs(120);
        let start = std::time::Instant::now();

        loop {
            let res = conn
                .call(|conn| -> std::result::Result<(), rusqlite::Error> {
                    conn.busy_timeout(std::time::Duration::from_secs(1))?;
                    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
                    conn.execute_batch(SCHEMA)?;
                    conn.busy_timeout(std::time::Duration::from_secs(30))?;
                    Ok(())
                })
                .await;

            match res {
                Ok(()) => break,
                Err(tokio_rusqlite::Error::Error(err)) => {
                    if !is_locked(&err) {
                        return Err(
                            anyhow::Error::from(err).context("AsyncDb::open: migration failed")
                        );
                    }
                    if start.elapsed() >= max_total_wait {
                        return Err(anyhow::Error::from(err).context(
                            "AsyncDb::open: migration failed (database stayed locked too long)",
                        ));
                    }
                    tracing::warn!(
                        wait_for = ?backoff,
                        "AsyncDb::open: database is locked; retrying migrations"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
                Err(other) => return Err(anyhow::anyhow!("AsyncDb::open: {other}")),
            }
        }

        Ok(Self { conn })
    }

    /// Run a closure on the background SQLite thread and return the result.
    pub async fn call<F, R>(&self, function: F) -> TimelineResult<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> TimelineResult<R> + Send + 'static,
        R: Send + 'static,
    {
        self.conn.call(move |conn| function(conn)).await.map_err(
            |e: tokio_rusqlite::Error<TimelineError>| match e {
                tokio_rusqlite::Error::ConnectionClosed => {
                    TimelineError::TransientFetch("database connection closed".to_string())
                }
                tokio_rusqlite::Error::Close((_, err)) => {
                    TimelineError::TransientFetch(format!("database close error: {err}"))
                }
                tokio_rusqlite::Error::Error(err) => err,
                other => TimelineError::TransientFetch(format!("database error: {other}")),
            },
        )
    }

    /// Like [`Self::call`], but records Prometheus metrics for DB latency and errors.
    ///
    /// Latency is wall-clock, including queueing on the SQLite thread.
    pub async fn call_named<F, R>(&self, op: &'static str, function: F) -> TimelineResult<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> TimelineResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let start = std::time::Instant::now();
        let res = self.call(function).await;
        let ms = start.elapsed().as_secs_f64() * 1000.0;

        let status = if res.is_ok() { "ok" } else { "err" };
        metrics::histogram!(
            "timeline_db_query_latency_ms",
            "op" => op,
            "status" => status
        )
        .record(ms);
        if let Err(err) = &res {
            metrics::counter!(
                "timeline_db_query_errors_total",
                "op" => op,
                "kind" => err.code()
            )
            .increment(1);
        }

        res
    }
}

fn is_locked(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::DatabaseBusy
                    | rusqlite::ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    pub fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }
}

/// Whether an upsert created a new document or replaced one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

/// Insert or replace an entry document and its index rows, keeping the
/// metadata grift total in step with the scam amounts stored.
pub fn upsert_entry(conn: &mut Connection, entry: &Entry) -> TimelineResult<UpsertOutcome> {
    if entry.id.date() != entry.date {
        return Err(TimelineError::invalid(format!(
            "entry {} is dated {} but its id carries {}",
            entry.id,
            entry.date,
            entry.id.date()
        )));
    }
    if entry.readable_id.trim().is_empty() {
        return Err(TimelineError::invalid(format!(
            "entry {} has no readable id",
            entry.id
        )));
    }

    let id = entry.id.to_string();
    let doc = serde_json::to_string(entry)?;
    let tx = conn.transaction()?;

    let clash: Option<String> = tx
        .query_row(
            "SELECT id FROM entries WHERE readable_id = ?1 AND id != ?2",
            params![entry.readable_id, id],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(other) = clash {
        return Err(TimelineError::invalid(format!(
            "readable id {:?} already belongs to {other}",
            entry.readable_id
        )));
    }

    let previous: Option<String> = tx
        .query_row("SELECT doc FROM entries WHERE id = ?1", [&id], |r| r.get(0))
        .optional()?;
    let previous_total = match &previous {
        Some(doc) => serde_json::from_str::<Entry>(doc)?
            .scam_total()
            .unwrap_or(Decimal::ZERO),
        None => Decimal::ZERO,
    };

    tx.execute(
        "INSERT INTO entries (id, readable_id, date, seq, starred, has_scam_amount, doc, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))
         ON CONFLICT(id) DO UPDATE SET
            readable_id = excluded.readable_id,
            date = excluded.date,
            seq = excluded.seq,
            starred = excluded.starred,
            has_scam_amount = excluded.has_scam_amount,
            doc = excluded.doc,
            updated_at = excluded.updated_at",
        params![
            id,
            entry.readable_id,
            entry.date.format("%Y-%m-%d").to_string(),
            entry.id.seq(),
            entry.is_starred(),
            entry.has_scam_amount(),
            doc,
        ],
    )?;

    tx.execute("DELETE FROM entry_filters WHERE entry_id = ?1", [&id])?;
    tx.execute("DELETE FROM entry_collections WHERE entry_id = ?1", [&id])?;
    {
        let mut insert_filter = tx.prepare(
            "INSERT OR IGNORE INTO entry_filters (entry_id, kind, value) VALUES (?1, ?2, ?3)",
        )?;
        for (kind, value) in entry.filters.tags() {
            insert_filter.execute(params![id, kind.as_str(), value])?;
        }
        let mut insert_collection = tx.prepare(
            "INSERT OR IGNORE INTO entry_collections (entry_id, collection) VALUES (?1, ?2)",
        )?;
        for collection in &entry.collection {
            insert_collection.execute(params![id, collection])?;
        }
    }

    let delta = entry.scam_total().unwrap_or(Decimal::ZERO) - previous_total;
    if !delta.is_zero() {
        let total = read_grift_total(&tx)? + delta;
        write_grift_total(&tx, total)?;
    }

    tx.commit()?;

    Ok(if previous.is_some() {
        UpsertOutcome::Replaced
    } else {
        UpsertOutcome::Inserted
    })
}

pub fn put_glossary_entry(conn: &Connection, entry: &GlossaryEntry) -> TimelineResult<()> {
    conn.execute(
        "INSERT INTO glossary (id, term, definition) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET term = excluded.term, definition = excluded.definition",
        params![entry.id, entry.term, entry.definition],
    )?;
    Ok(())
}

pub fn set_collection_label(conn: &Connection, key: &str, label: &str) -> TimelineResult<()> {
    conn.execute(
        "INSERT INTO collection_labels (key, label) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET label = excluded.label",
        params![key, label],
    )?;
    Ok(())
}

/// Rebuild the grift total from scratch. Returns the new total.
pub fn recompute_grift_total(conn: &Connection) -> TimelineResult<Decimal> {
    let mut stmt = conn.prepare("SELECT doc FROM entries WHERE has_scam_amount = 1")?;
    let docs = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut total = Decimal::ZERO;
    for doc in docs {
        let entry: Entry = serde_json::from_str(&doc)?;
        total += entry.scam_total().unwrap_or(Decimal::ZERO);
    }
    write_grift_total(conn, total)?;
    Ok(total)
}

pub(crate) fn read_grift_total(conn: &Connection) -> TimelineResult<Decimal> {
    let raw: String = conn.query_row("SELECT grift_total FROM metadata WHERE id = 1", [], |r| {
        r.get(0)
    })?;
    Decimal::from_str(&raw)
        .map_err(|e| TimelineError::TransientFetch(format!("corrupt grift total {raw:?}: {e}")))
}

fn write_grift_total(conn: &Connection, total: Decimal) -> TimelineResult<()> {
    conn.execute(
        "UPDATE metadata SET grift_total = ?1 WHERE id = 1",
        [total.to_string()],
    )?;
    Ok(())
}

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS entries (
    id              TEXT PRIMARY KEY,
    readable_id     TEXT NOT NULL UNIQUE,
    date            TEXT NOT NULL,
    seq             INTEGER NOT NULL,
    starred         INTEGER NOT NULL DEFAULT 0,
    has_scam_amount INTEGER NOT NULL DEFAULT 0,
    doc             TEXT NOT NULL,
    updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_date_seq ON entries(date, seq);
CREATE INDEX IF NOT EXISTS idx_entries_starred ON entries(starred, date, seq);
CREATE INDEX IF NOT EXISTS idx_entries_scam ON entries(has_scam_amount);

CREATE TABLE IF NOT EXISTS entry_filters (
    entry_id TEXT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
    kind     TEXT NOT NULL CHECK (kind IN ('theme', 'tech', 'blockchain')),
    value    TEXT NOT NULL,
    PRIMARY KEY (entry_id, kind, value)
);
CREATE INDEX IF NOT EXISTS idx_entry_filters_kind_value ON entry_filters(kind, value);

CREATE TABLE IF NOT EXISTS entry_collections (
    entry_id   TEXT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
    collection TEXT NOT NULL,
    PRIMARY KEY (entry_id, collection)
);
CREATE INDEX IF NOT EXISTS idx_entry_collections_collection ON entry_collections(collection);

CREATE TABLE IF NOT EXISTS metadata (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    grift_total TEXT NOT NULL DEFAULT '0'
);
INSERT OR IGNORE INTO metadata (id, grift_total) VALUES (1, '0');

CREATE TABLE IF NOT EXISTS collection_labels (
    key   TEXT PRIMARY KEY,
    label TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS glossary (
    id         TEXT PRIMARY KEY,
    term       TEXT NOT NULL,
    definition TEXT NOT NULL
);
";

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::*;
    use crate::types::{Filters, ScamAmountDetails};

    pub fn memory_db() -> Database {
        let db = Database::open_memory().unwrap();
        db.run_migrations().unwrap();
        db
    }

    /// Minimal entry for `id`, with an optional scam amount in whole dollars.
    pub fn entry(id: &str, amount: Option<i64>) -> Entry {
        let id: crate::types::EntryId = id.parse().unwrap();
        Entry {
            id,
            readable_id: format!("entry-{id}"),
            title: format!("Entry {id}"),
            short_title: None,
            date: id.date(),
            body: String::new(),
            filters: Filters::default(),
            collection: vec![],
            starred: None,
            scam_amount_details: amount.map(|a| ScamAmountDetails {
                total: Decimal::from(a),
                has_scam_amount: true,
                pre_recovery_amount: Decimal::from(a),
                lower_bound: None,
                upper_bound: None,
                recovered: None,
                text_override: None,
            }),
            image: None,
            links: vec![],
        }
    }

    pub fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let db = memory_db();
        db.run_migrations().unwrap();
        let total = read_grift_total(&db.conn).unwrap();
        assert_eq!(total, Decimal::ZERO);
    }

    #[test]
    fn test_upsert_tracks_grift_total() {
        let mut db = memory_db();
        let outcome = upsert_entry(&mut db.conn, &entry("2021-01-01-0", Some(100))).unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);
        upsert_entry(&mut db.conn, &entry("2022-01-01-0", Some(200))).unwrap();
        upsert_entry(&mut db.conn, &entry("2022-01-02-0", None)).unwrap();
        assert_eq!(read_grift_total(&db.conn).unwrap(), Decimal::from(300));

        // Re-import with a corrected figure replaces, not adds.
        let outcome = upsert_entry(&mut db.conn, &entry("2021-01-01-0", Some(150))).unwrap();
        assert_eq!(outcome, UpsertOutcome::Replaced);
        assert_eq!(read_grift_total(&db.conn).unwrap(), Decimal::from(350));
        assert_eq!(recompute_grift_total(&db.conn).unwrap(), Decimal::from(350));
    }

    #[test]
    fn test_upsert_rejects_date_mismatch() {
        let mut db = memory_db();
        let mut e = entry("2021-01-01-0", None);
        e.date = date("2021-01-02");
        let err = upsert_entry(&mut db.conn, &e).unwrap_err();
        assert!(matches!(err, TimelineError::InvalidQuery(_)));
    }

    #[test]
    fn test_upsert_rejects_readable_id_clash() {
        let mut db = memory_db();
        let mut a = entry("2021-01-01-0", None);
        a.readable_id = "same".into();
        let mut b = entry("2021-01-01-1", None);
        b.readable_id = "same".into();
        upsert_entry(&mut db.conn, &a).unwrap();
        let err = upsert_entry(&mut db.conn, &b).unwrap_err();
        assert!(matches!(err, TimelineError::InvalidQuery(_)));
    }

    #[test]
    fn test_upsert_rewrites_index_rows() {
        let mut db = memory_db();
        let mut e = entry("2021-01-01-0", None);
        e.filters.theme = vec!["rugpull".into(), "hack".into()];
        e.collection = vec!["defi".into()];
        upsert_entry(&mut db.conn, &e).unwrap();

        e.filters.theme = vec!["hack".into()];
        e.collection = vec![];
        upsert_entry(&mut db.conn, &e).unwrap();

        let filters: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM entry_filters", [], |r| r.get(0))
            .unwrap();
        let collections: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM entry_collections", [], |r| r.get(0))
            .unwrap();
        assert_eq!(filters, 1);
        assert_eq!(collections, 0);
    }

    #[tokio::test]
    async fn test_async_open_file_db() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("timeline.db");
        let db = AsyncDb::open(path.to_str().unwrap()).await.unwrap();
        let total = db.call(|conn| read_grift_total(conn)).await.unwrap();
        assert_eq!(total, Decimal::ZERO);
    }
}
