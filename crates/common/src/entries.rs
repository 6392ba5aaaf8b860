//! Paginated, filtered retrieval of entries.
//!
//! Pagination is keyset-only: the cursor is the id of the last entry the
//! caller has seen, and the next page starts strictly after it in sort order.
//! Results are stable as long as entries are appended and never reordered
//! while a reader is paging; concurrent edits may shift pages.

use std::collections::BTreeMap;
use std::future::Future;

use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::db::{read_grift_total, AsyncDb};
use crate::error::{TimelineError, TimelineResult};
use crate::glossary::Glossary;
use crate::query::{EntryQuery, QueryFilter};
use crate::types::{Entry, EntryId, GlossaryEntry, Keyed, Metadata, SortDirection};

/// One page of entries plus the cursor for the next one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub entries: Vec<Keyed<Entry>>,
    /// Id of the last entry when the page came back full, `None` otherwise.
    pub next_cursor: Option<String>,
    pub page_size: usize,
}

impl Page {
    /// A short page means the result set is exhausted.
    pub fn is_last(&self) -> bool {
        self.entries.len() < self.page_size
    }
}

fn page_from(entries: Vec<Entry>, page_size: usize) -> Page {
    let entries: Vec<Keyed<Entry>> = entries.into_iter().map(Keyed::from_entry).collect();
    let next_cursor = if entries.len() == page_size {
        entries.last().map(|e| e.key.clone())
    } else {
        None
    };
    Page {
        entries,
        next_cursor,
        page_size,
    }
}

fn decode_docs(docs: &[String]) -> TimelineResult<Vec<Entry>> {
    docs.iter()
        .map(|doc| serde_json::from_str::<Entry>(doc).map_err(TimelineError::from))
        .collect()
}

/// Fetch up to `page_size` entries matching `query`, strictly after `cursor`.
pub fn get_entries(
    conn: &Connection,
    query: &EntryQuery,
    cursor: Option<&EntryId>,
    page_size: usize,
) -> TimelineResult<Page> {
    if page_size == 0 {
        return Err(TimelineError::invalid("page size must be positive"));
    }

    let mut sql = String::from("SELECT e.doc FROM entries e WHERE 1=1");
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    match &query.filter {
        QueryFilter::None => {}
        QueryFilter::Category(category) => {
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM entry_filters f WHERE f.entry_id = e.id AND f.kind = ?{} AND f.value = ?{})",
                params.len() + 1,
                params.len() + 2
            ));
            params.push(Box::new(category.kind.as_str()));
            params.push(Box::new(category.value.clone()));
        }
        QueryFilter::Starred => sql.push_str(" AND e.starred = 1"),
    }

    if let Some(collection) = &query.collection {
        sql.push_str(&format!(
            " AND EXISTS (SELECT 1 FROM entry_collections c WHERE c.entry_id = e.id AND c.collection = ?{})",
            params.len() + 1
        ));
        params.push(Box::new(collection.clone()));
    }

    // Dates sort in the requested direction; within a date the sequence
    // always ascends, so the keyset predicate differs only in the date test.
    if let Some(cursor) = cursor {
        let date_cmp = match query.sort {
            SortDirection::Asc => ">",
            SortDirection::Desc => "<",
        };
        let d = params.len() + 1;
        let s = params.len() + 2;
        sql.push_str(&format!(
            " AND (e.date {date_cmp} ?{d} OR (e.date = ?{d} AND e.seq > ?{s}))"
        ));
        params.push(Box::new(cursor.date().format("%Y-%m-%d").to_string()));
        params.push(Box::new(cursor.seq()));
    }

    sql.push_str(&format!(
        " ORDER BY e.date {}, e.seq ASC LIMIT ?{}",
        query.sort.as_sql(),
        params.len() + 1
    ));
    params.push(Box::new(i64::try_from(page_size).unwrap_or(i64::MAX)));

    let param_refs: Vec<&dyn ToSql> = params.iter().map(AsRef::as_ref).collect();
    let mut stmt = conn.prepare(&sql)?;
    let docs = stmt
        .query_map(param_refs.as_slice(), |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(page_from(decode_docs(&docs)?, page_size))
}

/// Unfiltered paging for linear, server-rendered browsing.
pub fn get_all_entries(
    conn: &Connection,
    cursor: Option<&EntryId>,
    direction: SortDirection,
    page_size: usize,
) -> TimelineResult<Page> {
    get_entries(conn, &EntryQuery::all(direction), cursor, page_size)
}

pub fn resolve_readable_id(conn: &Connection, readable_id: &str) -> TimelineResult<EntryId> {
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM entries WHERE readable_id = ?1",
            [readable_id],
            |r| r.get(0),
        )
        .optional()?;
    match id {
        Some(id) => id.parse(),
        None => Err(TimelineError::not_found(readable_id)),
    }
}

pub fn get_entry(conn: &Connection, id: &EntryId) -> TimelineResult<Entry> {
    let doc: Option<String> = conn
        .query_row(
            "SELECT doc FROM entries WHERE id = ?1",
            [id.to_string()],
            |r| r.get(0),
        )
        .optional()?;
    match doc {
        Some(doc) => Ok(serde_json::from_str(&doc)?),
        None => Err(TimelineError::not_found(id.to_string())),
    }
}

pub fn get_entry_by_readable_id(conn: &Connection, readable_id: &str) -> TimelineResult<Entry> {
    let id = resolve_readable_id(conn, readable_id)?;
    get_entry(conn, &id)
}

/// Every entry that participates in grift totals. Unpaginated.
pub fn get_scam_amount_entries(conn: &Connection) -> TimelineResult<Vec<Entry>> {
    let mut stmt = conn.prepare(
        "SELECT doc FROM entries WHERE has_scam_amount = 1 ORDER BY date ASC, seq ASC",
    )?;
    let docs = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    decode_docs(&docs)
}

pub fn get_metadata(conn: &Connection) -> TimelineResult<Metadata> {
    let grift_total = read_grift_total(conn)?;
    let mut stmt = conn.prepare("SELECT key, label FROM collection_labels ORDER BY key")?;
    let collections = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
    Ok(Metadata {
        grift_total,
        collections,
    })
}

pub fn get_glossary(conn: &Connection) -> TimelineResult<Glossary> {
    let mut stmt = conn.prepare("SELECT id, term, definition FROM glossary")?;
    let entries = stmt
        .query_map([], |row| {
            Ok(GlossaryEntry {
                id: row.get(0)?,
                term: row.get(1)?,
                definition: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Glossary::new(entries))
}

/// Distinct tag values per category, for building filter menus.
pub fn get_filter_values(conn: &Connection) -> TimelineResult<Vec<(String, Vec<String>)>> {
    let mut stmt =
        conn.prepare("SELECT DISTINCT kind, value FROM entry_filters ORDER BY kind, value")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for (kind, value) in rows {
        match grouped.last_mut() {
            Some((k, values)) if *k == kind => values.push(value),
            _ => grouped.push((kind, vec![value])),
        }
    }
    Ok(grouped)
}

/// Anything that can hand out pages of entries. The scroll controller is
/// written against this so it can be driven by the store or by a fake.
pub trait PageSource {
    fn fetch_page(
        &self,
        query: &EntryQuery,
        cursor: Option<&EntryId>,
        page_size: usize,
    ) -> impl Future<Output = TimelineResult<Page>> + Send;
}

/// Async entry store over the shared SQLite connection.
#[derive(Clone)]
pub struct EntryStore {
    db: AsyncDb,
    max_page_size: usize,
}

impl EntryStore {
    pub fn new(db: AsyncDb, max_page_size: usize) -> Self {
        Self {
            db,
            max_page_size: max_page_size.max(1),
        }
    }

    fn clamp(&self, page_size: usize) -> usize {
        page_size.clamp(1, self.max_page_size)
    }

    pub async fn get_entries(
        &self,
        query: &EntryQuery,
        cursor: Option<&EntryId>,
        page_size: usize,
    ) -> TimelineResult<Page> {
        let query = query.clone();
        let cursor = cursor.copied();
        let page_size = self.clamp(page_size);
        self.db
            .call_named("entries.page", move |conn| {
                get_entries(conn, &query, cursor.as_ref(), page_size)
            })
            .await
    }

    pub async fn get_all_entries(
        &self,
        cursor: Option<&EntryId>,
        direction: SortDirection,
        page_size: usize,
    ) -> TimelineResult<Page> {
        let cursor = cursor.copied();
        let page_size = self.clamp(page_size);
        self.db
            .call_named("entries.all", move |conn| {
                get_all_entries(conn, cursor.as_ref(), direction, page_size)
            })
            .await
    }

    pub async fn get_entry_by_readable_id(&self, readable_id: &str) -> TimelineResult<Entry> {
        let readable_id = readable_id.to_string();
        self.db
            .call_named("entries.by_readable_id", move |conn| {
                get_entry_by_readable_id(conn, &readable_id)
            })
            .await
    }

    pub async fn get_entry(&self, id: &EntryId) -> TimelineResult<Entry> {
        let id = *id;
        self.db
            .call_named("entries.by_id", move |conn| get_entry(conn, &id))
            .await
    }

    pub async fn get_metadata(&self) -> TimelineResult<Metadata> {
        self.db
            .call_named("metadata.get", |conn| get_metadata(conn))
            .await
    }

    pub async fn get_glossary(&self) -> TimelineResult<Glossary> {
        self.db
            .call_named("glossary.get", |conn| get_glossary(conn))
            .await
    }

    pub async fn get_filter_values(&self) -> TimelineResult<Vec<(String, Vec<String>)>> {
        self.db
            .call_named("filters.values", |conn| get_filter_values(conn))
            .await
    }

    pub fn db(&self) -> &AsyncDb {
        &self.db
    }
}

impl PageSource for EntryStore {
    fn fetch_page(
        &self,
        query: &EntryQuery,
        cursor: Option<&EntryId>,
        page_size: usize,
    ) -> impl Future<Output = TimelineResult<Page>> + Send {
        let store = self.clone();
        let query = query.clone();
        let cursor = cursor.copied();
        async move { store.get_entries(&query, cursor.as_ref(), page_size).await }
    }
}
