//! Scam-amount leaderboard.
//!
//! The set of entries with a scam amount is small enough to fetch whole, so
//! date filtering, sorting and paging all happen in memory after one query.

use std::cmp::Ordering;
use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::entries::{get_metadata, get_scam_amount_entries, EntryStore};
use crate::error::{TimelineError, TimelineResult};
use crate::types::{Entry, Keyed, SortDirection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DateRange {
    #[default]
    All,
    Year { year: i32 },
    /// Inclusive on both ends; a missing bound is open.
    Between {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        use chrono::Datelike;
        match self {
            Self::All => true,
            Self::Year { year } => date.year() == *year,
            Self::Between { start, end } => {
                start.is_none_or(|s| date >= s) && end.is_none_or(|e| date <= e)
            }
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Query-string form, inverse of `FromStr`.
    pub fn as_param(&self) -> String {
        match self {
            Self::All => "all".to_string(),
            Self::Year { year } => year.to_string(),
            Self::Between { start, end } => format!(
                "{}..{}",
                start.map(|d| d.to_string()).unwrap_or_default(),
                end.map(|d| d.to_string()).unwrap_or_default()
            ),
        }
    }
}

impl FromStr for DateRange {
    type Err = TimelineError;

    /// Accepts `all`, a year such as `2021`, or `START..END` where either
    /// side may be left empty.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        if s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit()) {
            let year = s
                .parse()
                .map_err(|_parse_err| TimelineError::invalid(format!("bad year {s:?}")))?;
            return Ok(Self::Year { year });
        }
        let Some((start, end)) = s.split_once("..") else {
            return Err(TimelineError::invalid(format!("unrecognised date range {s:?}")));
        };
        let parse = |part: &str| -> TimelineResult<Option<NaiveDate>> {
            let part = part.trim();
            if part.is_empty() {
                return Ok(None);
            }
            NaiveDate::parse_from_str(part, "%Y-%m-%d")
                .map(Some)
                .map_err(|e| TimelineError::invalid(format!("bad date {part:?}: {e}")))
        };
        let (start, end) = (parse(start)?, parse(end)?);
        match (start, end) {
            (None, None) => Ok(Self::All),
            (Some(s), Some(e)) if s > e => Err(TimelineError::invalid(format!(
                "date range starts after it ends ({s} > {e})"
            ))),
            _ => Ok(Self::Between { start, end }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaderboardSort {
    Date,
    #[default]
    Amount,
}

impl LeaderboardSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Amount => "amount",
        }
    }
}

impl FromStr for LeaderboardSort {
    type Err = TimelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "date" => Ok(Self::Date),
            "amount" => Ok(Self::Amount),
            other => Err(TimelineError::invalid(format!(
                "leaderboard sort must be date or amount, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardRequest {
    pub date_range: DateRange,
    pub sort_by: LeaderboardSort,
    pub sort_dir: SortDirection,
    /// 1-indexed.
    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardPage {
    pub entries: Vec<Keyed<Entry>>,
    /// Size of the date-filtered set before slicing.
    pub total_count: usize,
    pub scam_total: Decimal,
    pub page: usize,
    pub page_size: usize,
}

impl LeaderboardPage {
    pub fn total_pages(&self) -> usize {
        self.total_count.div_ceil(self.page_size.max(1))
    }

    /// Rank of the first entry on this page within the filtered set.
    pub fn first_rank(&self) -> usize {
        self.page.saturating_sub(1) * self.page_size + 1
    }
}

fn amount_of(entry: &Entry) -> Decimal {
    entry.scam_total().unwrap_or(Decimal::ZERO)
}

/// Filter, sort and page an in-memory set of scam-amount entries.
///
/// `grift_total` is reported as the total when the range is unbounded;
/// narrower ranges sum the filtered set instead.
pub fn aggregate(
    entries: Vec<Entry>,
    grift_total: Decimal,
    request: &LeaderboardRequest,
) -> TimelineResult<LeaderboardPage> {
    if request.page == 0 {
        return Err(TimelineError::invalid("leaderboard pages start at 1"));
    }
    if request.page_size == 0 {
        return Err(TimelineError::invalid("page size must be positive"));
    }

    let mut filtered: Vec<Entry> = entries
        .into_iter()
        .filter(Entry::has_scam_amount)
        .filter(|e| request.date_range.contains(e.date))
        .collect();

    filtered.sort_by(|a, b| {
        let primary = match request.sort_by {
            LeaderboardSort::Date => a.date.cmp(&b.date),
            LeaderboardSort::Amount => amount_of(a).cmp(&amount_of(b)),
        };
        let primary = match request.sort_dir {
            SortDirection::Asc => primary,
            SortDirection::Desc => primary.reverse(),
        };
        match primary {
            Ordering::Equal => a.id.cmp(&b.id),
            other => other,
        }
    });

    let scam_total = if request.date_range.is_all() {
        grift_total
    } else {
        filtered.iter().map(amount_of).sum()
    };

    let total_count = filtered.len();
    let start = (request.page - 1).saturating_mul(request.page_size);
    let entries = filtered
        .into_iter()
        .skip(start)
        .take(request.page_size)
        .map(Keyed::from_entry)
        .collect();

    Ok(LeaderboardPage {
        entries,
        total_count,
        scam_total,
        page: request.page,
        page_size: request.page_size,
    })
}

pub fn get_entries_for_leaderboard(
    conn: &Connection,
    request: &LeaderboardRequest,
) -> TimelineResult<LeaderboardPage> {
    let entries = get_scam_amount_entries(conn)?;
    let grift_total = get_metadata(conn)?.grift_total;
    aggregate(entries, grift_total, request)
}

impl EntryStore {
    pub async fn get_entries_for_leaderboard(
        &self,
        request: &LeaderboardRequest,
    ) -> TimelineResult<LeaderboardPage> {
        let request = request.clone();
        self.db()
            .call_named("leaderboard.page", move |conn| {
                get_entries_for_leaderboard(conn, &request)
            })
            .await
    }
}
