//! Infinite-scroll state machine.
//!
//! ```text
//!            sentinel visible               full page
//!   Idle ───────────────────────▶ Fetching ───────────▶ Idle
//!   Error ──────────────────────▶    │  short page
//!                                    ├──────────────▶ Exhausted
//!                                    │  fetch failed
//!                                    └──────────────▶ Error
//! ```
//!
//! Every fetch carries the generation it was issued under. Changing the
//! filter bumps the generation, so a response for a superseded filter is
//! dropped instead of being appended to the new list.

use std::collections::HashSet;

use crate::entries::{Page, PageSource};
use crate::error::TimelineError;
use crate::query::EntryQuery;
use crate::types::{Entry, EntryId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollState {
    Idle,
    Fetching,
    Exhausted,
    Error,
}

/// Permission to run exactly one fetch. Hand it back to
/// [`ScrollController::resolve`] with the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    generation: u64,
    pub query: EntryQuery,
    pub cursor: Option<EntryId>,
    pub page_size: usize,
}

/// What happened to a resolved fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Entries appended; more may follow.
    Appended { added: usize },
    /// Entries appended; the result set is done.
    Exhausted { added: usize },
    /// The fetch failed and nothing changed.
    Failed,
    /// The ticket belonged to a superseded filter or was already resolved.
    Stale,
}

#[derive(Debug)]
pub struct ScrollController {
    query: EntryQuery,
    page_size: usize,
    state: ScrollState,
    generation: u64,
    in_flight: bool,
    cursor: Option<EntryId>,
    entries: Vec<Entry>,
    seen: HashSet<EntryId>,
    last_error: Option<TimelineError>,
}

impl ScrollController {
    pub fn new(query: EntryQuery, page_size: usize) -> Self {
        Self {
            query,
            page_size: page_size.max(1),
            state: ScrollState::Idle,
            generation: 0,
            in_flight: false,
            cursor: None,
            entries: Vec::new(),
            seen: HashSet::new(),
            last_error: None,
        }
    }

    pub fn state(&self) -> ScrollState {
        self.state
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn cursor(&self) -> Option<&EntryId> {
        self.cursor.as_ref()
    }

    pub fn query(&self) -> &EntryQuery {
        &self.query
    }

    pub fn last_error(&self) -> Option<&TimelineError> {
        self.last_error.as_ref()
    }

    fn issue(&mut self) -> FetchTicket {
        self.state = ScrollState::Fetching;
        self.in_flight = true;
        FetchTicket {
            generation: self.generation,
            query: self.query.clone(),
            cursor: self.cursor,
            page_size: self.page_size,
        }
    }

    /// The sentinel scrolled into view. Returns a ticket if a fetch should start.
    pub fn on_sentinel_visible(&mut self) -> Option<FetchTicket> {
        match self.state {
            ScrollState::Idle | ScrollState::Error => Some(self.issue()),
            ScrollState::Fetching | ScrollState::Exhausted => None,
        }
    }

    /// Swap in a new filter. The list and cursor are cleared and the first
    /// page is requested straight away; any fetch still in flight is now stale.
    pub fn change_filter(&mut self, query: EntryQuery) -> FetchTicket {
        self.generation += 1;
        self.query = query;
        self.cursor = None;
        self.entries.clear();
        self.seen.clear();
        self.last_error = None;
        self.state = ScrollState::Idle;
        tracing::debug!(generation = self.generation, "scroll filter changed");
        self.issue()
    }

    pub fn resolve(
        &mut self,
        ticket: &FetchTicket,
        outcome: Result<Page, TimelineError>,
    ) -> Resolution {
        if ticket.generation != self.generation || !self.in_flight {
            tracing::debug!(
                ticket = ticket.generation,
                current = self.generation,
                "dropping stale page"
            );
            return Resolution::Stale;
        }
        self.in_flight = false;

        let page = match outcome {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(error = %err, "page fetch failed");
                self.last_error = Some(err);
                self.state = ScrollState::Error;
                return Resolution::Failed;
            }
        };

        let last = page.is_last();
        let mut added = 0;
        for keyed in page.entries {
            let entry = keyed.item;
            self.cursor = Some(entry.id);
            if self.seen.insert(entry.id) {
                self.entries.push(entry);
                added += 1;
            }
        }
        self.last_error = None;

        // The store may clamp the requested size, so judge by what it served.
        if last {
            self.state = ScrollState::Exhausted;
            Resolution::Exhausted { added }
        } else {
            self.state = ScrollState::Idle;
            Resolution::Appended { added }
        }
    }

    /// Drive one sentinel trigger against `source`. Returns `None` when no
    /// fetch was due.
    pub async fn load_next<S: PageSource>(&mut self, source: &S) -> Option<Resolution> {
        let ticket = self.on_sentinel_visible()?;
        let outcome = source
            .fetch_page(&ticket.query, ticket.cursor.as_ref(), ticket.page_size)
            .await;
        Some(self.resolve(&ticket, outcome))
    }
}
