use std::collections::BTreeMap;
use std::io::Write;

use anyhow::{anyhow, Context, Result};
use common::config::Config;
use common::db::{
    put_glossary_entry, recompute_grift_total, set_collection_label, upsert_entry, Database,
    UpsertOutcome,
};
use common::entries::{get_entry_by_readable_id, get_metadata, PageSource};
use common::leaderboard::{get_entries_for_leaderboard, DateRange, LeaderboardRequest};
use common::query::{build_query, EntryQuery, FilterSelection, RawFilterParams};
use common::scroll::{Resolution, ScrollController};
use common::types::{format_usd, Entry, GlossaryEntry, SortDirection};

const USAGE: &str = "usage: curator <import FILE | glossary FILE | collections FILE | \
entries [--theme X|--tech X|--blockchain X|--starred] [--collection X] [--asc] | \
leaderboard [RANGE] | entry READABLE_ID | recompute>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Import { path: String },
    Glossary { path: String },
    Collections { path: String },
    Entries { query: EntryQuery },
    Leaderboard { range: DateRange },
    Entry { readable_id: String },
    Recompute,
}

fn file_arg<I>(args: &mut I, cmd: &str) -> std::result::Result<String, String>
where
    I: Iterator<Item = String>,
{
    args.next()
        .ok_or_else(|| format!("usage: curator {cmd} <file.json>"))
}

fn parse_entries_flags<I>(args: I) -> std::result::Result<EntryQuery, String>
where
    I: Iterator<Item = String>,
{
    let mut raw = RawFilterParams::default();
    let mut args = args.peekable();
    while let Some(flag) = args.next() {
        let slot = match flag.as_str() {
            "--theme" => &mut raw.theme,
            "--tech" => &mut raw.tech,
            "--blockchain" => &mut raw.blockchain,
            "--collection" => &mut raw.collection,
            "--starred" => {
                raw.starred = Some("true".to_string());
                continue;
            }
            "--asc" => {
                raw.sort = Some("asc".to_string());
                continue;
            }
            other => return Err(format!("unknown flag: {other}")),
        };
        let value = args
            .next()
            .ok_or_else(|| format!("{flag} needs a value"))?;
        *slot = Some(value);
    }
    let selection = FilterSelection::from_params(&raw).map_err(|e| e.to_string())?;
    build_query(&selection).map_err(|e| e.to_string())
}

pub fn parse_args<I>(mut args: I) -> std::result::Result<Command, String>
where
    I: Iterator<Item = String>,
{
    // Drop argv[0].
    let _ = args.next();

    let Some(cmd) = args.next() else {
        return Err(USAGE.to_string());
    };

    match cmd.as_str() {
        "import" => Ok(Command::Import {
            path: file_arg(&mut args, "import")?,
        }),
        "glossary" => Ok(Command::Glossary {
            path: file_arg(&mut args, "glossary")?,
        }),
        "collections" => Ok(Command::Collections {
            path: file_arg(&mut args, "collections")?,
        }),
        "entries" => Ok(Command::Entries {
            query: parse_entries_flags(args)?,
        }),
        "leaderboard" => {
            let range = args
                .next()
                .unwrap_or_default()
                .parse()
                .map_err(|e: common::error::TimelineError| e.to_string())?;
            Ok(Command::Leaderboard { range })
        }
        "entry" => {
            let readable_id = args
                .next()
                .ok_or_else(|| "usage: curator entry <readable-id>".to_string())?;
            Ok(Command::Entry { readable_id })
        }
        "recompute" => Ok(Command::Recompute),
        other => Err(format!("unknown command: {other}\n{USAGE}")),
    }
}

/// Run a command against the synchronous database. `Entries` is async and
/// goes through [`print_timeline`] instead.
pub fn run_command<W: Write>(
    db: &mut Database,
    cmd: Command,
    config: &Config,
    out: &mut W,
) -> Result<()> {
    match cmd {
        Command::Import { path } => {
            let entries: Vec<Entry> = read_json(&path)?;
            let summary = import_entries(db, &entries)?;
            writeln!(
                out,
                "imported {} new, {} replaced; grift total {}",
                summary.inserted,
                summary.replaced,
                format_usd(get_metadata(&db.conn)?.grift_total)
            )?;
            Ok(())
        }
        Command::Glossary { path } => {
            let terms: Vec<GlossaryEntry> = read_json(&path)?;
            for term in &terms {
                put_glossary_entry(&db.conn, term)?;
            }
            writeln!(out, "{} glossary terms stored", terms.len())?;
            Ok(())
        }
        Command::Collections { path } => {
            let labels: BTreeMap<String, String> = read_json(&path)?;
            for (key, label) in &labels {
                set_collection_label(&db.conn, key, label)?;
            }
            writeln!(out, "{} collection labels stored", labels.len())?;
            Ok(())
        }
        Command::Leaderboard { range } => show_leaderboard(db, range, config, out),
        Command::Entry { readable_id } => {
            let entry = get_entry_by_readable_id(&db.conn, &readable_id)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&entry)?)?;
            Ok(())
        }
        Command::Recompute => {
            let total = recompute_grift_total(&db.conn)?;
            writeln!(out, "grift total {}", format_usd(total))?;
            Ok(())
        }
        Command::Entries { .. } => Err(anyhow!("entries must be run through print_timeline")),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {path}"))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub replaced: usize,
}

/// Upsert every entry. Stops at the first failure; earlier entries stay committed.
pub fn import_entries(db: &mut Database, entries: &[Entry]) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();
    for entry in entries {
        match upsert_entry(&mut db.conn, entry).with_context(|| format!("importing {}", entry.id))? {
            UpsertOutcome::Inserted => summary.inserted += 1,
            UpsertOutcome::Replaced => summary.replaced += 1,
        }
    }
    tracing::info!(
        inserted = summary.inserted,
        replaced = summary.replaced,
        "import finished"
    );
    Ok(summary)
}

fn show_leaderboard<W: Write>(
    db: &Database,
    range: DateRange,
    config: &Config,
    out: &mut W,
) -> Result<()> {
    let mut request = LeaderboardRequest {
        date_range: range,
        sort_by: Default::default(),
        sort_dir: SortDirection::Desc,
        page: 1,
        page_size: config.leaderboard.page_size,
    };
    loop {
        let page = get_entries_for_leaderboard(&db.conn, &request)?;
        if request.page == 1 {
            writeln!(
                out,
                "{} entries, {} total",
                page.total_count,
                format_usd(page.scam_total)
            )?;
        }
        if page.entries.is_empty() {
            return Ok(());
        }
        for (i, keyed) in page.entries.iter().enumerate() {
            let entry = &keyed.item;
            let amount = entry
                .scam_amount_details
                .as_ref()
                .map(|d| d.display_amount())
                .unwrap_or_default();
            writeln!(
                out,
                "{:>4}  {:>16}  {}  {}",
                page.first_rank() + i,
                amount,
                entry.date,
                entry.display_title()
            )?;
        }
        request.page += 1;
    }
}

/// Walk the whole result set with the scroll controller, one line per entry.
/// Returns how many entries were printed.
pub async fn print_timeline<S: PageSource, W: Write>(
    source: &S,
    query: EntryQuery,
    page_size: usize,
    out: &mut W,
) -> Result<usize> {
    let mut ctl = ScrollController::new(query, page_size);
    let mut printed = 0;
    while let Some(resolution) = ctl.load_next(source).await {
        if resolution == Resolution::Failed {
            return Err(ctl
                .last_error()
                .cloned()
                .map_or_else(|| anyhow!("page fetch failed"), anyhow::Error::from));
        }
        for entry in &ctl.entries()[printed..] {
            let marker = if entry.is_starred() { "*" } else { " " };
            writeln!(out, "{marker} {}  {}", entry.id, entry.display_title())?;
        }
        printed = ctl.entries().len();
    }
    Ok(printed)
}
