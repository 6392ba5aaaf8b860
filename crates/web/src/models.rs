//! View models for the timeline templates.
//! Everything here is pre-formatted for display; templates do no logic beyond loops and ifs.

use common::config::Assets;
use common::glossary::{resolve_body, BodySegment, Glossary};
use common::leaderboard::{DateRange, LeaderboardPage, LeaderboardRequest, LeaderboardSort};
use common::query::FilterSelection;
use common::types::{Entry, FilterKind, Keyed, Link, Metadata, SortDirection};

/// One entry as rendered in the timeline, the linear view and the deep-link page.
pub struct EntryView {
    pub id: String,
    pub readable_id: String,
    pub title: String,
    pub date_label: String,
    pub body: Vec<BodySegment>,
    pub tags: Vec<TagView>,
    pub collections: Vec<String>,
    pub starred: bool,
    pub amount: Option<String>,
    pub image_url: Option<String>,
    pub image_alt: String,
    pub links: Vec<Link>,
}

pub struct TagView {
    pub kind: &'static str,
    pub value: String,
    /// Link that filters the timeline to this tag.
    pub href: String,
}

impl EntryView {
    pub fn build(entry: &Entry, glossary: &Glossary, metadata: &Metadata, assets: &Assets) -> Self {
        let tags = entry
            .filters
            .tags()
            .map(|(kind, value)| TagView {
                kind: kind.as_str(),
                value: value.to_string(),
                href: format!("/?{}={}", kind.as_str(), urlencoding::encode(value)),
            })
            .collect();

        Self {
            id: entry.id.to_string(),
            readable_id: entry.readable_id.clone(),
            title: entry.title.clone(),
            date_label: entry.date.format("%B %-d, %Y").to_string(),
            body: resolve_body(&entry.body, glossary),
            tags,
            collections: entry
                .collection
                .iter()
                .map(|c| metadata.collection_label(c).to_string())
                .collect(),
            starred: entry.is_starred(),
            amount: entry
                .scam_amount_details
                .as_ref()
                .filter(|d| d.has_scam_amount)
                .map(|d| d.display_amount()),
            image_url: entry.image.as_ref().map(|img| assets.asset_url(&img.src)),
            image_alt: entry
                .image
                .as_ref()
                .and_then(|img| img.alt.clone())
                .unwrap_or_default(),
            links: entry.links.clone(),
        }
    }

    pub fn build_all(
        entries: &[Keyed<Entry>],
        glossary: &Glossary,
        metadata: &Metadata,
        assets: &Assets,
    ) -> Vec<Self> {
        entries
            .iter()
            .map(|k| Self::build(&k.item, glossary, metadata, assets))
            .collect()
    }
}

/// A `<select>` of values for one filter category.
pub struct FilterGroup {
    pub name: &'static str,
    pub options: Vec<FilterOption>,
}

pub struct FilterOption {
    pub value: String,
    pub selected: bool,
}

/// Build the three category selects, marking the active value.
pub fn filter_groups(values: &[(String, Vec<String>)], selection: &FilterSelection) -> Vec<FilterGroup> {
    FilterKind::ALL
        .into_iter()
        .map(|kind| {
            let active = selection
                .category
                .as_ref()
                .filter(|c| c.kind == kind)
                .map(|c| c.value.as_str());
            let options = values
                .iter()
                .find(|(k, _)| k == kind.as_str())
                .map(|(_, vs)| vs.as_slice())
                .unwrap_or_default()
                .iter()
                .map(|v| FilterOption {
                    value: v.clone(),
                    selected: active == Some(v.as_str()),
                })
                .collect();
            FilterGroup {
                name: kind.as_str(),
                options,
            }
        })
        .collect()
}

/// Query string for `pairs`, with a leading `?` when non-empty.
pub fn query_string(pairs: &[(&str, String)]) -> String {
    if pairs.is_empty() {
        return String::new();
    }
    let encoded: Vec<String> = pairs
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect();
    format!("?{}", encoded.join("&"))
}

/// Link to the next timeline fragment, or `None` once the feed is exhausted.
pub fn next_page_url(selection: &FilterSelection, next_cursor: Option<&str>) -> Option<String> {
    let cursor = next_cursor?;
    let mut pairs = selection.to_query_pairs();
    pairs.push(("cursor", cursor.to_string()));
    Some(format!("/partials/entries{}", query_string(&pairs)))
}

/// Link to the next page of the linear view.
pub fn next_linear_url(direction: SortDirection, next_cursor: Option<&str>) -> Option<String> {
    let cursor = next_cursor?;
    Some(format!(
        "/all{}",
        query_string(&[
            ("dir", direction.as_str().to_string()),
            ("cursor", cursor.to_string()),
        ])
    ))
}

pub struct LeaderboardRow {
    pub rank: usize,
    pub id: String,
    pub readable_id: String,
    pub title: String,
    pub date_label: String,
    pub amount: String,
}

pub struct PageLink {
    pub label: String,
    pub href: String,
    pub current: bool,
}

pub struct LeaderboardView {
    pub rows: Vec<LeaderboardRow>,
    pub total_count: usize,
    pub scam_total: String,
    pub range: String,
    pub sort: &'static str,
    pub dir: &'static str,
    pub pages: Vec<PageLink>,
}

impl LeaderboardView {
    pub fn build(page: &LeaderboardPage, request: &LeaderboardRequest) -> Self {
        let first_rank = page.first_rank();
        let rows = page
            .entries
            .iter()
            .enumerate()
            .map(|(i, keyed)| {
                let entry = &keyed.item;
                LeaderboardRow {
                    rank: first_rank + i,
                    id: keyed.key.clone(),
                    readable_id: entry.readable_id.clone(),
                    title: entry.display_title().to_string(),
                    date_label: entry.date.format("%Y-%m-%d").to_string(),
                    amount: entry
                        .scam_amount_details
                        .as_ref()
                        .map(|d| d.display_amount())
                        .unwrap_or_default(),
                }
            })
            .collect();

        let pages = (1..=page.total_pages())
            .map(|n| PageLink {
                label: n.to_string(),
                href: leaderboard_url(&request.date_range, request.sort_by, request.sort_dir, n),
                current: n == page.page,
            })
            .collect();

        Self {
            rows,
            total_count: page.total_count,
            scam_total: common::types::format_usd(page.scam_total),
            range: request.date_range.as_param(),
            sort: request.sort_by.as_str(),
            dir: request.sort_dir.as_str(),
            pages,
        }
    }
}

pub fn leaderboard_url(
    range: &DateRange,
    sort: LeaderboardSort,
    dir: SortDirection,
    page: usize,
) -> String {
    format!(
        "/leaderboard{}",
        query_string(&[
            ("range", range.as_param()),
            ("sort", sort.as_str().to_string()),
            ("dir", dir.as_str().to_string()),
            ("page", page.to_string()),
        ])
    )
}
