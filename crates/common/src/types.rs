use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::TimelineError;

/// Composite entry key `YYYY-MM-DD-N`.
///
/// Ordering is `(date, seq)`, which is also the pagination cursor order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntryId {
    date: NaiveDate,
    seq: u32,
}

impl EntryId {
    pub fn new(date: NaiveDate, seq: u32) -> Self {
        Self { date, seq }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.date.format("%Y-%m-%d"), self.seq)
    }
}

impl FromStr for EntryId {
    type Err = TimelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || TimelineError::invalid(format!("malformed entry id: {s:?}"));
        let (date, seq) = s.rsplit_once('-').ok_or_else(malformed)?;
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_parse_err| malformed())?;
        if seq.is_empty() || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        // `01` would be stored back as `1`, so the id would not round-trip.
        if seq.len() > 1 && seq.starts_with('0') {
            return Err(malformed());
        }
        let seq = seq.parse::<u32>().map_err(|_parse_err| malformed())?;
        Ok(Self { date, seq })
    }
}

impl TryFrom<String> for EntryId {
    type Error = TimelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntryId> for String {
    fn from(id: EntryId) -> Self {
        id.to_string()
    }
}

/// The three disjoint tag vocabularies. Only one may be filtered on per query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Theme,
    Tech,
    Blockchain,
}

impl FilterKind {
    pub const ALL: [Self; 3] = [Self::Theme, Self::Tech, Self::Blockchain];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Theme => "theme",
            Self::Tech => "tech",
            Self::Blockchain => "blockchain",
        }
    }
}

impl FromStr for FilterKind {
    type Err = TimelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "theme" => Ok(Self::Theme),
            "tech" => Ok(Self::Tech),
            "blockchain" => Ok(Self::Blockchain),
            other => Err(TimelineError::invalid(format!(
                "unknown filter category: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = TimelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(TimelineError::invalid(format!(
                "sort must be asc or desc, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters {
    #[serde(default)]
    pub theme: Vec<String>,
    #[serde(default)]
    pub tech: Vec<String>,
    #[serde(default)]
    pub blockchain: Vec<String>,
}

impl Filters {
    pub fn values(&self, kind: FilterKind) -> &[String] {
        match kind {
            FilterKind::Theme => &self.theme,
            FilterKind::Tech => &self.tech,
            FilterKind::Blockchain => &self.blockchain,
        }
    }

    /// Every `(kind, value)` tag on the entry.
    pub fn tags(&self) -> impl Iterator<Item = (FilterKind, &str)> + '_ {
        FilterKind::ALL
            .into_iter()
            .flat_map(move |kind| self.values(kind).iter().map(move |v| (kind, v.as_str())))
    }
}

/// Monetary figures for an entry. Only entries with `has_scam_amount` count
/// toward the grift total and the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScamAmountDetails {
    pub total: Decimal,
    pub has_scam_amount: bool,
    #[serde(default)]
    pub pre_recovery_amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_override: Option<String>,
}

impl ScamAmountDetails {
    /// Text shown to readers. The override wins; sorting always uses `total`.
    pub fn display_amount(&self) -> String {
        match &self.text_override {
            Some(text) if !text.trim().is_empty() => text.clone(),
            _ => format_usd(self.total),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub href: String,
    pub link_text: String,
}

/// One catalogued incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: EntryId,
    pub readable_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_title: Option<String>,
    pub date: NaiveDate,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub filters: Filters,
    #[serde(default)]
    pub collection: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starred: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scam_amount_details: Option<ScamAmountDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Entry {
    pub fn is_starred(&self) -> bool {
        self.starred.unwrap_or(false)
    }

    pub fn has_scam_amount(&self) -> bool {
        self.scam_amount_details
            .as_ref()
            .is_some_and(|d| d.has_scam_amount)
    }

    /// Amount that counts toward grift totals, if the entry participates.
    pub fn scam_total(&self) -> Option<Decimal> {
        self.scam_amount_details
            .as_ref()
            .filter(|d| d.has_scam_amount)
            .map(|d| d.total)
    }

    pub fn display_title(&self) -> &str {
        self.short_title.as_deref().unwrap_or(&self.title)
    }
}

/// Singleton site metadata. Written only by the import path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub grift_total: Decimal,
    #[serde(default)]
    pub collections: BTreeMap<String, String>,
}

impl Metadata {
    pub fn collection_label<'a>(&'a self, key: &'a str) -> &'a str {
        self.collections.get(key).map_or(key, String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryEntry {
    pub id: String,
    pub term: String,
    pub definition: String,
}

/// Item wrapper carrying the cursor key alongside the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Keyed<T> {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(flatten)]
    pub item: T,
}

impl Keyed<Entry> {
    pub fn from_entry(entry: Entry) -> Self {
        Self {
            key: entry.id.to_string(),
            item: entry,
        }
    }
}

/// `$1,234,567` with whole-dollar rounding.
pub fn format_usd(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    let digits = rounded.abs().trunc().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if rounded.is_sign_negative() && !rounded.is_zero() {
        format!("-${grouped}")
    } else {
        format!("${grouped}")
    }
}
