//! Filter selection → store query.
//!
//! The store can only index one tag category per query, and never a tag
//! category together with the starred flag, so a selection that asks for
//! both is rejected here instead of producing a query the store cannot serve.

use serde::{Deserialize, Serialize};

use crate::error::{TimelineError, TimelineResult};
use crate::types::{FilterKind, SortDirection};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryFilter {
    pub kind: FilterKind,
    pub value: String,
}

/// What the reader picked in the filter UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSelection {
    pub category: Option<CategoryFilter>,
    #[serde(default)]
    pub starred: bool,
    pub collection: Option<String>,
    #[serde(default)]
    pub sort: SortDirection,
}

/// Untyped request parameters, as they arrive from a query string or CLI flags.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFilterParams {
    pub theme: Option<String>,
    pub tech: Option<String>,
    pub blockchain: Option<String>,
    pub starred: Option<String>,
    pub collection: Option<String>,
    pub sort: Option<String>,
}

/// The primary constraint of a store query. At most one is ever active.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum QueryFilter {
    None,
    Category(CategoryFilter),
    Starred,
}

/// A query the entry store knows how to execute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EntryQuery {
    pub filter: QueryFilter,
    pub collection: Option<String>,
    pub sort: SortDirection,
}

impl EntryQuery {
    /// Unfiltered query, used by linear browsing and the leaderboard.
    pub fn all(sort: SortDirection) -> Self {
        Self {
            filter: QueryFilter::None,
            collection: None,
            sort,
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl FilterSelection {
    pub fn from_params(params: &RawFilterParams) -> TimelineResult<Self> {
        let mut categories = [
            (FilterKind::Theme, params.theme.as_deref()),
            (FilterKind::Tech, params.tech.as_deref()),
            (FilterKind::Blockchain, params.blockchain.as_deref()),
        ]
        .into_iter()
        .filter_map(|(kind, value)| non_blank(value).map(|v| (kind, v)));

        let category = categories.next().map(|(kind, value)| CategoryFilter {
            kind,
            value: value.to_string(),
        });
        if let Some((extra, _)) = categories.next() {
            return Err(TimelineError::invalid(format!(
                "only one filter category may be active, also got {}",
                extra.as_str()
            )));
        }

        let starred = match non_blank(params.starred.as_deref()) {
            None | Some("false" | "0" | "off") => false,
            Some("true" | "1" | "on") => true,
            Some(other) => {
                return Err(TimelineError::invalid(format!(
                    "starred must be a boolean, got {other:?}"
                )))
            }
        };

        let sort = match non_blank(params.sort.as_deref()) {
            Some(s) => s.parse()?,
            None => SortDirection::default(),
        };

        Ok(Self {
            category,
            starred,
            collection: non_blank(params.collection.as_deref()).map(str::to_string),
            sort,
        })
    }

    /// Inverse of [`Self::from_params`], for building next-page links.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(category) = &self.category {
            pairs.push((category.kind.as_str(), category.value.clone()));
        }
        if self.starred {
            pairs.push(("starred", "true".to_string()));
        }
        if let Some(collection) = &self.collection {
            pairs.push(("collection", collection.clone()));
        }
        pairs.push(("sort", self.sort.as_str().to_string()));
        pairs
    }
}

/// Translate a selection into exactly one store query.
pub fn build_query(selection: &FilterSelection) -> TimelineResult<EntryQuery> {
    let filter = match (&selection.category, selection.starred) {
        (Some(_), true) => {
            return Err(TimelineError::invalid(
                "starred and category filters cannot be combined",
            ))
        }
        (Some(category), false) => {
            if category.value.trim().is_empty() {
                return Err(TimelineError::invalid(format!(
                    "{} filter value is empty",
                    category.kind.as_str()
                )));
            }
            QueryFilter::Category(category.clone())
        }
        (None, true) => QueryFilter::Starred,
        (None, false) => QueryFilter::None,
    };

    let collection = match &selection.collection {
        Some(c) if c.trim().is_empty() => {
            return Err(TimelineError::invalid("collection is empty"));
        }
        other => other.clone(),
    };

    Ok(EntryQuery {
        filter,
        collection,
        sort: selection.sort,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn theme(value: &str) -> Option<CategoryFilter> {
        Some(CategoryFilter {
            kind: FilterKind::Theme,
            value: value.to_string(),
        })
    }

    #[test]
    fn test_category_and_starred_is_invalid() {
        for kind in FilterKind::ALL {
            let selection = FilterSelection {
                category: Some(CategoryFilter {
                    kind,
                    value: "x".into(),
                }),
                starred: true,
                collection: None,
                sort: SortDirection::Desc,
            };
            let err = build_query(&selection).unwrap_err();
            assert!(matches!(err, TimelineError::InvalidQuery(_)));
        }
    }

    #[test]
    fn test_collection_combines_with_either_axis() {
        let with_category = FilterSelection {
            category: theme("rugpull"),
            collection: Some("defi".into()),
            ..Default::default()
        };
        let q = build_query(&with_category).unwrap();
        assert!(matches!(q.filter, QueryFilter::Category(_)));
        assert_eq!(q.collection.as_deref(), Some("defi"));

        let with_starred = FilterSelection {
            starred: true,
            collection: Some("defi".into()),
            ..Default::default()
        };
        let q = build_query(&with_starred).unwrap();
        assert_eq!(q.filter, QueryFilter::Starred);
        assert_eq!(q.collection.as_deref(), Some("defi"));
    }

    #[test]
    fn test_empty_selection_is_unfiltered_desc() {
        let q = build_query(&FilterSelection::default()).unwrap();
        assert_eq!(q, EntryQuery::all(SortDirection::Desc));
    }

    #[test]
    fn test_blank_values_rejected() {
        let blank = FilterSelection {
            category: theme("  "),
            ..Default::default()
        };
        assert!(build_query(&blank).is_err());

        let blank_collection = FilterSelection {
            collection: Some(String::new()),
            ..Default::default()
        };
        assert!(build_query(&blank_collection).is_err());
    }

    #[test]
    fn test_build_is_pure() {
        let selection = FilterSelection {
            category: theme("hack"),
            sort: SortDirection::Asc,
            ..Default::default()
        };
        assert_eq!(build_query(&selection), build_query(&selection));
    }

    #[test]
    fn test_params_reject_two_categories() {
        let params = RawFilterParams {
            theme: Some("rugpull".into()),
            blockchain: Some("solana".into()),
            ..Default::default()
        };
        let err = FilterSelection::from_params(&params).unwrap_err();
        assert!(matches!(err, TimelineError::InvalidQuery(_)));
    }

    #[test]
    fn test_params_parse_and_round_trip_pairs() {
        let params = RawFilterParams {
            tech: Some("bridge".into()),
            collection: Some("axie".into()),
            sort: Some("asc".into()),
            starred: Some(String::new()),
            ..Default::default()
        };
        let selection = FilterSelection::from_params(&params).unwrap();
        assert_eq!(
            selection.category,
            Some(CategoryFilter {
                kind: FilterKind::Tech,
                value: "bridge".into()
            })
        );
        assert!(!selection.starred);
        assert_eq!(selection.sort, SortDirection::Asc);
        assert_eq!(
            selection.to_query_pairs(),
            vec![
                ("tech", "bridge".to_string()),
                ("collection", "axie".to_string()),
                ("sort", "asc".to_string()),
            ]
        );
    }

    #[test]
    fn test_params_starred_with_category_fails_in_builder() {
        let params = RawFilterParams {
            theme: Some("hack".into()),
            starred: Some("true".into()),
            ..Default::default()
        };
        let selection = FilterSelection::from_params(&params).unwrap();
        assert!(build_query(&selection).is_err());
    }

    #[test]
    fn test_params_bad_sort() {
        let params = RawFilterParams {
            sort: Some("sideways".into()),
            ..Default::default()
        };
        assert!(FilterSelection::from_params(&params).is_err());
    }
}
