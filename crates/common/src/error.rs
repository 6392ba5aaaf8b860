use thiserror::Error;

/// Failures surfaced by the timeline read path.
///
/// `InvalidQuery` is a caller bug and is never retried. `NotFound` becomes a
/// user-visible "entry not found" page. `TransientFetch` covers store and
/// decode failures; callers recover by letting the user trigger the fetch
/// again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimelineError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("entry not found: {0}")]
    NotFound(String),

    #[error("fetch failed: {0}")]
    TransientFetch(String),
}

impl TimelineError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Short machine-readable code, used for JSON error bodies and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidQuery(_) => "invalid_query",
            Self::NotFound(_) => "not_found",
            Self::TransientFetch(_) => "fetch_failed",
        }
    }
}

impl From<rusqlite::Error> for TimelineError {
    fn from(err: rusqlite::Error) -> Self {
        Self::TransientFetch(err.to_string())
    }
}

impl From<serde_json::Error> for TimelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::TransientFetch(format!("document decode: {err}"))
    }
}

pub type TimelineResult<T> = std::result::Result<T, TimelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(TimelineError::invalid("x").code(), "invalid_query");
        assert_eq!(TimelineError::not_found("x").code(), "not_found");
        assert_eq!(
            TimelineError::TransientFetch("x".into()).code(),
            "fetch_failed"
        );
    }

    #[test]
    fn test_sqlite_errors_are_transient() {
        let err: TimelineError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, TimelineError::TransientFetch(_)));
    }
}
