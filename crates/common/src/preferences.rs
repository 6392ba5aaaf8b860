//! Reader display preferences, persisted in a cookie.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TimelineError;

pub const PREFS_COOKIE_NAME: &str = "timeline_prefs";

/// One year.
const PREFS_MAX_AGE_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }
}

impl FromStr for Theme {
    type Err = TimelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            other => Err(TimelineError::invalid(format!("unknown theme {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Font {
    #[default]
    Sans,
    Serif,
    Mono,
}

impl Font {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sans => "sans",
            Self::Serif => "serif",
            Self::Mono => "mono",
        }
    }
}

impl FromStr for Font {
    type Err = TimelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sans" => Ok(Self::Sans),
            "serif" => Ok(Self::Serif),
            "mono" => Ok(Self::Mono),
            other => Err(TimelineError::invalid(format!("unknown font {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Preferences {
    pub theme: Theme,
    pub font: Font,
}

impl Preferences {
    /// Read preferences out of a raw `Cookie` header. Missing or malformed
    /// values fall back to defaults field by field.
    pub fn from_cookie_header(header: Option<&str>) -> Self {
        let Some(raw) = header.and_then(|h| {
            h.split(';').find_map(|cookie| {
                cookie
                    .trim()
                    .strip_prefix(PREFS_COOKIE_NAME)
                    .and_then(|rest| rest.strip_prefix('='))
            })
        }) else {
            return Self::default();
        };

        let mut prefs = Self::default();
        let decoded = urlencoding::decode(raw).map_or_else(|_| raw.to_string(), |d| d.into_owned());
        for pair in decoded.split('&') {
            match pair.split_once('=') {
                Some(("theme", v)) => prefs.theme = v.parse().unwrap_or_default(),
                Some(("font", v)) => prefs.font = v.parse().unwrap_or_default(),
                _ => {}
            }
        }
        prefs
    }

    pub fn cookie_value(&self) -> String {
        urlencoding::encode(&format!(
            "theme={}&font={}",
            self.theme.as_str(),
            self.font.as_str()
        ))
        .into_owned()
    }

    /// Full `Set-Cookie` header value.
    pub fn to_set_cookie(&self) -> String {
        format!(
            "{PREFS_COOKIE_NAME}={}; Path=/; SameSite=Lax; Max-Age={PREFS_MAX_AGE_SECS}",
            self.cookie_value()
        )
    }
}

impl fmt::Display for Preferences {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.theme.as_str(), self.font.as_str())
    }
}
