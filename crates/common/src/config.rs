use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::str::FromStr;

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "TIMELINE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub general: General,
    pub database: Database,
    pub pagination: Pagination,
    pub leaderboard: Leaderboard,
    pub assets: Assets,
    pub web: Option<Web>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Database {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    /// Infinite-scroll page size.
    pub page_size: usize,
    /// Page size for the linear "all entries" view.
    pub linear_page_size: usize,
    /// Upper bound on any caller-supplied page size.
    pub max_page_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Leaderboard {
    pub page_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Assets {
    pub cdn_base_url: String,
}

impl Assets {
    /// Absolute URL for an entry image. Already-absolute sources pass through.
    pub fn asset_url(&self, src: &str) -> String {
        if src.starts_with("http://") || src.starts_with("https://") {
            return src.to_string();
        }
        format!(
            "{}/{}",
            self.cdn_base_url.trim_end_matches('/'),
            src.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Web {
    pub port: u16,
    pub host: String,
}

impl Default for Web {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "127.0.0.1".to_string(),
        }
    }
}

impl Config {
    /// Load from `$TIMELINE_CONFIG`, falling back to `config/default.toml`.
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing config {path}"))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn web(&self) -> Web {
        self.web.clone().unwrap_or_default()
    }

    fn validate(&self) -> Result<()> {
        let p = &self.pagination;
        if p.max_page_size == 0 {
            bail!("pagination.max_page_size must be positive");
        }
        for (name, size) in [
            ("pagination.page_size", p.page_size),
            ("pagination.linear_page_size", p.linear_page_size),
            ("leaderboard.page_size", self.leaderboard.page_size),
        ] {
            if size == 0 {
                bail!("{name} must be positive");
            }
            if size > p.max_page_size {
                bail!(
                    "{name} = {size} exceeds pagination.max_page_size = {}",
                    p.max_page_size
                );
            }
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_toml_str(s)
    }
}
