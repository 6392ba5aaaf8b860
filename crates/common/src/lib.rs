pub mod config;
pub mod db;
pub mod entries;
pub mod error;
pub mod glossary;
pub mod leaderboard;
pub mod observability;
pub mod preferences;
pub mod query;
pub mod scroll;
pub mod types;
