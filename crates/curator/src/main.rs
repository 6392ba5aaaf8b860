mod cli;

use anyhow::Result;
use common::config::Config;
use common::db::{AsyncDb, Database};
use common::entries::EntryStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    let _otel_guard = common::observability::init("timeline-curator", &config.general.log_level)?;

    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let cmd = cli::parse_args(std::env::args()).map_err(anyhow::Error::msg)?;
    let mut out = std::io::stdout().lock();

    match cmd {
        cli::Command::Entries { query } => {
            let db = AsyncDb::open(&config.database.path).await?;
            let store = EntryStore::new(db, config.pagination.max_page_size);
            let printed =
                cli::print_timeline(&store, query, config.pagination.page_size, &mut out).await?;
            tracing::info!(printed, "timeline listed");
            Ok(())
        }
        // Write commands run synchronously and exit.
        other => {
            let mut db = Database::open(&config.database.path)?;
            db.run_migrations()?;
            cli::run_command(&mut db, other, &config, &mut out)
        }
    }
}
