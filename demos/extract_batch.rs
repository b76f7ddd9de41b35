//! Extract one batch from a remote catalog
//!
//! Reads its options from the environment (or a `.env` file):
//! - `CATALOG_REMOTE_URL`, `CATALOG_REMOTE_USERNAME`, `CATALOG_REMOTE_PASSWORD`
//! - `CATALOG_CATALOG_PATH`, `CATALOG_CATALOG_QUERY`
//! - `CATALOG_REMOTE_SKIP_PATHS` (whitespace separated)
//! - `CATALOG_QUEUE_SIZE`, `CATALOG_BATCH_SIZE` (default: 50)
//!
//! Progress is stored in `catalog_extract.db`; running the example again
//! continues with the next batch. Ctrl+C stops the batch early.

use catalog_extract::{
    BatchCursor, CatalogSource, Config, Database, SqliteCursor, run_until_signal,
};
use std::collections::HashMap;
use std::sync::Arc;

const OPTION_NAMES: &[&str] = &[
    "remote-url",
    "remote-username",
    "remote-password",
    "catalog-path",
    "catalog-query",
    "remote-skip-paths",
    "queue-size",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging (optional)
    // Uncomment if you add tracing-subscriber to your dependencies:
    // tracing_subscriber::fmt::init();

    dotenvy::dotenv().ok();

    let options: HashMap<String, String> = OPTION_NAMES
        .iter()
        .filter_map(|name| {
            let var = format!("CATALOG_{}", name.replace('-', "_").to_uppercase());
            std::env::var(var).ok().map(|value| (name.to_string(), value))
        })
        .collect();
    let batch_size: u64 = std::env::var("CATALOG_BATCH_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(50);

    let config = Config::from_options(&options, None)?;

    let db = Arc::new(Database::new(&config.persistence.database_path).await?);
    let cursor = Arc::new(
        SqliteCursor::open(db.clone(), config.persistence.cursor_name.clone(), batch_size).await?,
    );

    let source = CatalogSource::new(config, cursor.clone()).await?;
    println!("Batch contains {} item paths", source.batch().len());

    let stats = run_until_signal(source.items(), |item| {
        println!("{}", item.path().unwrap_or("<no path>"));
    })
    .await?;

    let window = cursor.window().await?;
    println!(
        "Fetched {} / skipped {} / failed {}; cursor at {} of {}",
        stats.fetched, stats.skipped, stats.failed, window.current, window.total
    );

    db.close().await;
    Ok(())
}
