//! affinity-sync: apply a JSON intent to Affinity.
//!
//! Usage: `affinity-sync <intent.json>`
//!
//! Reads `~/.affinity-sync/config.json` (API key may come from
//! `AFFINITY_API_KEY`), ensures the entity and optional list entry, writes
//! the requested fields and prints the resulting ids as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use affinity_sync::affinity::client::AffinityClient;
use affinity_sync::config::load_config;
use affinity_sync::db::MirrorDb;
use affinity_sync::intent::{self, Intent};
use affinity_sync::writer::Writer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Some(intent_path) = std::env::args().nth(1).map(PathBuf::from) else {
        eprintln!("Usage: affinity-sync <intent.json>");
        std::process::exit(2);
    };

    let config = load_config().map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))?;
    let intent = Intent::load(&intent_path)?;

    let db_path = config.resolved_db_path()?;
    let db = MirrorDb::open_at(db_path)
        .map_err(|e| anyhow::anyhow!("Failed to open mirror database: {e}"))?;

    let client = AffinityClient::new(&config)?;
    let writer = Writer::new(Arc::new(client), Arc::new(db));

    let outcome = intent::apply(&writer, &intent).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if let Some(entitlement) = writer.entitlement() {
        log::info!(
            "Rate limit remaining - user {}/{}, org {}/{}",
            entitlement.user_remaining,
            entitlement.user_limit,
            entitlement.org_remaining,
            entitlement.org_limit
        );
    }

    Ok(())
}
