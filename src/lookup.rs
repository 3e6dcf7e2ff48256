//! Document lookups from the command line.
//!
//! `variants` is pure and needs neither config nor database. `resolve`
//! runs the same resolution as `GET /v1/entities/by-doc`.

use anyhow::Result;

use pipeboard_core::document::{build_both_variants, DocumentKind};
use pipeboard_core::resolve::resolve_document;

use crate::config::Config;
use crate::db;
use crate::pg_store::PgStore;

/// Prints the PF and PJ lookup variants of `doc` as JSON.
pub fn run_variants(doc: &str) -> Result<()> {
    let variants = build_both_variants(doc);
    println!("{}", serde_json::to_string_pretty(&variants)?);
    Ok(())
}

/// Resolves `doc` against the configured database and prints the result
/// as JSON.
pub async fn run_resolve(config: &Config, doc: &str, hint: Option<&str>) -> Result<()> {
    let hint = hint.map(str::parse::<DocumentKind>).transpose()?;

    let pool = db::connect(config).await?;
    let store = PgStore::new(pool.clone());
    let resolution = resolve_document(&store, doc, hint).await;
    pool.close().await;

    println!("{}", serde_json::to_string_pretty(&resolution?)?);
    Ok(())
}
