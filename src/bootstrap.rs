//! Database-side helpers the read queries rely on.
//!
//! Nothing here touches CRM data. Bootstrap only (re)creates:
//!
//! - `only_digits(text)`: strips non-digits, used for document matching.
//! - `v_deals_base_nova`: deals in "base nova" pipelines.
//!
//! Both statements are idempotent, so running bootstrap on every start is
//! safe.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::config::Config;
use crate::db;

const ONLY_DIGITS_EXISTS: &str =
    "SELECT EXISTS (SELECT 1 FROM pg_proc WHERE proname = 'only_digits' AND pg_function_is_visible(oid))";

const CREATE_ONLY_DIGITS: &str = r#"
CREATE OR REPLACE FUNCTION only_digits(text)
RETURNS text
LANGUAGE sql
IMMUTABLE
PARALLEL SAFE
AS $$
    SELECT regexp_replace($1, '[^0-9]', '', 'g')
$$
"#;

const CREATE_BASE_NOVA_VIEW: &str = r#"
CREATE OR REPLACE VIEW v_deals_base_nova AS
SELECT
    d.id, d.title, d.status, d.value, d.currency,
    d.add_time, d.update_time,
    d.user_id, d.pipeline_id, d.stage_id, d.person_id, d.org_id
FROM negocios d
WHERE d.pipeline_id IN (
    SELECT p.id
    FROM pipelines p
    WHERE lower(p.name) LIKE 'base nova%'
       OR lower(p.name) LIKE 'base-nova%'
       OR lower(p.name) LIKE 'basenova%'
)
"#;

/// Creates `only_digits` when missing and refreshes the base-nova view.
///
/// The function is required: every document lookup calls it. The view is
/// an optimization; when it cannot be created (for instance because
/// `negocios` or `pipelines` is absent) a warning is logged and the deal
/// queries fall back to an inline join.
pub async fn run_bootstrap(pool: &PgPool) -> Result<()> {
    let has_only_digits: bool = sqlx::query_scalar(ONLY_DIGITS_EXISTS)
        .fetch_one(pool)
        .await?;

    if has_only_digits {
        tracing::debug!("only_digits() already present");
    } else {
        sqlx::query(CREATE_ONLY_DIGITS)
            .execute(pool)
            .await
            .with_context(|| "Failed to create only_digits() function")?;
        tracing::info!("created only_digits() function");
    }

    match sqlx::query(CREATE_BASE_NOVA_VIEW).execute(pool).await {
        Ok(_) => tracing::info!("v_deals_base_nova view is up to date"),
        Err(e) => tracing::warn!(error = %e, "could not create v_deals_base_nova view"),
    }

    Ok(())
}

/// Connects, bootstraps, and closes the pool. Backs `pipeboard init`.
pub async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = run_bootstrap(&pool).await;
    pool.close().await;
    result
}

/// `SELECT 1` round-trip used by the health endpoint.
pub async fn health_check(pool: &PgPool) -> Result<bool> {
    let ok: i32 = sqlx::query_scalar("SELECT 1").fetch_one(pool).await?;
    Ok(ok == 1)
}
