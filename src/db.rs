use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;

pub async fn connect(config: &Config) -> Result<PgPool> {
    let options = PgConnectOptions::from_str(&config.db.dsn)
        .with_context(|| "Invalid db.dsn connection string")?;

    let pool = PgPoolOptions::new()
        .min_connections(config.db.pool_min)
        .max_connections(config.db.pool_max)
        .acquire_timeout(Duration::from_secs(config.db.connect_timeout_secs))
        .connect_with(options)
        .await
        .with_context(|| "Failed to connect to PostgreSQL")?;

    Ok(pool)
}
