use anyhow::{bail, Context, Result};
use pipeboard_core::query::PageLimits;
use serde::Deserialize;
use std::path::Path;

/// Environment variable that overrides `[db].dsn`.
pub const DSN_ENV: &str = "DB_DSN";
/// Environment variable that overrides `[auth].token`.
pub const TOKEN_ENV: &str = "API_TOKEN";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_dsn")]
    pub dsn: String,
    #[serde(default = "default_pool_min")]
    pub pool_min: u32,
    #[serde(default = "default_pool_max")]
    pub pool_max: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            dsn: default_dsn(),
            pool_min: default_pool_min(),
            pool_max: default_pool_max(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_dsn() -> String {
    "postgresql://localhost/postgres".to_string()
}
fn default_pool_min() -> u32 {
    1
}
fn default_pool_max() -> u32 {
    10
}
fn default_connect_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Path prefix for every route, e.g. `/api`. Empty serves at the root.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_prefix: default_api_prefix(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_api_prefix() -> String {
    "/api".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    /// Shared bearer token. Prefer setting `API_TOKEN` over storing it here.
    #[serde(default)]
    pub token: Option<String>,
}

impl AuthConfig {
    /// The configured token; an empty token is a configuration error.
    pub fn require_token(&self) -> Result<String> {
        match self.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token.to_string()),
            _ => bail!(
                "auth token is not configured: set [auth].token or the {} environment variable",
                TOKEN_ENV
            ),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(from = "PaginationFile")]
pub struct PaginationConfig {
    pub listing: PageLimits,
    pub deals: PageLimits,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            listing: PageLimits::LISTING,
            deals: PageLimits::DEALS,
        }
    }
}

/// `[pagination]` as written in the file. Each key falls back to the
/// built-in limit of its own section.
#[derive(Debug, Deserialize, Default)]
struct PaginationFile {
    #[serde(default)]
    listing: PageLimitsFile,
    #[serde(default)]
    deals: PageLimitsFile,
}

#[derive(Debug, Deserialize, Default)]
struct PageLimitsFile {
    default_limit: Option<i64>,
    max_limit: Option<i64>,
}

impl PageLimitsFile {
    fn or(self, base: PageLimits) -> PageLimits {
        PageLimits {
            default_limit: self.default_limit.unwrap_or(base.default_limit),
            max_limit: self.max_limit.unwrap_or(base.max_limit),
        }
    }
}

impl From<PaginationFile> for PaginationConfig {
    fn from(file: PaginationFile) -> Self {
        Self {
            listing: file.listing.or(PageLimits::LISTING),
            deals: file.deals.or(PageLimits::DEALS),
        }
    }
}

impl Config {
    /// Defaults only, used when no config file is given.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Applies `DB_DSN` / `API_TOKEN` from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::var(DSN_ENV).ok(), std::env::var(TOKEN_ENV).ok());
    }

    fn apply_overrides(&mut self, dsn: Option<String>, token: Option<String>) {
        if let Some(dsn) = dsn.filter(|d| !d.trim().is_empty()) {
            self.db.dsn = dsn;
        }
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.auth.token = Some(token);
        }
    }

    /// Prefix without a trailing slash; empty means routes live at `/`.
    pub fn api_prefix(&self) -> &str {
        self.server.api_prefix.trim_end_matches('/')
    }

    pub fn validate(&self) -> Result<()> {
        if self.db.pool_max == 0 {
            bail!("db.pool_max must be >= 1");
        }
        if self.db.pool_min > self.db.pool_max {
            bail!(
                "db.pool_min ({}) must not exceed db.pool_max ({})",
                self.db.pool_min,
                self.db.pool_max
            );
        }

        let prefix = self.api_prefix();
        if !prefix.is_empty() && !prefix.starts_with('/') {
            bail!("server.api_prefix must start with '/': '{}'", prefix);
        }

        for (name, limits) in [
            ("pagination.listing", self.pagination.listing),
            ("pagination.deals", self.pagination.deals),
        ] {
            if limits.default_limit < 1 || limits.max_limit < 1 {
                bail!("{} limits must be >= 1", name);
            }
            if limits.default_limit > limits.max_limit {
                bail!("{}.default_limit must not exceed max_limit", name);
            }
        }
        Ok(())
    }
}

fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    Ok(config)
}

/// Loads the config file, or defaults when it does not exist, then applies
/// environment overrides and validates.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        parse_config(&content)?
    } else {
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        Config::minimal()
    };

    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}
