use anyhow::{Context, bail};
use serde::Deserialize;

use crate::circulation::DEFAULT_LOAN_PERIOD_DAYS;

pub const DEFAULT_ACCESS_TOKEN_TTL_MINUTES: u32 = 15;
pub const DEFAULT_REFRESH_TOKEN_TTL_DAYS: u32 = 7;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Postgres connection string. When unset the service runs on the in-memory store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub server_port: u16,
    pub loan_period_days: u32,
    pub rate_limit_per_minute: u32,
    pub access_token_ttl_minutes: u32,
    pub refresh_token_ttl_days: u32,
}

impl Config {
    /// Load configuration from environment variables, applying defaults where appropriate.
    ///
    /// # Errors
    /// Returns an error if `JWT_SECRET` is missing, or if a numeric variable is present
    /// but cannot be parsed or is out of range.
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let database_max_connections = parse_var("DATABASE_MAX_CONNECTIONS", 5)?;
        let server_port = parse_var("SERVER_PORT", 8080)?;
        let loan_period_days = parse_var("LOAN_PERIOD_DAYS", DEFAULT_LOAN_PERIOD_DAYS)?;
        let rate_limit_per_minute = parse_var("RATE_LIMIT_PER_MINUTE", 60)?;
        let access_token_ttl_minutes =
            parse_var("ACCESS_TOKEN_TTL_MINUTES", DEFAULT_ACCESS_TOKEN_TTL_MINUTES)?;
        let refresh_token_ttl_days =
            parse_var("REFRESH_TOKEN_TTL_DAYS", DEFAULT_REFRESH_TOKEN_TTL_DAYS)?;

        let config = Self {
            database_url,
            database_max_connections,
            jwt_secret,
            server_port,
            loan_period_days,
            rate_limit_per_minute,
            access_token_ttl_minutes,
            refresh_token_ttl_days,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that the parsers cannot express.
    ///
    /// # Errors
    /// Returns an error naming the offending setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.jwt_secret.is_empty() {
            bail!("JWT_SECRET must not be empty");
        }
        if self.loan_period_days == 0 {
            bail!("LOAN_PERIOD_DAYS must be at least 1");
        }
        if self.rate_limit_per_minute == 0 {
            bail!("RATE_LIMIT_PER_MINUTE must be at least 1");
        }
        if self.database_max_connections == 0 {
            bail!("DATABASE_MAX_CONNECTIONS must be at least 1");
        }
        if self.access_token_ttl_minutes == 0 {
            bail!("ACCESS_TOKEN_TTL_MINUTES must be at least 1");
        }
        if self.refresh_token_ttl_days == 0 {
            bail!("REFRESH_TOKEN_TTL_DAYS must be at least 1");
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a valid number, got {raw:?}")),
        Err(_) => Ok(default),
    }
}
