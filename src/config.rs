//! Service configuration loaded from the environment.
//!
//! A missing odds API key is allowed: the service then runs in degraded mode,
//! every feed call returns a warning and no odds are ingested.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::Path;
use std::str::FromStr;

use crate::feed::client::DEFAULT_BASE_URL;
use crate::odds::OddsFormat;

const API_KEY_SECRET_FILE: &str = "/run/secrets/odds_api_key";

/// Configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub odds_api_key: Option<String>,
    pub odds_api_base_url: String,
    pub requests_per_minute: u32,
    /// None means the in-memory store
    pub database_url: Option<String>,
    pub ingestion_enabled: bool,
    pub refresh_interval_seconds: u64,
    pub archive_interval_seconds: u64,
    pub archive_retention_days: i64,
    pub default_sport: String,
    pub default_regions: Vec<String>,
    pub default_markets: Vec<String>,
    pub default_odds_format: OddsFormat,
    pub health_port: u16,
    /// If true, run one refresh + archive pass and exit (no polling loop)
    pub run_once: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // API key: env first, then a mounted Docker secret, otherwise degraded mode.
        let odds_api_key = match env::var("ODDS_API_KEY").or_else(|_| env::var("THE_ODDS_API_KEY")) {
            Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
            _ => read_secret_file(API_KEY_SECRET_FILE)?,
        };
        if let Some(key) = &odds_api_key {
            reject_placeholder(key)?;
        }

        let database_url = env::var("DATABASE_URL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let default_odds_format = env::var("DEFAULT_ODDS_FORMAT")
            .ok()
            .map(|v| v.parse::<OddsFormat>().map_err(|e| anyhow!(e)))
            .transpose()
            .context("DEFAULT_ODDS_FORMAT is invalid")?
            .unwrap_or_default();

        Ok(Self {
            odds_api_key,
            odds_api_base_url: env::var("ODDS_API_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            requests_per_minute: env_or("ODDS_API_REQUESTS_PER_MINUTE", 45),
            database_url,
            ingestion_enabled: env_bool("INGESTION_ENABLED", true),
            refresh_interval_seconds: env_or("REFRESH_INTERVAL_SECONDS", 300),
            archive_interval_seconds: env_or("ARCHIVE_INTERVAL_SECONDS", 3600),
            archive_retention_days: env_or("ARCHIVE_RETENTION_DAYS", 7),
            default_sport: env::var("DEFAULT_SPORT").unwrap_or_else(|_| "basketball_nba".to_string()),
            default_regions: parse_list(&env::var("DEFAULT_REGIONS").unwrap_or_else(|_| "us".to_string())),
            default_markets: parse_list(
                &env::var("DEFAULT_MARKETS").unwrap_or_else(|_| "h2h,spreads,totals".to_string()),
            ),
            default_odds_format,
            health_port: env_or("HEALTH_PORT", 8083),
            run_once: env_bool("RUN_ONCE", false),
        })
    }
}

/// Read an optional secret file. Missing file is fine, unreadable file is not.
fn read_secret_file(file_path: &str) -> Result<Option<String>> {
    if !Path::new(file_path).exists() {
        return Ok(None);
    }
    let value = std::fs::read_to_string(file_path)
        .with_context(|| format!("Secret file at {} exists but could not be read", file_path))?;
    let value = value.trim().to_string();
    Ok((!value.is_empty()).then_some(value))
}

/// Prevent accidental use of sample/placeholder keys
fn reject_placeholder(key: &str) -> Result<()> {
    let key_lower = key.trim().to_lowercase();
    if key_lower.contains("change_me") || key_lower.contains("your_") || key_lower.starts_with("sample") {
        return Err(anyhow!(
            "ODDS_API_KEY appears to be a placeholder value; replace with your real key"
        ));
    }
    Ok(())
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Split a comma-separated list, dropping blanks.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
