//! Service configuration.
//!
//! Settings are read from environment variables (after `.env` is loaded).
//! Supabase credentials are optional at startup; a missing value surfaces as a
//! configuration error on each request instead of preventing the server from
//! starting.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

use crate::source::WaterBalanceQuery;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_SCHEMA: &str = "leak_detection";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_GROUP_NAME: &str = "默认分组";
const DEFAULT_STAT_DATE: &str = "2024-01-01";

/// Top-level settings for the server process.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    pub supabase: SupabaseSettings,
    pub defaults: QueryDefaults,
}

/// Connection settings for the PostgREST endpoint.
#[derive(Debug, Clone)]
pub struct SupabaseSettings {
    pub url: Option<String>,
    pub anon_key: Option<String>,
    /// Schema sent as `Accept-Profile`.
    pub schema: String,
    pub timeout: Duration,
}

/// Fallback values for request fields that are absent or empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDefaults {
    pub group_name: String,
    pub stat_date: String,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            group_name: DEFAULT_GROUP_NAME.to_string(),
            stat_date: DEFAULT_STAT_DATE.to_string(),
        }
    }
}

/// Raw request body as posted by clients.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub stat_date: Option<String>,
}

impl QueryDefaults {
    /// Fill in absent or empty fields.
    pub fn resolve(&self, params: QueryParams) -> WaterBalanceQuery {
        WaterBalanceQuery {
            group_name: non_empty(params.group_name).unwrap_or_else(|| self.group_name.clone()),
            stat_date: non_empty(params.stat_date).unwrap_or_else(|| self.stat_date.clone()),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = var("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("BIND_ADDR is not a valid socket address")?;

        let timeout_secs = match var("SUPABASE_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("SUPABASE_TIMEOUT_SECS is not a number: {}", raw))?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let defaults = QueryDefaults {
            group_name: var("DEFAULT_GROUP_NAME").unwrap_or_else(|| DEFAULT_GROUP_NAME.to_string()),
            stat_date: var("DEFAULT_STAT_DATE").unwrap_or_else(|| DEFAULT_STAT_DATE.to_string()),
        };

        Ok(Self {
            bind_addr,
            supabase: SupabaseSettings {
                url: var("SUPABASE_URL").map(|u| u.trim_end_matches('/').to_string()),
                anon_key: var("SUPABASE_ANON_KEY"),
                schema: var("SUPABASE_SCHEMA").unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
                timeout: Duration::from_secs(timeout_secs),
            },
            defaults,
        })
    }
}

/// Preview of a secret for startup logs: the first `keep` characters.
pub fn mask(value: Option<&str>, keep: usize) -> String {
    match value {
        Some(v) => format!("{}...", v.chars().take(keep).collect::<String>()),
        None => "not set".to_string(),
    }
}
