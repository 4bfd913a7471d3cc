//! Supabase client for reading water balance rows over PostgREST.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::SupabaseSettings;
use crate::error::AppError;
use crate::source::{RecordSource, WaterBalanceQuery};
use crate::tree::FlatRecord;

const BALANCE_TABLE: &str = "dim_water_balance";
const BALANCE_SELECT: &str = "id,pid,name,fact_water_balance!inner(water_volume,water_amount)";

/// PostgREST-backed record source.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    settings: SupabaseSettings,
}

impl SupabaseClient {
    pub fn new(settings: SupabaseSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, settings })
    }

    fn credentials(&self) -> Result<(&str, &str), AppError> {
        match (
            self.settings.url.as_deref(),
            self.settings.anon_key.as_deref(),
        ) {
            (Some(url), Some(key)) => Ok((url, key)),
            _ => Err(AppError::Config(
                "missing Supabase environment variables (SUPABASE_URL, SUPABASE_ANON_KEY)"
                    .to_string(),
            )),
        }
    }

    /// Helper: GET from the Supabase REST API.
    async fn get_json<T: DeserializeOwned>(
        &self,
        base_url: &str,
        key: &str,
        table: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}/rest/v1/{}", base_url, table);
        let resp = self
            .client
            .get(&url)
            .query(params)
            .header("apikey", key)
            .header("Authorization", format!("Bearer {}", key))
            .header("Accept-Profile", &self.settings.schema)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Supabase GET {} failed: {} - {}", table, status, text));
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to decode {} rows", table))
    }
}

#[async_trait::async_trait]
impl RecordSource for SupabaseClient {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn fetch(&self, query: &WaterBalanceQuery) -> Result<Vec<FlatRecord>, AppError> {
        let (base_url, key) = self.credentials()?;

        debug!(
            "Querying {} for group={} date={}",
            BALANCE_TABLE, query.group_name, query.stat_date
        );

        let params = [
            ("select", BALANCE_SELECT.to_string()),
            ("group_name", format!("eq.{}", query.group_name)),
            (
                "fact_water_balance.stat_date",
                format!("eq.{}", query.stat_date),
            ),
        ];

        let rows: Vec<BalanceRow> = self
            .get_json(base_url, key, BALANCE_TABLE, &params)
            .await
            .map_err(AppError::data_access)?;

        info!("Fetched {} water balance rows from Supabase", rows.len());

        Ok(rows.into_iter().map(BalanceRow::into_record).collect())
    }
}

// ============================================================================
// Supabase row types
// ============================================================================

#[derive(Debug, Deserialize)]
struct BalanceRow {
    id: i64,
    #[serde(default)]
    pid: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    fact_water_balance: Option<FactEmbed>,
}

/// The embedded fact comes back as an object or as an array of objects
/// depending on how PostgREST resolves the relationship.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FactEmbed {
    Many(Vec<FactRow>),
    One(FactRow),
}

#[derive(Debug, Deserialize)]
struct FactRow {
    #[serde(default)]
    water_volume: Option<f64>,
    #[serde(default)]
    water_amount: Option<f64>,
}

impl FactEmbed {
    fn first(&self) -> Option<&FactRow> {
        match self {
            Self::Many(rows) => rows.first(),
            Self::One(row) => Some(row),
        }
    }
}

impl BalanceRow {
    fn into_record(self) -> FlatRecord {
        let fact = self.fact_water_balance.as_ref().and_then(FactEmbed::first);

        FlatRecord {
            id: self.id,
            pid: self.pid.unwrap_or(0),
            name: self.name.unwrap_or_default(),
            water_volume: fact.and_then(|f| f.water_volume).unwrap_or(0.0),
            water_amount: fact.and_then(|f| f.water_amount).unwrap_or(0.0),
        }
    }
}
