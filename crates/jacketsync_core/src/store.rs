use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StoreCredentials;

/// Conflict key for upserts; one row per chart.
pub const CONFLICT_COLUMNS: &str = "title,artist,difficulty";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongRecord {
    pub title: String,
    pub artist: String,
    pub difficulty: String,
    pub constant: Option<f64>,
    pub level: String,
    pub version: String,
}

/// Destination table for normalized chart rows.
pub trait SongStore {
    fn upsert(&mut self, batch: &[SongRecord]) -> Result<()>;
}

/// PostgREST table behind a Supabase project.
pub struct SupabaseStore {
    client: Client,
    endpoint: String,
    service_role_key: String,
}

impl SupabaseStore {
    pub fn new(credentials: StoreCredentials, table: &str, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("failed to build store HTTP client")?;
        Ok(Self {
            client,
            endpoint: upsert_endpoint(&credentials.url, table),
            service_role_key: credentials.service_role_key,
        })
    }
}

impl SongStore for SupabaseStore {
    fn upsert(&mut self, batch: &[SongRecord]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        debug!(rows = batch.len(), endpoint = %self.endpoint, "upserting batch");
        let response = self
            .client
            .post(&self.endpoint)
            .header("apikey", self.service_role_key.clone())
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(batch)
            .send()
            .context("failed to call store API")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("store upsert failed with HTTP {status}: {}", body.trim());
        }
        Ok(())
    }
}

fn upsert_endpoint(base_url: &str, table: &str) -> String {
    format!(
        "{}/rest/v1/{table}?on_conflict={CONFLICT_COLUMNS}",
        base_url.trim_end_matches('/')
    )
}
