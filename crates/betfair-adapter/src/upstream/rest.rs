//! REST client for the exchange betting API
//!
//! Base URL: https://api.betfair.com/exchange/betting/rest/v1.0
//!
//! # Endpoints (all `POST {base}/{operation}/`, JSON body)
//! - listEventTypes - sports
//! - listCompetitions - competitions for a sport
//! - listEvents - events for a sport / competition
//! - listMarketCatalogue - market metadata and runners
//! - listMarketBook - live prices
//!
//! Every response is a JSON array; each element becomes a `Mapping` record.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::auth::{ApiCredentials, APP_KEY_HEADER, SESSION_HEADER};
use super::{MarketDataClient, BETTING_REST_BASE};
use crate::error::PipelineError;
use crate::shape::RawRecord;
use crate::types::{MarketFilter, MarketId, MarketProjection, PriceProjection};

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Serialize)]
struct FilterRequest<'a> {
    filter: &'a MarketFilter,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CatalogueRequest<'a> {
    filter: &'a MarketFilter,
    max_results: u32,
    market_projection: &'a [MarketProjection],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BookRequest<'a> {
    market_ids: &'a [MarketId],
    price_projection: &'a PriceProjection,
}

// ============================================================================
// Client
// ============================================================================

/// REST client for the betting API
#[derive(Clone)]
pub struct BettingRestClient {
    client: Client,
    base_url: String,
    credentials: ApiCredentials,
}

impl BettingRestClient {
    /// Create a client against the official endpoint
    pub fn new(credentials: ApiCredentials) -> Result<Self> {
        Self::with_base_url(BETTING_REST_BASE, credentials)
    }

    /// Create a client with a custom base URL
    pub fn with_base_url(base_url: &str, credentials: ApiCredentials) -> Result<Self> {
        Url::parse(base_url).with_context(|| format!("Invalid base URL: {}", base_url))?;
        if !credentials.is_valid() {
            bail!("App key and session token are required");
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string(), credentials })
    }

    /// Betting endpoint this client posts to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST one operation, returning raw JSON
    pub async fn post_raw<B: Serialize + ?Sized + Sync>(&self, operation: &str, body: &B) -> Result<Value> {
        let url = format!("{}/{}/", self.base_url, operation);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header(APP_KEY_HEADER, &self.credentials.app_key)
            .header(SESSION_HEADER, &self.credentials.session_token)
            .json(body)
            .send()
            .await
            .context("HTTP request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("HTTP {} for {}: {}", status, url, body);
        }

        let json: Value = response.json().await.context("Failed to parse JSON")?;
        Ok(json)
    }

    async fn post_records<B: Serialize + ?Sized + Sync>(
        &self,
        operation: &str,
        body: &B,
    ) -> Result<Vec<RawRecord>, PipelineError> {
        let json = self.post_raw(operation, body).await.map_err(upstream_error)?;
        let records = records_from_response(operation, json).map_err(upstream_error)?;
        debug!("{} returned {} records", operation, records.len());
        Ok(records)
    }

    /// Cheap authenticated call; any HTTP answer proves the endpoint is reachable
    pub async fn test_connectivity(&self) -> Result<()> {
        info!("Testing connectivity to {}", self.base_url);

        let url = format!("{}/listEventTypes/", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(APP_KEY_HEADER, &self.credentials.app_key)
            .header(SESSION_HEADER, &self.credentials.session_token)
            .json(&FilterRequest { filter: &MarketFilter::default() })
            .send()
            .await
            .context("Connection test failed")?;

        let status = response.status();
        info!("Connectivity test: HTTP {}", status);
        if !status.is_success() {
            warn!("Endpoint reachable but rejected the session (HTTP {})", status);
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataClient for BettingRestClient {
    async fn list_event_types(&self, filter: &MarketFilter) -> Result<Vec<RawRecord>, PipelineError> {
        self.post_records("listEventTypes", &FilterRequest { filter }).await
    }

    async fn list_competitions(&self, filter: &MarketFilter) -> Result<Vec<RawRecord>, PipelineError> {
        self.post_records("listCompetitions", &FilterRequest { filter }).await
    }

    async fn list_events(&self, filter: &MarketFilter) -> Result<Vec<RawRecord>, PipelineError> {
        self.post_records("listEvents", &FilterRequest { filter }).await
    }

    async fn list_market_catalogue(
        &self,
        filter: &MarketFilter,
        max_results: u32,
        projection: &[MarketProjection],
    ) -> Result<Vec<RawRecord>, PipelineError> {
        let body = CatalogueRequest { filter, max_results, market_projection: projection };
        self.post_records("listMarketCatalogue", &body).await
    }

    async fn list_market_book(
        &self,
        ids: &[MarketId],
        price_projection: &PriceProjection,
    ) -> Result<Vec<RawRecord>, PipelineError> {
        let body = BookRequest { market_ids: ids, price_projection };
        self.post_records("listMarketBook", &body).await
    }
}

fn upstream_error(err: anyhow::Error) -> PipelineError {
    PipelineError::upstream(format!("{:#}", err))
}

/// Split a response array into records. Non-object elements are skipped.
fn records_from_response(operation: &str, json: Value) -> Result<Vec<RawRecord>> {
    let Value::Array(items) = json else {
        bail!("{} returned a non-array response", operation);
    };

    let mut records = Vec::with_capacity(items.len());
    for item in items {
        match RawRecord::mapping(item) {
            Ok(record) => records.push(record),
            Err(e) => warn!("Skipping malformed {} record: {}", operation, e),
        }
    }
    Ok(records)
}
