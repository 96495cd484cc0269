//! Upstream exchange API collaborator
//!
//! The pipeline only sees [`MarketDataClient`]; every call returns shape-tagged
//! [`RawRecord`]s and leaves normalization to the builder. `rest` talks to the
//! JSON-REST betting endpoint; tests swap in an in-memory implementation.
//!
//! # Source
//! - Betting API operations: listEventTypes, listCompetitions, listEvents,
//!   listMarketCatalogue, listMarketBook

pub mod auth;
pub mod rest;

pub use auth::ApiCredentials;
pub use rest::BettingRestClient;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::shape::RawRecord;
use crate::types::{MarketFilter, MarketId, MarketProjection, PriceProjection};

/// Official betting API REST base URL
pub const BETTING_REST_BASE: &str = "https://api.betfair.com/exchange/betting/rest/v1.0";

#[async_trait]
pub trait MarketDataClient: Send + Sync {
    /// Sports matching `filter`, each wrapped as `{eventType, marketCount}`
    async fn list_event_types(&self, filter: &MarketFilter) -> Result<Vec<RawRecord>, PipelineError>;

    /// Competitions wrapped as `{competition, marketCount, competitionRegion}`
    async fn list_competitions(&self, filter: &MarketFilter) -> Result<Vec<RawRecord>, PipelineError>;

    /// Events wrapped as `{event, marketCount}`
    async fn list_events(&self, filter: &MarketFilter) -> Result<Vec<RawRecord>, PipelineError>;

    async fn list_market_catalogue(
        &self,
        filter: &MarketFilter,
        max_results: u32,
        projection: &[MarketProjection],
    ) -> Result<Vec<RawRecord>, PipelineError>;

    /// Live books for `ids`. Unknown ids are simply absent from the result.
    async fn list_market_book(
        &self,
        ids: &[MarketId],
        price_projection: &PriceProjection,
    ) -> Result<Vec<RawRecord>, PipelineError>;
}
