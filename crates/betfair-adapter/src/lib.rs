//! Exchange market-data adapter
//!
//! Normalizes betting-exchange market data into canonical records, renders
//! them in the legacy wire schema, and serves them through a freshness cache.
//!
//! - `shape`: uniform field access over SDK objects and wire mappings
//! - `ladder` / `builder`: raw records to canonical `MarketBook` / `MarketCatalogEntry`
//! - `legacy`: canonical records to the `/Data` and catalogue wire schemas
//! - `batch`: chunked, bounded-concurrency upstream fetches
//! - `cache`: per-class TTLs, strict and best-effort reads, single-flight refresh
//! - `upstream`: the exchange API collaborator and its REST implementation
//! - `service`: one pipeline per endpoint, tying the above together
//!
//! # Official Documentation
//! - Betting API: https://docs.developer.betfair.com/display/1smk3cen4v3lu3yomq5qye0ni/Betting+API
//! - Type definitions: https://docs.developer.betfair.com/display/1smk3cen4v3lu3yomq5qye0ni/Betting+Type+Definitions

pub mod batch;
pub mod builder;
pub mod cache;
pub mod config;
pub mod error;
pub mod ladder;
pub mod legacy;
pub mod service;
pub mod shape;
pub mod types;
pub mod upstream;

pub use batch::{BatchFetcher, BatchOutcome};
pub use cache::{CacheKey, ClassTtls, DataClass, FreshnessCache, Origin, Served};
pub use config::PipelineConfig;
pub use error::{FieldError, PipelineError};
pub use service::{MarketDataService, ServiceResponse};
pub use shape::{RawRecord, Shape};
pub use types::*;
pub use upstream::{ApiCredentials, BettingRestClient, MarketDataClient, BETTING_REST_BASE};
