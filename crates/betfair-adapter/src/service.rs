//! Market-data service: one pipeline per endpoint
//!
//! validate ids -> freshness cache -> (on miss) batched upstream fetch ->
//! canonical builder -> legacy renderer -> cache
//!
//! # Policies
//! - Book, catalogue and navigation reads are strict: a failed refetch is an error
//! - The active-events summary is best-effort: stale, then empty, never an error
//! - `debug` implies `bypass_cache` and echoes the raw upstream records
//!
//! Multi-id reads answer in request order. Ids the upstream did not return are
//! dropped with a `NotFound` warning; failed chunks surface as a
//! `PartialBatchFailure` warning next to the surviving results.
//!
//! Prices live only in the book cache. Catalogue entries are cached without
//! them and priced from that cache on every serve, so a catalogue hit never
//! carries prices older than the book TTL.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch::{BatchFetcher, BatchOutcome};
use crate::builder::{
    build_catalog_entry, build_catalog_entry_checked, build_competition, build_event, build_event_type,
    build_market_book_checked, Built,
};
use crate::cache::{CacheKey, Clock, DataClass, FetchBatch, FreshnessCache, PayloadStore, Served, SystemClock};
use crate::config::PipelineConfig;
use crate::error::{FieldError, PipelineError};
use crate::legacy::{overlay_catalog_prices, render_catalog_entry, render_market_book, render_market_data_envelope};
use crate::shape::RawRecord;
use crate::types::{
    ActiveEvent, ActiveEventsSummary, EventSummary, EventTypeSummary, MarketBook, MarketCatalogEntry,
    MarketFilter, MarketId, MarketProjection, PriceProjection, SportBreakdown, TimeRange, TopMarket,
    MAJOR_SPORT_IDS,
};
use crate::upstream::MarketDataClient;

/// Market types listed for an event when the caller names none
pub const DEFAULT_EVENT_MARKET_TYPES: [&str; 3] = ["MATCH_ODDS", "OVER_UNDER_25", "CORRECT_SCORE"];

/// How far ahead event listings look
pub const UPCOMING_EVENT_DAYS: i64 = 7;

const SUMMARY_SPORTS: usize = 3;
const SUMMARY_EVENTS_PER_SPORT: usize = 5;
const SUMMARY_MARKETS_PER_EVENT: usize = 10;
const SUMMARY_TOP_MARKETS: usize = 10;

const STATS_KEY: &str = "active_events";

// ============================================================================
// Responses
// ============================================================================

/// What one service call hands to the outer surface
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResponse<T> {
    pub payload: T,
    /// Every payload came from the cache rather than a new upstream call
    pub cached: bool,
    /// A best-effort read served a payload past its TTL
    pub stale: bool,
    /// Non-fatal problems: missing ids, failed batches
    pub warnings: Vec<PipelineError>,
    /// Raw upstream records, only when `debug` was requested
    pub raw: Option<Vec<RawRecord>>,
}

impl<T> ServiceResponse<T> {
    fn from_served(served: Served<T>) -> Self {
        Self {
            cached: served.is_cached(),
            stale: served.is_stale(),
            payload: served.payload,
            warnings: Vec::new(),
            raw: None,
        }
    }

    fn map<U>(self, f: impl FnOnce(T) -> U) -> ServiceResponse<U> {
        ServiceResponse {
            payload: f(self.payload),
            cached: self.cached,
            stale: self.stale,
            warnings: self.warnings,
            raw: self.raw,
        }
    }
}

impl<T: Serialize> ServiceResponse<T> {
    /// `{data, cached, stale, warnings?, raw?}`
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        let mut body = Map::new();
        body.insert("data".to_string(), serde_json::to_value(&self.payload)?);
        body.insert("cached".to_string(), Value::Bool(self.cached));
        body.insert("stale".to_string(), Value::Bool(self.stale));
        if !self.warnings.is_empty() {
            let warnings = self.warnings.iter().map(|w| Value::String(w.to_string())).collect();
            body.insert("warnings".to_string(), Value::Array(warnings));
        }
        if let Some(raw) = &self.raw {
            body.insert("raw".to_string(), serde_json::to_value(raw)?);
        }
        Ok(Value::Object(body))
    }
}

/// Side channel out of a refetch task: warnings and the debug echo
#[derive(Debug, Default)]
struct FetchLog {
    raw: Vec<RawRecord>,
    warnings: Vec<PipelineError>,
}

impl FetchLog {
    fn defaulted(&mut self, market_id: &str, issues: Vec<FieldError>) {
        self.warnings.extend(issues.into_iter().map(|issue| PipelineError::DefaultedField {
            market_id: market_id.to_string(),
            detail: issue.to_string(),
        }));
    }
}

type SharedLog = Arc<Mutex<FetchLog>>;

// ============================================================================
// Service
// ============================================================================

pub struct MarketDataService<C> {
    client: Arc<C>,
    config: PipelineConfig,
    /// Canonical price snapshots, rendered on serve
    books: FreshnessCache<MarketBook>,
    /// Rendered catalogue (unpriced) and navigation payloads
    payloads: FreshnessCache<Value>,
    stats: FreshnessCache<ActiveEventsSummary>,
}

impl<C> Clone for MarketDataService<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            config: self.config.clone(),
            books: self.books.clone(),
            payloads: self.payloads.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<C: MarketDataClient + 'static> MarketDataService<C> {
    /// Service on the system clock
    pub fn new(client: C, config: PipelineConfig) -> Self {
        Self::with_clock(client, config, Arc::new(SystemClock))
    }

    /// Service whose caches read time from `clock`
    pub fn with_clock(client: C, config: PipelineConfig, clock: Arc<dyn Clock>) -> Self {
        let ttls = config.class_ttls();
        Self {
            client: Arc::new(client),
            books: FreshnessCache::with_clock(ttls, clock.clone()).with_wait_timeout(config.wait_timeout),
            payloads: FreshnessCache::with_clock(ttls, clock.clone()).with_wait_timeout(config.wait_timeout),
            stats: FreshnessCache::with_clock(ttls, clock).with_wait_timeout(config.wait_timeout),
            config,
        }
    }

    /// Persist every cache class through `store`
    pub fn with_store(mut self, store: Arc<dyn PayloadStore>) -> Self {
        self.books = self.books.with_store(store.clone());
        self.payloads = self.payloads.with_store(store.clone());
        self.stats = self.stats.with_store(store);
        self
    }

    /// Effective pipeline settings
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Upstream collaborator
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Price-snapshot cache behind `/Data` and catalogue prices
    pub fn book_cache(&self) -> &FreshnessCache<MarketBook> {
        &self.books
    }

    /// Rendered-payload cache shared by catalogue and navigation reads
    pub fn payload_cache(&self) -> &FreshnessCache<Value> {
        &self.payloads
    }

    // ------------------------------------------------------------------------
    // Market book (/Data)
    // ------------------------------------------------------------------------

    /// Live prices for one market, wrapped in the `/Data` envelope
    pub async fn market_book(&self, id: &str, bypass_cache: bool, debug: bool) -> Result<ServiceResponse<Value>, PipelineError> {
        let id = MarketId::parse(id)?;
        self.market_books_for(&[id], bypass_cache, debug).await
    }

    /// Live prices for a comma-separated id list, wrapped in the `/Data` envelope
    pub async fn market_books(&self, ids: &str, bypass_cache: bool, debug: bool) -> Result<ServiceResponse<Value>, PipelineError> {
        let ids = non_empty(MarketId::parse_list(ids)?, ids)?;
        self.market_books_for(&ids, bypass_cache, debug).await
    }

    async fn market_books_for(
        &self,
        ids: &[MarketId],
        bypass_cache: bool,
        debug: bool,
    ) -> Result<ServiceResponse<Value>, PipelineError> {
        let keys = keys_for(DataClass::Book, ids);
        let log = SharedLog::default();
        let results = self.book_snapshots(&keys, bypass_cache || debug, &log, debug).await;

        let response = in_request_order(&keys, results, log, debug)?;
        info!("Served {} market books ({} warnings)", response.payload.len(), response.warnings.len());
        Ok(response.map(|books| render_market_data_envelope(Uuid::new_v4(), books.iter().map(render_market_book).collect())))
    }

    /// Strict read of price snapshots with one batched refetch for the keys this call leads
    async fn book_snapshots(
        &self,
        keys: &[CacheKey],
        bypass: bool,
        log: &SharedLog,
        debug: bool,
    ) -> HashMap<CacheKey, Result<Served<MarketBook>, PipelineError>> {
        let client = self.client.clone();
        let fetcher = BatchFetcher::new(self.config.book_batch_size, self.config.max_concurrent_batches);
        let fetch_log = log.clone();
        self.books
            .get_many(keys, bypass, move |keys| async move {
                let ids = ids_of(&keys);
                let projection = PriceProjection::best_offers();
                let outcome = fetcher
                    .fetch_many(&ids, |chunk| {
                        let client = client.clone();
                        let projection = projection.clone();
                        async move { client.list_market_book(&chunk, &projection).await }
                    })
                    .await;

                let mut log = fetch_log.lock();
                let mut batch = batch_skeleton(DataClass::Book, &outcome, &mut log)?;
                for raw in outcome.records {
                    let Built { record: book, issues } = build_market_book_checked(&raw);
                    log.defaulted(&book.market_id, issues);
                    batch.found.insert(CacheKey::new(DataClass::Book, book.market_id.clone()), book);
                    if debug {
                        log.raw.push(raw);
                    }
                }
                Ok::<_, PipelineError>(batch)
            })
            .await
    }

    // ------------------------------------------------------------------------
    // Market catalogue (/catalog2, /catalogs)
    // ------------------------------------------------------------------------

    /// Catalogue entry for one market, priced from the book cache
    pub async fn catalog(&self, id: &str, bypass_cache: bool, debug: bool) -> Result<ServiceResponse<Value>, PipelineError> {
        let id = MarketId::parse(id)?;
        let response = self.catalogs_for(std::slice::from_ref(&id), bypass_cache, debug).await?;
        match response.payload.first().cloned() {
            Some(entry) => Ok(response.map(|_| entry)),
            None => Err(PipelineError::NotFound(id.to_string())),
        }
    }

    /// Catalogue entries for a comma-separated id list, in request order
    pub async fn catalogs(&self, ids: &str, bypass_cache: bool, debug: bool) -> Result<ServiceResponse<Vec<Value>>, PipelineError> {
        let ids = non_empty(MarketId::parse_list(ids)?, ids)?;
        self.catalogs_for(&ids, bypass_cache, debug).await
    }

    async fn catalogs_for(
        &self,
        ids: &[MarketId],
        bypass_cache: bool,
        debug: bool,
    ) -> Result<ServiceResponse<Vec<Value>>, PipelineError> {
        let keys = keys_for(DataClass::Catalog, ids);
        let log = SharedLog::default();

        let client = self.client.clone();
        let fetcher = BatchFetcher::new(self.config.catalog_batch_size, self.config.max_concurrent_batches);
        let max_results = self.config.catalog_max_results;
        let fetch_log = log.clone();
        let updated_at = self.payloads.now();
        let results = self
            .payloads
            .get_many(&keys, bypass_cache || debug, move |keys| async move {
                let ids = ids_of(&keys);
                let outcome = fetcher
                    .fetch_many(&ids, |chunk| {
                        let client = client.clone();
                        let log = fetch_log.clone();
                        async move { fetch_catalog_chunk(client.as_ref(), chunk, max_results, &log, debug).await }
                    })
                    .await;

                let mut log = fetch_log.lock();
                let mut batch = batch_skeleton(DataClass::Catalog, &outcome, &mut log)?;
                for Built { record: entry, issues } in outcome.records {
                    log.defaulted(&entry.market_id, issues);
                    // Cached unpriced; prices are overlaid per serve
                    let rendered = render_catalog_entry(&entry, None, updated_at);
                    batch.found.insert(CacheKey::new(DataClass::Catalog, entry.market_id), rendered);
                }
                Ok::<_, PipelineError>(batch)
            })
            .await;

        let mut response = in_request_order(&keys, results, log, debug)?;
        self.price_catalog_entries(&mut response, bypass_cache || debug, debug).await;
        info!("Served {} catalogue entries ({} warnings)", response.payload.len(), response.warnings.len());
        Ok(response)
    }

    /// Overlay current prices from the book cache onto served catalogue entries.
    ///
    /// A market the exchange holds no book for is zero-filled quietly. A failed
    /// price read is zero-filled for this response only and reported as
    /// `PricesUnavailable`; zeros are never cached in place of prices.
    async fn price_catalog_entries(&self, response: &mut ServiceResponse<Vec<Value>>, bypass: bool, debug: bool) {
        let keys: Vec<Option<CacheKey>> = response
            .payload
            .iter()
            .map(|entry| {
                let id = MarketId::parse(entry.get("marketId")?.as_str()?).ok()?;
                Some(CacheKey::new(DataClass::Book, id.as_str()))
            })
            .collect();
        let lookup: Vec<CacheKey> = keys.iter().flatten().cloned().collect();
        if lookup.is_empty() {
            return;
        }

        let log = SharedLog::default();
        let books = self.book_snapshots(&lookup, bypass, &log, debug).await;
        let FetchLog { raw, warnings } = std::mem::take(&mut *log.lock());

        for (entry, key) in response.payload.iter_mut().zip(&keys) {
            let Some(key) = key else { continue };
            match books.get(key) {
                Some(Ok(served)) => {
                    response.cached &= served.is_cached();
                    overlay_catalog_prices(entry, Some(&served.payload));
                }
                Some(Err(PipelineError::NotFound(_))) | None => {
                    debug!("No book for {}, prices zero-filled", key.id);
                    response.cached = false;
                    overlay_catalog_prices(entry, None);
                }
                Some(Err(e)) => {
                    warn!("Prices for {} unavailable, zero-filled: {}", key.id, e);
                    response.cached = false;
                    overlay_catalog_prices(entry, None);
                    response.warnings.push(PipelineError::PricesUnavailable {
                        market_id: key.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        // Failed price chunks are already reported per market
        response
            .warnings
            .extend(warnings.into_iter().filter(|w| !matches!(w, PipelineError::PartialBatchFailure { .. })));
        if let Some(echo) = response.raw.as_mut() {
            echo.extend(raw);
        }
    }

    // ------------------------------------------------------------------------
    // Navigation listings
    // ------------------------------------------------------------------------

    /// Every sport
    pub async fn event_types(&self, bypass_cache: bool) -> Result<ServiceResponse<Value>, PipelineError> {
        let client = self.client.clone();
        self.navigation("event_types".to_string(), bypass_cache, move || async move {
            let records = client.list_event_types(&MarketFilter::default()).await?;
            listing(records.iter().filter_map(build_event_type).collect::<Vec<EventTypeSummary>>())
        })
        .await
    }

    /// Sports shown on the landing page, in upstream order
    pub async fn major_sports(&self, bypass_cache: bool) -> Result<ServiceResponse<Value>, PipelineError> {
        let response = self.event_types(bypass_cache).await?;
        Ok(response.map(|sports| {
            let rows = match sports {
                Value::Array(rows) => rows,
                _ => Vec::new(),
            };
            Value::Array(
                rows.into_iter()
                    .filter(|row| row.get("id").and_then(Value::as_str).is_some_and(|id| MAJOR_SPORT_IDS.contains(&id)))
                    .collect(),
            )
        }))
    }

    /// Competitions for one sport
    pub async fn competitions(&self, event_type_id: &str, bypass_cache: bool) -> Result<ServiceResponse<Value>, PipelineError> {
        let event_type_id = numeric_id(event_type_id)?;
        let filter = MarketFilter { event_type_ids: vec![event_type_id.clone()], ..MarketFilter::default() };

        let client = self.client.clone();
        self.navigation(format!("competitions:{}", event_type_id), bypass_cache, move || async move {
            let records = client.list_competitions(&filter).await?;
            listing(records.iter().filter_map(build_competition).collect::<Vec<_>>())
        })
        .await
    }

    /// Events starting within the next week for a sport and/or competition
    pub async fn events(
        &self,
        event_type_id: Option<&str>,
        competition_id: Option<&str>,
        bypass_cache: bool,
    ) -> Result<ServiceResponse<Value>, PipelineError> {
        let event_type_id = event_type_id.map(numeric_id).transpose()?;
        let competition_id = competition_id.map(numeric_id).transpose()?;
        let key = format!(
            "events:{}:{}",
            event_type_id.as_deref().unwrap_or("*"),
            competition_id.as_deref().unwrap_or("*")
        );
        let filter = upcoming_events_filter(event_type_id, competition_id, self.payloads.now());

        let client = self.client.clone();
        self.navigation(key, bypass_cache, move || async move {
            let records = client.list_events(&filter).await?;
            listing(records.iter().filter_map(build_event).collect::<Vec<_>>())
        })
        .await
    }

    /// Catalogue entries (no prices) for an event. Empty `market_types` means the defaults.
    pub async fn markets_for_event(
        &self,
        event_id: &str,
        market_types: &[String],
        bypass_cache: bool,
    ) -> Result<ServiceResponse<Value>, PipelineError> {
        let event_id = numeric_id(event_id)?;
        let market_types = if market_types.is_empty() {
            DEFAULT_EVENT_MARKET_TYPES.iter().map(|t| t.to_string()).collect()
        } else {
            market_types.to_vec()
        };
        let key = format!("markets:{}:{}", event_id, market_types.join(","));
        let filter = event_markets_filter(event_id, market_types);
        let max_results = self.config.catalog_max_results;

        let client = self.client.clone();
        self.navigation(key, bypass_cache, move || async move {
            let records = client.list_market_catalogue(&filter, max_results, &MarketProjection::full()).await?;
            listing(records.iter().map(build_catalog_entry).collect::<Vec<_>>())
        })
        .await
    }

    async fn navigation<F, Fut>(&self, id: String, bypass_cache: bool, fetch: F) -> Result<ServiceResponse<Value>, PipelineError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, PipelineError>> + Send + 'static,
    {
        let served = self.payloads.get_or_fetch(CacheKey::new(DataClass::Navigation, id), bypass_cache, fetch).await?;
        Ok(ServiceResponse::from_served(served))
    }

    // ------------------------------------------------------------------------
    // Dashboard
    // ------------------------------------------------------------------------

    /// Active-events aggregate. Never fails: stale, then empty, on upstream trouble.
    pub async fn active_events_summary(&self, bypass_cache: bool) -> ServiceResponse<ActiveEventsSummary> {
        let client = self.client.clone();
        let max_results = self.config.catalog_max_results;
        let now = self.stats.now();
        let served = self
            .stats
            .get_or_fetch_best_effort(CacheKey::new(DataClass::Stats, STATS_KEY), bypass_cache, move || async move {
                summarize_active_events(client.as_ref(), now, max_results).await
            })
            .await;
        ServiceResponse::from_served(served)
    }
}

// ============================================================================
// Pipeline helpers
// ============================================================================

async fn fetch_catalog_chunk<C: MarketDataClient + ?Sized>(
    client: &C,
    chunk: Vec<MarketId>,
    max_results: u32,
    log: &SharedLog,
    debug: bool,
) -> Result<Vec<Built<MarketCatalogEntry>>, PipelineError> {
    let filter = MarketFilter::for_markets(&chunk);
    let max_results = max_results.max(chunk.len() as u32);
    let catalogue = client.list_market_catalogue(&filter, max_results, &MarketProjection::full()).await?;

    let entries = catalogue.iter().map(build_catalog_entry_checked).collect();
    if debug {
        log.lock().raw.extend(catalogue);
    }
    Ok(entries)
}

/// Start a refetch result: failed chunk ids marked failed, the partial-failure warning logged.
/// Every chunk failing fails the whole refetch.
fn batch_skeleton<T, V>(class: DataClass, outcome: &BatchOutcome<T>, log: &mut FetchLog) -> Result<FetchBatch<V>, PipelineError> {
    if outcome.all_failed() {
        if let Some(chunk) = outcome.failed_chunks.first() {
            return Err(chunk.error.clone());
        }
    }

    let mut batch = FetchBatch::default();
    for id in outcome.failed_ids() {
        batch.failed.insert(CacheKey::new(class, id.as_str()));
    }
    if let Some(warning) = outcome.partial_failure() {
        warn!("{}", warning);
        log.warnings.push(warning);
    }
    Ok(batch)
}

/// Collect per-key results in request order.
///
/// Fails only when nothing could be served; the error is then the first
/// upstream failure, or the first `NotFound` when every id was simply missing.
fn in_request_order<T: Clone>(
    keys: &[CacheKey],
    results: HashMap<CacheKey, Result<Served<T>, PipelineError>>,
    log: SharedLog,
    debug: bool,
) -> Result<ServiceResponse<Vec<T>>, PipelineError> {
    let FetchLog { raw, mut warnings } = std::mem::take(&mut *log.lock());
    let had_batch_warning = warnings.iter().any(|w| matches!(w, PipelineError::PartialBatchFailure { .. }));

    let mut payloads = Vec::with_capacity(keys.len());
    let mut errors = Vec::new();
    let mut cached = true;
    for key in keys {
        match results.get(key) {
            Some(Ok(served)) => {
                cached &= served.is_cached();
                payloads.push(served.payload.clone());
            }
            Some(Err(e)) => errors.push(e.clone()),
            None => errors.push(PipelineError::NotFound(key.id.clone())),
        }
    }

    if payloads.is_empty() {
        if let Some(err) = errors.iter().find(|e| e.is_server_error()).or(errors.first()) {
            return Err(err.clone());
        }
    }

    for err in errors {
        if let PipelineError::NotFound(id) = &err {
            warn!("Market {} not returned by upstream", id);
        } else if had_batch_warning {
            // Already summarised as a partial batch failure when this call led the refetch
            continue;
        }
        warnings.push(err);
    }

    Ok(ServiceResponse { payload: payloads, cached, stale: false, warnings, raw: debug.then_some(raw) })
}

async fn summarize_active_events<C: MarketDataClient + ?Sized>(
    client: &C,
    now: DateTime<Utc>,
    max_results: u32,
) -> Result<ActiveEventsSummary, PipelineError> {
    let mut sports: Vec<EventTypeSummary> = client
        .list_event_types(&MarketFilter::default())
        .await?
        .iter()
        .filter_map(build_event_type)
        .collect();
    // Busiest sports first; ties keep upstream order
    sports.sort_by(|a, b| b.market_count.unwrap_or(0).cmp(&a.market_count.unwrap_or(0)));

    let mut summary = ActiveEventsSummary::default();
    let mut markets: Vec<TopMarket> = Vec::new();

    for sport in sports.into_iter().take(SUMMARY_SPORTS) {
        let events: Vec<EventSummary> = client
            .list_events(&upcoming_events_filter(Some(sport.id.clone()), None, now))
            .await?
            .iter()
            .filter_map(build_event)
            .collect();

        let mut breakdown = SportBreakdown { sport: sport.name.clone(), event_count: events.len(), ..SportBreakdown::default() };

        for event in events.into_iter().take(SUMMARY_EVENTS_PER_SPORT) {
            let filter = event_markets_filter(event.id.clone(), DEFAULT_EVENT_MARKET_TYPES.iter().map(|t| t.to_string()).collect());
            let entries: Vec<MarketCatalogEntry> = client
                .list_market_catalogue(&filter, max_results, &MarketProjection::full())
                .await?
                .iter()
                .map(build_catalog_entry)
                .take(SUMMARY_MARKETS_PER_EVENT)
                .collect();

            let matched: Decimal = entries.iter().map(|entry| entry.total_matched).sum();
            breakdown.market_count += entries.len();
            breakdown.matched_amount += matched;

            markets.extend(entries.iter().map(|entry| TopMarket {
                id: entry.market_id.clone(),
                name: entry.market_name.clone(),
                event_name: event.name.clone(),
                matched_amount: entry.total_matched,
                selections: entry.runners.len(),
            }));

            summary.events.push(ActiveEvent {
                id: event.id,
                name: event.name,
                sport: sport.name.clone(),
                start_time: event.open_date,
                market_count: entries.len(),
                matched_amount: matched,
            });
        }

        summary.sports_breakdown.push(breakdown);
    }

    markets.sort_by(|a, b| b.matched_amount.cmp(&a.matched_amount));
    markets.truncate(SUMMARY_TOP_MARKETS);
    summary.markets = markets;
    summary.last_updated = Some(now.to_rfc3339_opts(SecondsFormat::Secs, true));

    debug!(
        "Summarised {} events across {} sports",
        summary.events.len(),
        summary.sports_breakdown.len()
    );
    Ok(summary)
}

fn upcoming_events_filter(event_type_id: Option<String>, competition_id: Option<String>, now: DateTime<Utc>) -> MarketFilter {
    let until = now + chrono::Duration::days(UPCOMING_EVENT_DAYS);
    MarketFilter {
        event_type_ids: event_type_id.into_iter().collect(),
        competition_ids: competition_id.into_iter().collect(),
        market_start_time: Some(TimeRange {
            from: Some(now.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            to: Some(until.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
        }),
        ..MarketFilter::default()
    }
}

fn event_markets_filter(event_id: String, market_types: Vec<String>) -> MarketFilter {
    MarketFilter { event_ids: vec![event_id], market_type_codes: market_types, ..MarketFilter::default() }
}

fn keys_for(class: DataClass, ids: &[MarketId]) -> Vec<CacheKey> {
    ids.iter().map(|id| CacheKey::new(class, id.as_str())).collect()
}

/// Keys built from validated ids always parse back
fn ids_of(keys: &[CacheKey]) -> Vec<MarketId> {
    keys.iter().filter_map(|key| MarketId::parse(&key.id).ok()).collect()
}

fn non_empty(ids: Vec<MarketId>, raw: &str) -> Result<Vec<MarketId>, PipelineError> {
    if ids.is_empty() {
        Err(PipelineError::InvalidIdentifier(raw.to_string()))
    } else {
        Ok(ids)
    }
}

/// Sport, competition and event ids are bare unsigned integers
fn numeric_id(raw: &str) -> Result<String, PipelineError> {
    let id = raw.trim();
    if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
        Ok(id.to_string())
    } else {
        Err(PipelineError::InvalidIdentifier(raw.to_string()))
    }
}

fn listing<T: Serialize>(rows: Vec<T>) -> Result<Value, PipelineError> {
    serde_json::to_value(rows).map_err(|e| PipelineError::upstream(format!("unserialisable listing: {e}")))
}
