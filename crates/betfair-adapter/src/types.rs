//! Canonical market-data types and upstream request parameters
//!
//! # Design Principles
//! 1. Prices and sizes are `Decimal` - no float re-derivation anywhere in the pipeline
//! 2. Canonical records carry no presentation defaults (see `legacy` for those)
//! 3. `selection_id` is always a string, whatever the upstream sent
//! 4. Ladders are fixed at depth 3 by construction

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Depth of every price ladder
pub const LADDER_DEPTH: usize = 3;

// ============================================================================
// Identifiers
// ============================================================================

/// Market identifier: two dot-separated unsigned integers, e.g. `1.179082386`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MarketId(String);

impl MarketId {
    /// Validate and wrap a raw market id. Never coerces.
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let valid = match raw.split_once('.') {
            Some((exchange, market)) => is_digits(exchange) && is_digits(market),
            None => false,
        };

        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(PipelineError::InvalidIdentifier(raw.to_string()))
        }
    }

    /// Parse a comma-separated id list (`ids=1.1,1.2`).
    /// Items are trimmed and empty items dropped; any malformed item rejects the whole list.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, PipelineError> {
        raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(Self::parse).collect()
    }

    /// Dotted id text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MarketId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MarketId {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MarketId> for String {
    fn from(id: MarketId) -> Self {
        id.0
    }
}

// ============================================================================
// Prices
// ============================================================================

/// One price point and the stake available at it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    price: Decimal,
    size: Decimal,
}

impl PriceLevel {
    /// Level at `price` with `size` available
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }

    /// Padding level used when fewer than `LADDER_DEPTH` observations exist
    pub fn zero() -> Self {
        Self { price: Decimal::ZERO, size: Decimal::ZERO }
    }

    /// Odds of this level
    pub fn price(&self) -> Decimal {
        self.price
    }

    /// Amount available or traded at this level
    pub fn size(&self) -> Decimal {
        self.size
    }

    /// Zero-filled placeholder level
    pub fn is_zero(&self) -> bool {
        self.price.is_zero() && self.size.is_zero()
    }
}

/// Which side of the book a ladder describes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Available to back: best (highest) price first
    Back,
    /// Available to lay: best (lowest) price first
    Lay,
}

/// Fixed-depth ordered ladder. Built only by `ladder::build_ladder` / `PriceLadder::empty`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLadder([PriceLevel; LADDER_DEPTH]);

impl PriceLadder {
    /// All-zero ladder
    pub fn empty() -> Self {
        Self([PriceLevel::zero(); LADDER_DEPTH])
    }

    pub(crate) fn from_levels(levels: [PriceLevel; LADDER_DEPTH]) -> Self {
        Self(levels)
    }

    /// All levels, best first
    pub fn levels(&self) -> &[PriceLevel; LADDER_DEPTH] {
        &self.0
    }

    /// Best level, if any real observation exists
    pub fn best(&self) -> Option<&PriceLevel> {
        self.0.first().filter(|level| !level.is_zero())
    }

    /// Always `LADDER_DEPTH`
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Every level is zero-filled
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(PriceLevel::is_zero)
    }
}

// ============================================================================
// Market book (live pricing)
// ============================================================================

/// One selection's live pricing state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerBook {
    pub selection_id: String,
    pub status: String,
    pub handicap: Decimal,
    pub back: PriceLadder,
    pub lay: PriceLadder,
    /// Traded volume by price, upstream order
    pub traded_volume: Vec<PriceLevel>,
    pub last_price_traded: Option<Decimal>,
    pub total_matched: Decimal,
}

/// Canonical live-pricing snapshot of one market
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketBook {
    pub market_id: String,
    pub status: String,
    pub bet_delay: u32,
    pub is_data_delayed: bool,
    pub total_matched: Decimal,
    pub number_of_winners: u32,
    /// Upstream publish time, verbatim
    pub publish_time: Option<String>,
    /// Upstream order preserved
    pub runners: Vec<RunnerBook>,
}

impl MarketBook {
    /// Runner with `selection_id`, if listed
    pub fn runner(&self, selection_id: &str) -> Option<&RunnerBook> {
        self.runners.iter().find(|r| r.selection_id == selection_id)
    }
}

// ============================================================================
// Market catalogue (slow-moving metadata)
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTypeRef {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    pub id: String,
    pub name: Option<String>,
    pub country_code: Option<String>,
    pub timezone: Option<String>,
    pub open_date: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetitionRef {
    pub id: String,
    pub name: Option<String>,
}

/// Runner metadata from the catalogue; no pricing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRunner {
    pub selection_id: String,
    pub name: Option<String>,
    pub handicap: Decimal,
    pub sort_priority: i64,
    pub silk_colour: Option<String>,
}

/// Canonical catalogue entry for one market
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketCatalogEntry {
    pub market_id: String,
    pub market_name: Option<String>,
    pub start_time: Option<String>,
    pub market_type: Option<String>,
    pub total_matched: Decimal,
    pub event_type: Option<EventTypeRef>,
    pub event: Option<EventRef>,
    pub competition: Option<CompetitionRef>,
    pub runners: Vec<CatalogRunner>,
}

// ============================================================================
// Navigation listings
// ============================================================================

/// A sport
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTypeSummary {
    pub id: String,
    pub name: String,
    pub market_count: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetitionSummary {
    pub id: String,
    pub name: String,
    pub region: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: String,
    pub name: String,
    pub country_code: Option<String>,
    pub timezone: Option<String>,
    pub open_date: Option<String>,
}

/// Sport ids shown on the landing page: soccer, tennis, cricket, horse and greyhound racing
pub const MAJOR_SPORT_IDS: [&str; 5] = ["1", "2", "4", "7", "4339"];

// ============================================================================
// Dashboard aggregate
// ============================================================================

/// Per-sport totals for the active-events dashboard
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SportBreakdown {
    pub sport: String,
    pub event_count: usize,
    pub market_count: usize,
    pub matched_amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActiveEvent {
    pub id: String,
    pub name: String,
    pub sport: String,
    pub start_time: Option<String>,
    pub market_count: usize,
    pub matched_amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopMarket {
    pub id: String,
    pub name: Option<String>,
    pub event_name: String,
    pub matched_amount: Decimal,
    pub selections: usize,
}

/// Slow-moving aggregate served under the best-effort policy
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveEventsSummary {
    pub events: Vec<ActiveEvent>,
    pub sports_breakdown: Vec<SportBreakdown>,
    pub markets: Vec<TopMarket>,
    /// RFC 3339; `None` for the never-populated default
    pub last_updated: Option<String>,
}

// ============================================================================
// Upstream request parameters
// Source: exchange betting API reference (listMarketCatalogue / listMarketBook)
// ============================================================================

/// Inclusive time window filter
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

/// Market filter shared by every listing operation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_query: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub event_type_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub competition_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub event_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub market_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub market_type_codes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_start_time: Option<TimeRange>,
}

impl MarketFilter {
    /// Filter selecting exactly `ids`
    pub fn for_markets(ids: &[MarketId]) -> Self {
        Self { market_ids: ids.iter().map(|id| id.as_str().to_string()).collect(), ..Self::default() }
    }
}

/// Catalogue projection flags
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketProjection {
    Competition,
    Event,
    EventType,
    MarketStartTime,
    MarketDescription,
    RunnerDescription,
    RunnerMetadata,
}

impl MarketProjection {
    /// Everything the catalogue renderer reads
    pub fn full() -> Vec<Self> {
        vec![
            MarketProjection::Competition,
            MarketProjection::Event,
            MarketProjection::EventType,
            MarketProjection::MarketStartTime,
            MarketProjection::MarketDescription,
            MarketProjection::RunnerDescription,
            MarketProjection::RunnerMetadata,
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceData {
    SpAvailable,
    SpTraded,
    ExBestOffers,
    ExAllOffers,
    ExTraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExBestOffersOverrides {
    pub best_prices_depth: u32,
}

/// Price projection for listMarketBook
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceProjection {
    pub price_data: Vec<PriceData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ex_best_offers_overrides: Option<ExBestOffersOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtualise: Option<bool>,
}

impl PriceProjection {
    /// Best offers to ladder depth plus traded volume
    pub fn best_offers() -> Self {
        Self {
            price_data: vec![PriceData::ExBestOffers, PriceData::ExTraded],
            ex_best_offers_overrides: Some(ExBestOffersOverrides {
                best_prices_depth: LADDER_DEPTH as u32,
            }),
            virtualise: None,
        }
    }
}

impl Default for PriceProjection {
    fn default() -> Self {
        Self::best_offers()
    }
}
