//! Canonical model builder
//!
//! The only place where raw upstream shapes turn into canonical records.
//!
//! # Design Principles
//! 1. Total over any record the shape adapter accepts: a market always builds
//! 2. A malformed runner is skipped with a warning, never coerced to zeros
//! 3. A wrong-typed market-level scalar is defaulted and reported back to the
//!    caller through [`Built::issues`], so it can surface as a response warning
//! 4. `selection_id` is always the string form of whatever upstream sent

use rust_decimal::Decimal;
use tracing::warn;

use crate::error::FieldError;
use crate::ladder::{build_ladder, collect_levels};
use crate::shape::{fields, Field, RawRecord, RecordRef};
use crate::types::{
    CatalogRunner, CompetitionRef, CompetitionSummary, EventRef, EventSummary, EventTypeRef,
    EventTypeSummary, MarketBook, MarketCatalogEntry, RunnerBook, Side,
};

/// Runner status when upstream omits it
pub const DEFAULT_RUNNER_STATUS: &str = "ACTIVE";

/// Market status when upstream omits it
pub const DEFAULT_MARKET_STATUS: &str = "OPEN";

// ============================================================================
// Market book
// ============================================================================

/// A canonical record plus the market-level fields that had to be defaulted
#[derive(Debug, Clone, PartialEq)]
pub struct Built<T> {
    pub record: T,
    /// Present-but-wrong-typed market fields, in field order
    pub issues: Vec<FieldError>,
}

/// Build the canonical live-pricing snapshot of one market
pub fn build_market_book(raw: &RawRecord) -> MarketBook {
    build_market_book_checked(raw).record
}

/// [`build_market_book`], keeping the defaulted market fields
pub fn build_market_book_checked(raw: &RawRecord) -> Built<MarketBook> {
    let record = raw.view();
    let mut scalar = MarketScalars::new(market_id_of(record));

    let runners = each_runner(record, &mut scalar, build_runner_book);
    let book = MarketBook {
        status: scalar.or_default(record.string_or(&fields::STATUS, DEFAULT_MARKET_STATUS), || {
            DEFAULT_MARKET_STATUS.to_string()
        }),
        bet_delay: scalar.or_default(record.u32_or(&fields::BET_DELAY, 0), || 0),
        is_data_delayed: scalar.or_default(record.bool_or(&fields::IS_MARKET_DATA_DELAYED, false), || false),
        total_matched: scalar.or_default(record.decimal_or(&fields::TOTAL_MATCHED, Decimal::ZERO), || Decimal::ZERO),
        number_of_winners: scalar.or_default(record.u32_or(&fields::NUMBER_OF_WINNERS, 1), || 1),
        publish_time: scalar.or_default(record.str(&fields::PUBLISH_TIME).map(|s| s.map(str::to_string)), || None),
        market_id: scalar.market_id.clone(),
        runners,
    };

    Built { record: book, issues: scalar.issues }
}

fn build_runner_book(runner: RecordRef<'_>) -> Result<RunnerBook, FieldError> {
    let selection_id = runner
        .id(&fields::SELECTION_ID)?
        .ok_or_else(|| FieldError::missing(fields::SELECTION_ID.name))?;

    // Offers normally sit under `ex`; flattened payloads carry them on the runner
    let offers = runner.child(&fields::EX)?.unwrap_or(runner);

    Ok(RunnerBook {
        selection_id,
        status: runner.string_or(&fields::STATUS, DEFAULT_RUNNER_STATUS)?,
        handicap: runner.decimal_or(&fields::HANDICAP, Decimal::ZERO)?,
        back: build_ladder(Side::Back, offers.shape(), offers.list(&fields::AVAILABLE_TO_BACK)?)?,
        lay: build_ladder(Side::Lay, offers.shape(), offers.list(&fields::AVAILABLE_TO_LAY)?)?,
        traded_volume: collect_levels(offers.shape(), offers.list(&fields::TRADED_VOLUME)?)?,
        last_price_traded: runner.decimal(&fields::LAST_PRICE_TRADED)?,
        total_matched: runner.decimal_or(&fields::TOTAL_MATCHED, Decimal::ZERO)?,
    })
}

// ============================================================================
// Market catalogue
// ============================================================================

/// Build the canonical catalogue entry of one market
pub fn build_catalog_entry(raw: &RawRecord) -> MarketCatalogEntry {
    build_catalog_entry_checked(raw).record
}

/// [`build_catalog_entry`], keeping the defaulted market fields
pub fn build_catalog_entry_checked(raw: &RawRecord) -> Built<MarketCatalogEntry> {
    let record = raw.view();
    let mut scalar = MarketScalars::new(market_id_of(record));

    let market_type = match record.str(&fields::MARKET_TYPE) {
        Ok(Some(market_type)) => Ok(Some(market_type.to_string())),
        // Catalogue responses nest the type inside the market description
        Ok(None) => record
            .child(&fields::DESCRIPTION)
            .and_then(|d| d.map(|d| d.str(&fields::MARKET_TYPE)).transpose())
            .map(|t| t.flatten().map(str::to_string)),
        Err(e) => Err(e),
    };

    let runners = each_runner(record, &mut scalar, build_catalog_runner);
    let entry = MarketCatalogEntry {
        market_name: scalar.or_default(owned(record.str(&fields::MARKET_NAME)), || None),
        start_time: scalar.or_default(owned(record.str(&fields::MARKET_START_TIME)), || None),
        market_type: scalar.or_default(market_type, || None),
        total_matched: scalar.or_default(record.decimal_or(&fields::TOTAL_MATCHED, Decimal::ZERO), || Decimal::ZERO),
        event_type: scalar.or_default(child_ref(record, &fields::EVENT_TYPE, event_type_ref), || None),
        event: scalar.or_default(child_ref(record, &fields::EVENT, event_ref), || None),
        competition: scalar.or_default(child_ref(record, &fields::COMPETITION, competition_ref), || None),
        market_id: scalar.market_id.clone(),
        runners,
    };

    Built { record: entry, issues: scalar.issues }
}

fn build_catalog_runner(runner: RecordRef<'_>) -> Result<CatalogRunner, FieldError> {
    let selection_id = runner
        .id(&fields::SELECTION_ID)?
        .ok_or_else(|| FieldError::missing(fields::SELECTION_ID.name))?;

    Ok(CatalogRunner {
        selection_id,
        name: owned(runner.str(&fields::RUNNER_NAME))?,
        handicap: runner.decimal_or(&fields::HANDICAP, Decimal::ZERO)?,
        sort_priority: runner.i64_or(&fields::SORT_PRIORITY, 0)?,
        silk_colour: owned(runner.str(&fields::SILK_COLOUR))?,
    })
}

fn event_type_ref(record: RecordRef<'_>) -> Result<Option<EventTypeRef>, FieldError> {
    let Some(id) = record.id(&fields::ID)? else { return Ok(None) };
    Ok(Some(EventTypeRef { id, name: owned(record.str(&fields::NAME))? }))
}

fn event_ref(record: RecordRef<'_>) -> Result<Option<EventRef>, FieldError> {
    let Some(id) = record.id(&fields::ID)? else { return Ok(None) };
    Ok(Some(EventRef {
        id,
        name: owned(record.str(&fields::NAME))?,
        country_code: owned(record.str(&fields::COUNTRY_CODE))?,
        timezone: owned(record.str(&fields::TIMEZONE))?,
        open_date: owned(record.str(&fields::OPEN_DATE))?,
    }))
}

fn competition_ref(record: RecordRef<'_>) -> Result<Option<CompetitionRef>, FieldError> {
    let Some(id) = record.id(&fields::ID)? else { return Ok(None) };
    Ok(Some(CompetitionRef { id, name: owned(record.str(&fields::NAME))? }))
}

// ============================================================================
// Navigation listings
// ============================================================================

/// Sport listing row. Accepts `{eventType: {id, name}, marketCount}` or a bare `{id, name}`.
pub fn build_event_type(raw: &RawRecord) -> Option<EventTypeSummary> {
    let record = raw.view();
    let result = wrapped(record, &fields::EVENT_TYPE).and_then(|inner| {
        Ok(EventTypeSummary {
            id: required_id(inner)?,
            name: required_name(inner)?,
            market_count: record.u64(&fields::MARKET_COUNT)?,
        })
    });
    keep_or_warn("event type", raw, result)
}

/// Competition listing row. Region sits on the wrapper, not the inner competition.
pub fn build_competition(raw: &RawRecord) -> Option<CompetitionSummary> {
    let record = raw.view();
    let result = wrapped(record, &fields::COMPETITION).and_then(|inner| {
        Ok(CompetitionSummary {
            id: required_id(inner)?,
            name: required_name(inner)?,
            region: owned(record.str(&fields::COMPETITION_REGION))?,
        })
    });
    keep_or_warn("competition", raw, result)
}

/// Event listing row
pub fn build_event(raw: &RawRecord) -> Option<EventSummary> {
    let record = raw.view();
    let result = wrapped(record, &fields::EVENT).and_then(|inner| {
        Ok(EventSummary {
            id: required_id(inner)?,
            name: required_name(inner)?,
            country_code: owned(inner.str(&fields::COUNTRY_CODE))?,
            timezone: owned(inner.str(&fields::TIMEZONE))?,
            open_date: owned(inner.str(&fields::OPEN_DATE))?,
        })
    });
    keep_or_warn("event", raw, result)
}

fn wrapped<'a>(record: RecordRef<'a>, field: &Field) -> Result<RecordRef<'a>, FieldError> {
    Ok(record.child(field)?.unwrap_or(record))
}

fn required_id(record: RecordRef<'_>) -> Result<String, FieldError> {
    record.id(&fields::ID)?.ok_or_else(|| FieldError::missing(fields::ID.name))
}

fn required_name(record: RecordRef<'_>) -> Result<String, FieldError> {
    Ok(record.str(&fields::NAME)?.ok_or_else(|| FieldError::missing(fields::NAME.name))?.to_string())
}

fn keep_or_warn<T>(kind: &str, raw: &RawRecord, result: Result<T, FieldError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Skipping {} record ({:?} shape): {}", kind, raw.shape(), e);
            None
        }
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

fn market_id_of(record: RecordRef<'_>) -> String {
    match record.id(&fields::MARKET_ID) {
        Ok(Some(id)) => id,
        Ok(None) => {
            warn!("Upstream market record has no market id");
            String::new()
        }
        Err(e) => {
            warn!("Upstream market record has a malformed market id: {}", e);
            String::new()
        }
    }
}

/// Build every runner of a market, skipping the ones that fail
fn each_runner<'a, T>(
    record: RecordRef<'a>,
    scalar: &mut MarketScalars,
    build: impl Fn(RecordRef<'a>) -> Result<T, FieldError>,
) -> Vec<T> {
    let raw_runners = scalar.or_default(record.list(&fields::RUNNERS), || &[][..]);
    let market_id = scalar.market_id.as_str();

    raw_runners
        .iter()
        .enumerate()
        .filter_map(|(index, raw)| match record.element(raw).and_then(&build) {
            Ok(runner) => Some(runner),
            Err(e) => {
                warn!("Market {}: skipping runner #{}: {}", market_id, index, e);
                None
            }
        })
        .collect()
}

fn child_ref<'a, T>(
    record: RecordRef<'a>,
    field: &Field,
    build: impl Fn(RecordRef<'a>) -> Result<Option<T>, FieldError>,
) -> Result<Option<T>, FieldError> {
    match record.child(field)? {
        Some(child) => build(child),
        None => Ok(None),
    }
}

fn owned(value: Result<Option<&str>, FieldError>) -> Result<Option<String>, FieldError> {
    value.map(|v| v.map(str::to_string))
}

/// Market-level fields are defaulted, never fatal; each default is recorded
struct MarketScalars {
    market_id: String,
    issues: Vec<FieldError>,
}

impl MarketScalars {
    fn new(market_id: String) -> Self {
        Self { market_id, issues: Vec::new() }
    }

    fn or_default<T>(&mut self, value: Result<T, FieldError>, default: impl FnOnce() -> T) -> T {
        match value {
            Ok(value) => value,
            Err(e) => {
                warn!("Market {}: using default for {}", self.market_id, e);
                self.issues.push(e);
                default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceLevel;
    use serde_json::{json, Map, Value};

    fn dec(text: &str) -> Decimal {
        Decimal::from_str_exact(text).unwrap()
    }

    fn mapping(value: Value) -> RawRecord {
        RawRecord::mapping(value).unwrap()
    }

    /// Re-key a wire mapping the way a typed SDK object exposes its attributes
    fn as_object_shape(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let converted: Map<String, Value> =
                    map.iter().map(|(k, v)| (snake_case(k), as_object_shape(v))).collect();
                Value::Object(converted)
            }
            Value::Array(items) => Value::Array(items.iter().map(as_object_shape).collect()),
            other => other.clone(),
        }
    }

    fn snake_case(key: &str) -> String {
        let mut out = String::with_capacity(key.len() + 4);
        for c in key.chars() {
            if c.is_ascii_uppercase() {
                out.push('_');
                out.push(c.to_ascii_lowercase());
            } else {
                out.push(c);
            }
        }
        out
    }

    fn object(value: Value) -> RawRecord {
        match as_object_shape(&value) {
            Value::Object(map) => RawRecord::Object(map),
            _ => unreachable!(),
        }
    }

    fn sample_book() -> Value {
        json!({
            "marketId": "1.179082386",
            "isMarketDataDelayed": false,
            "status": "OPEN",
            "betDelay": 0,
            "totalMatched": 15234.56,
            "numberOfWinners": 1,
            "runners": [
                {
                    "selectionId": 47972,
                    "handicap": 0,
                    "status": "ACTIVE",
                    "lastPriceTraded": 1.95,
                    "totalMatched": 1200.5,
                    "ex": {
                        "availableToBack": [{"price": 1.95, "size": 10}, {"price": 1.94, "size": 20}],
                        "availableToLay": [{"price": 1.97, "size": 5.5}],
                        "tradedVolume": [{"price": 1.96, "size": 250.25}]
                    }
                },
                {
                    "selectionId": "47973",
                    "ex": {"availableToBack": [], "availableToLay": []}
                }
            ]
        })
    }

    #[test]
    fn test_market_book_from_mapping() {
        let book = build_market_book(&mapping(sample_book()));

        assert_eq!(book.market_id, "1.179082386");
        assert_eq!(book.status, "OPEN");
        assert_eq!(book.bet_delay, 0);
        assert_eq!(book.total_matched, dec("15234.56"));
        assert_eq!(book.runners.len(), 2);

        let first = &book.runners[0];
        assert_eq!(first.selection_id, "47972");
        assert_eq!(first.back.levels()[0], PriceLevel::new(dec("1.95"), dec("10")));
        assert_eq!(first.back.levels()[1], PriceLevel::new(dec("1.94"), dec("20")));
        assert!(first.back.levels()[2].is_zero());
        assert_eq!(first.lay.levels()[0], PriceLevel::new(dec("1.97"), dec("5.5")));
        assert_eq!(first.last_price_traded, Some(dec("1.95")));
        assert_eq!(first.traded_volume, vec![PriceLevel::new(dec("1.96"), dec("250.25"))]);

        let second = &book.runners[1];
        assert_eq!(second.selection_id, "47973");
        assert_eq!(second.status, DEFAULT_RUNNER_STATUS);
        assert!(second.back.is_empty());
    }

    #[test]
    fn test_both_shapes_build_identical_books() {
        let from_mapping = build_market_book(&mapping(sample_book()));
        let from_object = build_market_book(&object(sample_book()));

        assert_eq!(from_mapping, from_object);
        assert_eq!(
            serde_json::to_string(&from_mapping).unwrap(),
            serde_json::to_string(&from_object).unwrap()
        );
    }

    #[test]
    fn test_malformed_runner_skipped_rest_kept() {
        let raw = mapping(json!({
            "marketId": "1.2",
            "runners": [
                {"selectionId": 1, "ex": {"availableToBack": [{"price": "abc", "size": 2}]}},
                "not a runner",
                {"handicap": 0},
                {"selectionId": 4, "handicap": "plus one"},
                {"selectionId": 5}
            ]
        }));

        let book = build_market_book(&raw);
        let ids: Vec<&str> = book.runners.iter().map(|r| r.selection_id.as_str()).collect();
        assert_eq!(ids, vec!["5"]);
    }

    #[test]
    fn test_market_defaults_when_absent() {
        let book = build_market_book(&mapping(json!({"marketId": "1.2"})));
        assert_eq!(book.status, DEFAULT_MARKET_STATUS);
        assert_eq!(book.number_of_winners, 1);
        assert!(!book.is_data_delayed);
        assert!(book.runners.is_empty());
        assert_eq!(book.publish_time, None);
    }

    #[test]
    fn test_wrong_typed_market_scalar_defaults() {
        let book = build_market_book(&mapping(json!({
            "marketId": "1.2",
            "betDelay": "soon",
            "totalMatched": [],
            "runners": [{"selectionId": 1}]
        })));
        assert_eq!(book.bet_delay, 0);
        assert_eq!(book.total_matched, Decimal::ZERO);
        assert_eq!(book.runners.len(), 1);
    }

    #[test]
    fn test_defaulted_market_fields_are_reported() {
        let built = build_market_book_checked(&mapping(json!({
            "marketId": "1.2",
            "betDelay": "soon",
            "totalMatched": [],
            "runners": [{"selectionId": 1}, {"selectionId": []}]
        })));

        let fields: Vec<&str> = built.issues.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["betDelay", "totalMatched"]);
        // A skipped runner is not a market-level default
        assert_eq!(built.record.runners.len(), 1);

        let clean = build_market_book_checked(&mapping(json!({"marketId": "1.2", "totalMatched": 10})));
        assert!(clean.issues.is_empty());
    }

    #[test]
    fn test_unusable_runners_field_is_reported() {
        let built = build_catalog_entry_checked(&mapping(json!({"marketId": "1.3", "runners": "none"})));
        assert!(built.record.runners.is_empty());
        assert_eq!(built.issues.len(), 1);
        assert_eq!(built.issues[0].field, "runners");
    }

    #[test]
    fn test_flattened_runner_offers() {
        let book = build_market_book(&mapping(json!({
            "marketId": "1.2",
            "runners": [{"selectionId": 9, "availableToBack": [{"price": 3.5, "size": 1}]}]
        })));
        assert_eq!(book.runners[0].back.levels()[0].price(), dec("3.5"));
    }

    fn sample_catalog() -> Value {
        json!({
            "marketId": "1.179082386",
            "marketName": "Match Odds",
            "marketStartTime": "2024-05-04T14:00:00.000Z",
            "totalMatched": 100,
            "description": {"marketType": "MATCH_ODDS"},
            "eventType": {"id": "1", "name": "Soccer"},
            "competition": {"id": "10932509", "name": "English Premier League"},
            "event": {"id": "33131416", "name": "Arsenal v Bournemouth", "countryCode": "GB",
                      "timezone": "Europe/London", "openDate": "2024-05-04T14:00:00.000Z"},
            "runners": [
                {"selectionId": 1096, "runnerName": "Arsenal", "handicap": 0, "sortPriority": 1},
                {"selectionId": 1141, "runnerName": "Bournemouth", "handicap": 0, "sortPriority": 2,
                 "silkColor": "red"},
                {"selectionId": 58805, "runnerName": "The Draw", "handicap": 0, "sortPriority": 3}
            ]
        })
    }

    #[test]
    fn test_catalog_entry() {
        let entry = build_catalog_entry(&mapping(sample_catalog()));

        assert_eq!(entry.market_id, "1.179082386");
        assert_eq!(entry.market_name.as_deref(), Some("Match Odds"));
        assert_eq!(entry.market_type.as_deref(), Some("MATCH_ODDS"));
        assert_eq!(entry.event_type.as_ref().map(|e| e.id.as_str()), Some("1"));
        assert_eq!(entry.competition.as_ref().and_then(|c| c.name.as_deref()), Some("English Premier League"));

        let event = entry.event.as_ref().unwrap();
        assert_eq!(event.country_code.as_deref(), Some("GB"));
        assert_eq!(event.open_date.as_deref(), Some("2024-05-04T14:00:00.000Z"));

        assert_eq!(entry.runners.len(), 3);
        assert_eq!(entry.runners[0].selection_id, "1096");
        assert_eq!(entry.runners[1].silk_colour.as_deref(), Some("red"));
        assert_eq!(entry.runners[2].sort_priority, 3);
    }

    #[test]
    fn test_catalog_same_from_object_shape() {
        let from_mapping = build_catalog_entry(&mapping(sample_catalog()));
        let from_object = build_catalog_entry(&object(sample_catalog()));
        assert_eq!(from_mapping, from_object);
    }

    #[test]
    fn test_catalog_missing_references() {
        let entry = build_catalog_entry(&mapping(json!({"marketId": "1.5", "event": {"name": "no id"}})));
        assert!(entry.event.is_none());
        assert!(entry.event_type.is_none());
        assert!(entry.runners.is_empty());
    }

    #[test]
    fn test_navigation_wrapped_and_bare() {
        let wrapped = mapping(json!({"eventType": {"id": "1", "name": "Soccer"}, "marketCount": 1234}));
        let bare = mapping(json!({"id": "7", "name": "Horse Racing"}));

        let soccer = build_event_type(&wrapped).unwrap();
        assert_eq!(soccer.id, "1");
        assert_eq!(soccer.market_count, Some(1234));

        let racing = build_event_type(&bare).unwrap();
        assert_eq!(racing.name, "Horse Racing");
        assert_eq!(racing.market_count, None);

        assert!(build_event_type(&mapping(json!({"eventType": {"id": "2"}}))).is_none());
    }

    #[test]
    fn test_competition_region_from_wrapper() {
        let raw = object(json!({
            "competition": {"id": "10932509", "name": "English Premier League"},
            "competitionRegion": "GBR"
        }));
        let competition = build_competition(&raw).unwrap();
        assert_eq!(competition.region.as_deref(), Some("GBR"));
    }

    #[test]
    fn test_event_listing() {
        let raw = mapping(json!({
            "event": {"id": "33131416", "name": "Arsenal v Bournemouth", "countryCode": "GB"},
            "marketCount": 80
        }));
        let event = build_event(&raw).unwrap();
        assert_eq!(event.id, "33131416");
        assert_eq!(event.country_code.as_deref(), Some("GB"));
        assert_eq!(event.timezone, None);
    }
}
