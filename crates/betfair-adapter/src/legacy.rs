//! Legacy schema assembler
//!
//! Renders canonical records into the wire objects existing consumers were
//! built against. Field order is part of the contract (one consumer reads the
//! payload as ordered text), so every object is assembled in insertion order
//! and `serde_json` keeps it (`preserve_order`).
//!
//! This module is the only place that hard-codes legacy placeholder values.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::types::{CatalogRunner, EventTypeRef, MarketBook, MarketCatalogEntry, PriceLadder, PriceLevel, RunnerBook};

/// `timestamp` when upstream sent no publish time
pub const DEFAULT_TIMESTAMP: &str = "0001-01-01T00:00:00";

/// `marketType` when the catalogue carries none
pub const DEFAULT_MARKET_TYPE: &str = "MATCH_ODDS";

/// `countryCode` for a known event without one
pub const DEFAULT_COUNTRY_CODE: &str = "GB";

/// Rules text every catalogue payload has always carried
pub const LEGACY_RULES: &str = "<b>Market Information</b><br>For further information please see <a href=http://content.betfair.com/aboutus/content.asp?sWhichKey=Rules%20and%20Regulations#undefined.do style=color:0163ad; text-decoration: underline; target=_blank>Rules & Regs</a>.<br><br> Who will win this Test match? At the start of scheduled play all unmatched bets will be cancelled and this market will be turned in-play. This market will not be actively managed therefore it is the responsibility of all users to manage their own positions. Competition Rules apply. <br><br>Customers should be aware that:<br><br><li><b/>Transmissions described as \"live\" by some broadcasters may actually be delayed</li><br><li>The extent of any such delay may vary, depending on the set-up through which they are receiving pictures or data.</b></li><br>\n<ul><li><b>If the official result is a Tied Match in any Test, County or Limited Overs Match then all bets on Match Odds markets will be void</b></li><br><li>At the conclusion of each days play this market will revert to a non in-play status with no time delay in effect then at the start of the following days play this market will be turned in-play again with unmatched bets <b><FONT COLOR=\"red\">not</FONT></b> cancelled.</li>";

// ============================================================================
// Market book (`/Data`)
// ============================================================================

/// Render one market book: `id, winners, betDelay, totalMatched, marketStatus,
/// maxBetSize, bettingAllowed, isMarketDataDelayed, runners, isRoot, timestamp, winnerIDs`
pub fn render_market_book(book: &MarketBook) -> Value {
    json!({
        "id": book.market_id,
        "winners": book.number_of_winners,
        "betDelay": book.bet_delay,
        "totalMatched": decimal_to_json(book.total_matched),
        "marketStatus": book.status,
        "maxBetSize": 0,
        "bettingAllowed": true,
        "isMarketDataDelayed": book.is_data_delayed,
        "runners": book.runners.iter().map(render_book_runner).collect::<Vec<_>>(),
        "isRoot": false,
        "timestamp": book.publish_time.as_deref().unwrap_or(DEFAULT_TIMESTAMP),
        "winnerIDs": [],
    })
}

fn render_book_runner(runner: &RunnerBook) -> Value {
    let [b1, b2, b3] = runner.back.levels();
    let [l1, l2, l3] = runner.lay.levels();

    json!({
        "id": runner.selection_id,
        "price1": decimal_to_json(b1.price()),
        "price2": decimal_to_json(b2.price()),
        "price3": decimal_to_json(b3.price()),
        "size1": decimal_to_json(b1.size()),
        "size2": decimal_to_json(b2.size()),
        "size3": decimal_to_json(b3.size()),
        "lay1": decimal_to_json(l1.price()),
        "lay2": decimal_to_json(l2.price()),
        "lay3": decimal_to_json(l3.price()),
        "ls1": decimal_to_json(l1.size()),
        "ls2": decimal_to_json(l2.size()),
        "ls3": decimal_to_json(l3.size()),
        "status": runner.status,
        "handicap": decimal_to_json(runner.handicap),
    })
}

/// `/Data` response envelope around rendered books
pub fn render_market_data_envelope(request_id: Uuid, market_books: Vec<Value>) -> Value {
    json!({
        "requestId": request_id.to_string(),
        "marketBooks": market_books,
        "news": "",
        "scores": {"currentSet": 0},
    })
}

// ============================================================================
// Market catalogue (`/catalog2`, `/catalogs`)
// ============================================================================

/// Render one catalogue entry with the prices known at render time.
///
/// Runners without a matching book runner get zero-filled prices.
pub fn render_catalog_entry(entry: &MarketCatalogEntry, prices: Option<&MarketBook>, updated_at: DateTime<Utc>) -> Value {
    let event = entry.event.as_ref();
    let runners: Vec<Value> = entry
        .runners
        .iter()
        .map(|runner| {
            let book_runner = prices.and_then(|book| book.runner(&runner.selection_id));
            render_catalog_runner(&entry.market_id, runner, book_runner)
        })
        .collect();

    let mut market = into_map(json!({
        "marketId": entry.market_id,
        "marketName": entry.market_name,
        "marketStartTime": entry.start_time,
        "suspendTime": null,
        "settleTime": null,
        "bettingType": "ODDS",
        "isTurnInPlayEnabled": true,
        "marketType": entry.market_type.as_deref().unwrap_or(DEFAULT_MARKET_TYPE),
        "priceLadderDetails": "CLASSIC",
        "eventTypeId": entry.event_type.as_ref().map(|t| numeric_id(&t.id)),
        "eventId": event.map(|e| numeric_id(&e.id)),
        "eventName": event.and_then(|e| e.name.as_deref()),
        "competitionId": entry.competition.as_ref().map(|c| c.id.as_str()),
    }));
    market.extend(into_map(json!({
        "winners": 1,
        "status": "OPEN",
        "countryCode": event.map(|e| e.country_code.as_deref().unwrap_or(DEFAULT_COUNTRY_CODE)),
        "rules": LEGACY_RULES,
        "maxBetSize": 2_000_000,
        "origin": "BETFAIR",
        "externalId": null,
        "settleAttempts": 0,
        "maxExposure": 20_000_000,
        "betDelay": 1,
        "news": "",
        "unmatchBet": true,
        "sizeOverride": false,
        "sortPriority": -1,
        "cancelDelay": 0,
        "maxOdds": 150,
        "runners": runners,
    })));

    if let Some((sport_name, sport)) = entry.event_type.as_ref().and_then(render_sport) {
        market.insert("eventType".to_string(), Value::String(sport_name));
        market.insert("sport".to_string(), sport);
    }

    market.extend(into_map(json!({
        "marketStartTimeUtc": entry.start_time.as_deref().and_then(utc_ticks),
        "suspendTimeUtc": null,
        "settleTimeUtc": null,
        "raceName": null,
        "minutesToOpenMarket": 9999,
        "statusOverride": 0,
        "hasFancyOdds": false,
        "isFancy": false,
        "isLocalFancy": false,
        "isBmMarket": true,
        "hasSessionMarkets": false,
        "hasBookmakerMarkets": false,
        "updatedAt": updated_at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
        "casinoPl": null,
        "removedRunnersCount": 0,
        "state": 0,
    })));

    Value::Object(market)
}

/// Replace each runner's `prices` in a rendered catalogue entry with `book`'s ladders.
///
/// Catalogue entries outlive the prices they carry, so the cached render is
/// priced again on every serve. Runners missing from `book` are zero-filled;
/// the `prices` key keeps its position.
pub fn overlay_catalog_prices(entry: &mut Value, book: Option<&MarketBook>) {
    let Some(runners) = entry.get_mut("runners").and_then(Value::as_array_mut) else {
        return;
    };

    for runner in runners {
        let selection_id = match runner.get("selectionId") {
            Some(Value::Number(id)) => id.to_string(),
            Some(Value::String(id)) => id.clone(),
            _ => continue,
        };
        let book_runner = book.and_then(|book| book.runner(&selection_id));
        if let Some(prices) = runner.get_mut("prices") {
            *prices = render_prices(book_runner);
        }
    }
}

fn render_catalog_runner(market_id: &str, runner: &CatalogRunner, prices: Option<&RunnerBook>) -> Value {
    json!({
        "marketId": market_id,
        "selectionId": numeric_id(&runner.selection_id),
        "runnerName": runner.name,
        "handicap": decimal_to_json(runner.handicap),
        "sortPriority": runner.sort_priority,
        "status": "ACTIVE",
        "removalDate": null,
        "silkColor": runner.silk_colour.as_deref().unwrap_or(""),
        "score": null,
        "adjFactor": null,
        "metadata": format!("{{\r\n  \"runnerId\": \"{}\"\r\n}}", runner.selection_id),
        "jockeyName": "",
        "trainerName": "",
        "age": "",
        "weight": "",
        "lastRun": "",
        "wearing": "",
        "state": 0,
        "prices": render_prices(prices),
    })
}

fn render_prices(prices: Option<&RunnerBook>) -> Value {
    let (back, lay, traded) = match prices {
        Some(book) => (book.back, book.lay, render_levels(book.traded_volume.iter())),
        None => (PriceLadder::empty(), PriceLadder::empty(), Vec::new()),
    };

    json!({
        "available_to_back": render_levels(back.levels().iter()),
        "available_to_lay": render_levels(lay.levels().iter()),
        "traded_volume": traded,
    })
}

fn render_sport(event_type: &EventTypeRef) -> Option<(String, Value)> {
    let name = event_type.name.as_deref()?;
    let sport = json!({
        "id": numeric_id(&event_type.id),
        "name": name,
        "active": true,
        "image": format!("{}.svg", name.to_lowercase()),
        "autoOpen": false,
        "allowSubMarkets": false,
        "amountRequired": 100_000,
        "maxBet": 5_000_000,
        "autoOpenMinutes": 9999,
        "betDelay": 0,
        "unmatchBet": true,
    });
    Some((name.to_string(), sport))
}

fn render_levels<'a>(levels: impl Iterator<Item = &'a PriceLevel>) -> Vec<Value> {
    levels
        .map(|level| json!({"price": decimal_to_json(level.price()), "size": decimal_to_json(level.size())}))
        .collect()
}

// ============================================================================
// Scalars
// ============================================================================

/// Render a decimal as a JSON number: integers stay integers, `1.95` stays `1.95`
pub fn decimal_to_json(value: Decimal) -> Value {
    let normalized = value.normalize();
    if normalized.fract().is_zero() {
        if let Some(int) = normalized.to_i64() {
            return Value::from(int);
        }
    }
    // Parse the exact text so the float is the one nearest the decimal
    normalized
        .to_string()
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(normalized.to_string()))
}

/// Numeric ids render as numbers, anything else verbatim
fn numeric_id(id: &str) -> Value {
    id.parse::<i64>().map(Value::from).unwrap_or_else(|_| Value::String(id.to_string()))
}

/// `2024-05-04T14:00:00.000Z` → `2024-05-04T14:00:00.0000000Z`
fn utc_ticks(start_time: &str) -> Option<String> {
    let parsed = DateTime::parse_from_rfc3339(start_time).ok()?.with_timezone(&Utc);
    let seconds = parsed.to_rfc3339_opts(SecondsFormat::Secs, true);
    Some(format!("{}.{:07}Z", seconds.trim_end_matches('Z'), parsed.timestamp_subsec_nanos() / 100))
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_catalog_entry, build_market_book};
    use crate::shape::RawRecord;
    use chrono::TimeZone;

    fn book() -> MarketBook {
        build_market_book(
            &RawRecord::mapping(json!({
                "marketId": "1.179082386",
                "status": "OPEN",
                "betDelay": 0,
                "totalMatched": 15234.5,
                "runners": [{
                    "selectionId": 47972,
                    "handicap": 0,
                    "ex": {
                        "available_to_back": [{"price": 1.95, "size": 10}, {"price": 1.94, "size": 20}],
                        "available_to_lay": [{"price": 2.02, "size": 7.5}],
                        "traded_volume": [{"price": 1.96, "size": 120}]
                    }
                }]
            }))
            .unwrap(),
        )
    }

    fn keys(value: &Value) -> Vec<&str> {
        value.as_object().unwrap().keys().map(String::as_str).collect()
    }

    #[test]
    fn test_rendered_runner_ladder_values() {
        let rendered = render_market_book(&book());
        let runner = &rendered["runners"][0];

        assert_eq!(runner["id"], json!("47972"));
        assert_eq!(runner["price1"], json!(1.95));
        assert_eq!(runner["size1"], json!(10));
        assert_eq!(runner["price2"], json!(1.94));
        assert_eq!(runner["size2"], json!(20));
        assert_eq!(runner["price3"], json!(0));
        assert_eq!(runner["size3"], json!(0));
        assert_eq!(runner["lay1"], json!(2.02));
        assert_eq!(runner["ls1"], json!(7.5));
        assert_eq!(runner["lay2"], json!(0));
        assert_eq!(runner["status"], json!("ACTIVE"));
    }

    #[test]
    fn test_market_book_field_order() {
        let rendered = render_market_book(&book());
        assert_eq!(
            keys(&rendered),
            vec![
                "id", "winners", "betDelay", "totalMatched", "marketStatus", "maxBetSize", "bettingAllowed",
                "isMarketDataDelayed", "runners", "isRoot", "timestamp", "winnerIDs"
            ]
        );
        assert_eq!(
            keys(&rendered["runners"][0]),
            vec![
                "id", "price1", "price2", "price3", "size1", "size2", "size3", "lay1", "lay2", "lay3", "ls1", "ls2",
                "ls3", "status", "handicap"
            ]
        );
        assert_eq!(rendered["timestamp"], json!(DEFAULT_TIMESTAMP));
        assert_eq!(rendered["totalMatched"], json!(15234.5));
    }

    #[test]
    fn test_serialized_text_keeps_order() {
        let text = serde_json::to_string(&render_market_book(&book())).unwrap();
        assert!(text.starts_with(r#"{"id":"1.179082386","winners":1,"betDelay":0,"#));
        assert!(text.contains(r#""price1":1.95,"price2":1.94,"price3":0,"size1":10,"size2":20,"size3":0"#));
    }

    #[test]
    fn test_envelope() {
        let id = Uuid::new_v4();
        let envelope = render_market_data_envelope(id, vec![render_market_book(&book())]);
        assert_eq!(keys(&envelope), vec!["requestId", "marketBooks", "news", "scores"]);
        assert_eq!(envelope["requestId"], json!(id.to_string()));
        assert_eq!(envelope["scores"], json!({"currentSet": 0}));
    }

    fn catalog() -> MarketCatalogEntry {
        build_catalog_entry(
            &RawRecord::mapping(json!({
                "marketId": "1.179082386",
                "marketName": "Match Odds",
                "marketStartTime": "2024-05-04T14:00:00.000Z",
                "eventType": {"id": "1", "name": "Soccer"},
                "competition": {"id": "10932509", "name": "English Premier League"},
                "event": {"id": "33131416", "name": "Arsenal v Bournemouth"},
                "runners": [
                    {"selectionId": 47972, "runnerName": "Arsenal", "sortPriority": 1},
                    {"selectionId": 58805, "runnerName": "The Draw", "sortPriority": 2}
                ]
            }))
            .unwrap(),
        )
    }

    fn updated_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 4, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_catalog_layout() {
        let rendered = render_catalog_entry(&catalog(), Some(&book()), updated_at());
        let keys = keys(&rendered);

        assert_eq!(&keys[..4], &["marketId", "marketName", "marketStartTime", "suspendTime"]);
        let runners_at = keys.iter().position(|k| *k == "runners").unwrap();
        assert_eq!(keys[runners_at - 1], "maxOdds");
        assert_eq!(&keys[runners_at + 1..runners_at + 4], &["eventType", "sport", "marketStartTimeUtc"]);
        assert_eq!(keys.last(), Some(&"state"));

        assert_eq!(rendered["eventTypeId"], json!(1));
        assert_eq!(rendered["eventId"], json!(33131416));
        assert_eq!(rendered["competitionId"], json!("10932509"));
        assert_eq!(rendered["countryCode"], json!("GB"));
        assert_eq!(rendered["marketType"], json!("MATCH_ODDS"));
        assert_eq!(rendered["rules"], json!(LEGACY_RULES));
        assert_eq!(rendered["sport"]["image"], json!("soccer.svg"));
        assert_eq!(rendered["marketStartTimeUtc"], json!("2024-05-04T14:00:00.0000000Z"));
        assert_eq!(rendered["updatedAt"], json!("2024-05-04T12:00:00.000000Z"));
    }

    #[test]
    fn test_catalog_runner_prices() {
        let rendered = render_catalog_entry(&catalog(), Some(&book()), updated_at());
        let priced = &rendered["runners"][0];
        let unpriced = &rendered["runners"][1];

        assert_eq!(priced["selectionId"], json!(47972));
        assert_eq!(priced["metadata"], json!("{\r\n  \"runnerId\": \"47972\"\r\n}"));
        assert_eq!(priced["prices"]["available_to_back"][0], json!({"price": 1.95, "size": 10}));
        assert_eq!(priced["prices"]["available_to_lay"][2], json!({"price": 0, "size": 0}));
        assert_eq!(priced["prices"]["traded_volume"], json!([{"price": 1.96, "size": 120}]));

        assert_eq!(unpriced["prices"]["available_to_back"].as_array().unwrap().len(), 3);
        assert_eq!(unpriced["prices"]["available_to_back"][0], json!({"price": 0, "size": 0}));
        assert_eq!(unpriced["prices"]["traded_volume"], json!([]));
    }

    #[test]
    fn test_overlay_prices_matches_priced_render() {
        let priced = render_catalog_entry(&catalog(), Some(&book()), updated_at());
        let mut overlaid = render_catalog_entry(&catalog(), None, updated_at());
        assert_ne!(overlaid, priced);

        overlay_catalog_prices(&mut overlaid, Some(&book()));
        assert_eq!(overlaid, priced);
        assert_eq!(keys(&overlaid["runners"][0]).last(), Some(&"prices"));

        // Going back to no book clears the previous prices
        overlay_catalog_prices(&mut overlaid, None);
        assert_eq!(overlaid, render_catalog_entry(&catalog(), None, updated_at()));
    }

    #[test]
    fn test_catalog_without_event_type_or_event() {
        let entry = MarketCatalogEntry {
            market_id: "1.5".into(),
            market_name: None,
            start_time: None,
            market_type: None,
            total_matched: Decimal::ZERO,
            event_type: None,
            event: None,
            competition: None,
            runners: Vec::new(),
        };
        let rendered = render_catalog_entry(&entry, None, updated_at());

        assert!(rendered.get("sport").is_none());
        assert_eq!(rendered["countryCode"], Value::Null);
        assert_eq!(rendered["eventId"], Value::Null);
        assert_eq!(rendered["marketStartTimeUtc"], Value::Null);
    }

    #[test]
    fn test_decimal_rendering() {
        assert_eq!(decimal_to_json(Decimal::new(195, 2)), json!(1.95));
        assert_eq!(decimal_to_json(Decimal::new(1000, 2)), json!(10));
        assert_eq!(decimal_to_json(Decimal::ZERO), json!(0));
        assert_eq!(decimal_to_json(Decimal::new(-5, 1)), json!(-0.5));
    }
}
