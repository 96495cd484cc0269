//! Shape adapter: uniform field access over upstream records
//!
//! Upstream records arrive either as typed SDK objects (attribute-addressed,
//! snake_case attribute names) or as wire JSON mappings (key-addressed,
//! camelCase keys). Field names also drift between spellings, so every logical
//! field is registered once in [`fields`] with its accepted spellings in
//! resolution order.
//!
//! # Resolution rules
//! 1. Try the logical name, then each alternate spelling, in order
//! 2. The first *present* value wins, even when falsy (`0`, `false`, `""`)
//! 3. Missing keys and JSON `null` are absent and fall through to the default
//! 4. Resolution never fails; typed accessors report wrong types as `FieldError`
//!
//! Nothing outside this module and `builder` inspects raw shapes.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FieldError;

/// How the upstream addressed the record's fields
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    /// Attribute-bearing object (typed SDK response)
    Object,
    /// String-keyed mapping (wire JSON)
    Mapping,
}

/// One raw upstream record, tagged with its shape
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "fields", rename_all = "snake_case")]
pub enum RawRecord {
    Object(Map<String, Value>),
    Mapping(Map<String, Value>),
}

impl RawRecord {
    /// Wrap a wire JSON object. Non-object values are rejected.
    pub fn mapping(value: Value) -> Result<Self, FieldError> {
        match value {
            Value::Object(map) => Ok(RawRecord::Mapping(map)),
            other => Err(FieldError::new("<record>", &other)),
        }
    }

    /// Expose a typed SDK-style object through its attribute names
    pub fn from_object<T: Serialize>(object: &T) -> Result<Self, FieldError> {
        match serde_json::to_value(object) {
            Ok(Value::Object(map)) => Ok(RawRecord::Object(map)),
            Ok(other) => Err(FieldError::new("<record>", &other)),
            Err(e) => Err(FieldError { field: "<record>", found: e.to_string() }),
        }
    }

    /// Shape this record arrived in
    pub fn shape(&self) -> Shape {
        match self {
            RawRecord::Object(_) => Shape::Object,
            RawRecord::Mapping(_) => Shape::Mapping,
        }
    }

    /// Borrowed view used for all field access
    pub fn view(&self) -> RecordRef<'_> {
        match self {
            RawRecord::Object(map) => RecordRef { shape: Shape::Object, map },
            RawRecord::Mapping(map) => RecordRef { shape: Shape::Mapping, map },
        }
    }

    /// Shortcut for `view().get(field)`
    pub fn get(&self, field: &Field) -> Option<&Value> {
        self.view().get(field)
    }
}

/// A logical field and its accepted spellings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field {
    /// Logical (preferred) name
    pub name: &'static str,
    /// Alternate spellings, tried in order after `name`
    pub aliases: &'static [&'static str],
}

impl Field {
    /// Field with its canonical name and accepted synonyms
    pub const fn new(name: &'static str, aliases: &'static [&'static str]) -> Self {
        Self { name, aliases }
    }

    /// All spellings in resolution order
    pub fn spellings(&self) -> impl Iterator<Item = &'static str> {
        std::iter::once(self.name).chain(self.aliases.iter().copied())
    }
}

/// Registered upstream fields
pub mod fields {
    use super::Field;

    // Shared
    pub const ID: Field = Field::new("id", &[]);
    pub const NAME: Field = Field::new("name", &[]);
    pub const STATUS: Field = Field::new("status", &[]);
    pub const TOTAL_MATCHED: Field = Field::new("totalMatched", &["total_matched"]);
    pub const RUNNERS: Field = Field::new("runners", &[]);

    // Market book
    pub const MARKET_ID: Field = Field::new("marketId", &["market_id"]);
    pub const BET_DELAY: Field = Field::new("betDelay", &["bet_delay"]);
    pub const IS_MARKET_DATA_DELAYED: Field =
        Field::new("isMarketDataDelayed", &["is_market_data_delayed"]);
    pub const NUMBER_OF_WINNERS: Field = Field::new("numberOfWinners", &["number_of_winners"]);
    pub const PUBLISH_TIME: Field = Field::new("publishTime", &["publish_time"]);

    // Runner book
    pub const SELECTION_ID: Field = Field::new("selectionId", &["selection_id"]);
    pub const HANDICAP: Field = Field::new("handicap", &[]);
    pub const LAST_PRICE_TRADED: Field = Field::new("lastPriceTraded", &["last_price_traded"]);
    pub const EX: Field = Field::new("ex", &["exchange_prices"]);
    pub const AVAILABLE_TO_BACK: Field = Field::new("availableToBack", &["available_to_back"]);
    pub const AVAILABLE_TO_LAY: Field = Field::new("availableToLay", &["available_to_lay"]);
    pub const TRADED_VOLUME: Field = Field::new("tradedVolume", &["traded_volume"]);
    pub const PRICE: Field = Field::new("price", &[]);
    pub const SIZE: Field = Field::new("size", &[]);

    // Catalogue
    pub const MARKET_NAME: Field = Field::new("marketName", &["market_name"]);
    pub const MARKET_START_TIME: Field = Field::new("marketStartTime", &["market_start_time"]);
    pub const MARKET_TYPE: Field = Field::new("marketType", &["market_type"]);
    pub const DESCRIPTION: Field = Field::new("description", &[]);
    pub const EVENT_TYPE: Field = Field::new("eventType", &["event_type"]);
    pub const EVENT: Field = Field::new("event", &[]);
    pub const COMPETITION: Field = Field::new("competition", &[]);
    pub const RUNNER_NAME: Field = Field::new("runnerName", &["runner_name"]);
    pub const SORT_PRIORITY: Field = Field::new("sortPriority", &["sort_priority"]);
    pub const SILK_COLOUR: Field =
        Field::new("silkColour", &["silkColor", "silk_colour", "silk_color"]);

    // Navigation
    pub const COUNTRY_CODE: Field = Field::new("countryCode", &["country_code"]);
    pub const TIMEZONE: Field = Field::new("timezone", &["time_zone", "timeZone"]);
    pub const OPEN_DATE: Field = Field::new("openDate", &["open_date"]);
    pub const COMPETITION_REGION: Field =
        Field::new("competitionRegion", &["competition_region"]);
    pub const MARKET_COUNT: Field = Field::new("marketCount", &["market_count"]);
}

/// Borrowed record view carrying the parent's shape into children
#[derive(Clone, Copy, Debug)]
pub struct RecordRef<'a> {
    shape: Shape,
    map: &'a Map<String, Value>,
}

impl<'a> RecordRef<'a> {
    /// View an arbitrary value as a record of `shape`
    pub fn from_value(shape: Shape, value: &'a Value) -> Result<Self, FieldError> {
        match value {
            Value::Object(map) => Ok(Self { shape, map }),
            other => Err(FieldError::new("<record>", other)),
        }
    }

    /// Shape inherited from the top-level record
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// First present spelling of `field`, or `None`
    pub fn get(&self, field: &Field) -> Option<&'a Value> {
        field.spellings().find_map(|key| self.map.get(key).filter(|v| !v.is_null()))
    }

    /// Value of `field` or the supplied default
    pub fn get_or(&self, field: &Field, default: &'a Value) -> &'a Value {
        self.get(field).unwrap_or(default)
    }

    /// `field` present under any spelling and not null
    pub fn contains(&self, field: &Field) -> bool {
        self.get(field).is_some()
    }

    /// Nested record, same shape as this one
    pub fn child(&self, field: &Field) -> Result<Option<RecordRef<'a>>, FieldError> {
        match self.get(field) {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(RecordRef { shape: self.shape, map })),
            Some(other) => Err(FieldError::new(field.name, other)),
        }
    }

    /// Sequence field; absent is empty
    pub fn list(&self, field: &Field) -> Result<&'a [Value], FieldError> {
        match self.get(field) {
            None => Ok(&[]),
            Some(Value::Array(items)) => Ok(items.as_slice()),
            Some(other) => Err(FieldError::new(field.name, other)),
        }
    }

    /// View one element of a sequence as a record of this shape
    pub fn element(&self, value: &'a Value) -> Result<RecordRef<'a>, FieldError> {
        Self::from_value(self.shape, value)
    }

    /// String field; absent is `None`
    pub fn str(&self, field: &Field) -> Result<Option<&'a str>, FieldError> {
        match self.get(field) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(FieldError::new(field.name, other)),
        }
    }

    /// String field or `default` when absent
    pub fn string_or(&self, field: &Field, default: &str) -> Result<String, FieldError> {
        Ok(self.str(field)?.unwrap_or(default).to_string())
    }

    /// Identifier that upstream may send as a string or an integer
    pub fn id(&self, field: &Field) -> Result<Option<String>, FieldError> {
        match self.get(field) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(Some(n.to_string())),
            Some(other) => Err(FieldError::new(field.name, other)),
        }
    }

    /// Exact decimal from a number or numeric string
    pub fn decimal(&self, field: &Field) -> Result<Option<Decimal>, FieldError> {
        match self.get(field) {
            None => Ok(None),
            Some(value) => decimal_from_json(value)
                .map(Some)
                .ok_or_else(|| FieldError::new(field.name, value)),
        }
    }

    /// Decimal field or `default` when absent
    pub fn decimal_or(&self, field: &Field, default: Decimal) -> Result<Decimal, FieldError> {
        Ok(self.decimal(field)?.unwrap_or(default))
    }

    /// Boolean field or `default` when absent
    pub fn bool_or(&self, field: &Field, default: bool) -> Result<bool, FieldError> {
        match self.get(field) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(FieldError::new(field.name, other)),
        }
    }

    /// Non-negative integer that fits `u32`, or `default` when absent
    pub fn u32_or(&self, field: &Field, default: u32) -> Result<u32, FieldError> {
        match self.get(field) {
            None => Ok(default),
            Some(value) => value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| FieldError::new(field.name, value)),
        }
    }

    /// Signed integer field or `default` when absent
    pub fn i64_or(&self, field: &Field, default: i64) -> Result<i64, FieldError> {
        match self.get(field) {
            None => Ok(default),
            Some(value) => value.as_i64().ok_or_else(|| FieldError::new(field.name, value)),
        }
    }

    /// Unsigned integer field; absent is `None`
    pub fn u64(&self, field: &Field) -> Result<Option<u64>, FieldError> {
        match self.get(field) {
            None => Ok(None),
            Some(value) => value.as_u64().map(Some).ok_or_else(|| FieldError::new(field.name, value)),
        }
    }
}

/// Exact decimal from a JSON number or numeric string.
///
/// Numbers go through their shortest round-trip text, so `1.95` stays `1.95`.
pub fn decimal_from_json(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else if let Some(u) = n.as_u64() {
                Some(Decimal::from(u))
            } else {
                parse_decimal(&n.to_string())
            }
        }
        Value::String(s) => parse_decimal(s.trim()),
        _ => None,
    }
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text).or_else(|_| Decimal::from_scientific(text)).ok()
}
