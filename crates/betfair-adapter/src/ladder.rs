//! Price ladder builder
//!
//! Turns one side's raw price/size observations into a [`PriceLadder`]:
//! extract pairs, drop incomplete entries, stable-sort best-first, keep the
//! top `LADDER_DEPTH`, zero-pad the rest.

use std::cmp::Ordering;

use serde_json::Value;

use crate::error::FieldError;
use crate::shape::{fields, RecordRef, Shape};
use crate::types::{PriceLadder, PriceLevel, Side, LADDER_DEPTH};

/// Build a ladder from raw observations shaped like `shape`.
///
/// Entries missing a price or a size are dropped. A price or size that is
/// present but not numeric is an error for the whole side.
pub fn build_ladder(side: Side, shape: Shape, observations: &[Value]) -> Result<PriceLadder, FieldError> {
    Ok(ladder_from_levels(side, collect_levels(shape, observations)?))
}

/// Complete price/size pairs in upstream order
pub fn collect_levels(shape: Shape, observations: &[Value]) -> Result<Vec<PriceLevel>, FieldError> {
    let mut levels = Vec::with_capacity(observations.len());

    for raw in observations {
        let record = RecordRef::from_value(shape, raw)?;
        if let (Some(price), Some(size)) = (record.decimal(&fields::PRICE)?, record.decimal(&fields::SIZE)?) {
            levels.push(PriceLevel::new(price, size));
        }
    }

    Ok(levels)
}

/// Order canonical levels for `side` and fit them to the fixed depth
pub fn ladder_from_levels(side: Side, mut levels: Vec<PriceLevel>) -> PriceLadder {
    // sort_by is stable: equal prices keep upstream order
    levels.sort_by(|a, b| compare(side, a, b));

    let mut slots = [PriceLevel::zero(); LADDER_DEPTH];
    for (slot, level) in slots.iter_mut().zip(levels) {
        *slot = level;
    }
    PriceLadder::from_levels(slots)
}

fn compare(side: Side, a: &PriceLevel, b: &PriceLevel) -> Ordering {
    match side {
        Side::Back => b.price().cmp(&a.price()),
        Side::Lay => a.price().cmp(&b.price()),
    }
}
