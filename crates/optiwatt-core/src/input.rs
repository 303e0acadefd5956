// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of OptiWatt.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Boundary parsers that turn raw entity snapshots into typed inputs.
//!
//! Each recognized attribute shape has exactly one parser; everything past
//! this module works with typed series only. Parsers never fail: a
//! malformed input yields an empty/`Missing` result plus degradation tags.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use optiwatt_types::error::ErrorKind;

use crate::traits::EntitySnapshot;

// ============= PV Forecast Shapes =============

/// One PV forecast sample at 30-minute (or hourly) cadence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PvSample {
    pub period_start: DateTime<Utc>,
    pub pv_estimate_kw: f64,
}

/// Recognized PV attribute shapes, resolved at the input boundary
#[derive(Debug, Clone, PartialEq)]
pub enum PvShape {
    DetailedForecast(Vec<PvSample>),
    DetailedHourly(Vec<PvSample>),
    Missing,
}

impl PvShape {
    pub fn samples(&self) -> &[PvSample] {
        match self {
            Self::DetailedForecast(samples) | Self::DetailedHourly(samples) => samples,
            Self::Missing => &[],
        }
    }
}

/// Parse a Solcast-style PV forecast entity
///
/// Prefers `DetailedForecast` (30-minute cadence) and falls back to
/// `DetailedHourly`, matching the upstream integration's attribute layout.
pub fn parse_pv_shape(snapshot: Option<&EntitySnapshot>) -> (PvShape, Vec<ErrorKind>) {
    let Some(snapshot) = snapshot else {
        return (PvShape::Missing, Vec::new());
    };

    let mut tags = Vec::new();

    if let Some(raw) = snapshot.attributes.get("DetailedForecast") {
        let samples = parse_pv_samples(raw, &snapshot.entity_id, &mut tags);
        return (PvShape::DetailedForecast(samples), tags);
    }
    if let Some(raw) = snapshot.attributes.get("DetailedHourly") {
        let samples = parse_pv_samples(raw, &snapshot.entity_id, &mut tags);
        return (PvShape::DetailedHourly(samples), tags);
    }

    if !snapshot.attributes.is_empty() {
        warn!(
            "PV entity {} has no recognized forecast attribute",
            snapshot.entity_id
        );
        tags.push(ErrorKind::UnsupportedShape);
    }
    (PvShape::Missing, tags)
}

fn parse_pv_samples(raw: &Value, entity_id: &str, tags: &mut Vec<ErrorKind>) -> Vec<PvSample> {
    let Some(items) = raw.as_array() else {
        warn!("PV forecast attribute on {} is not an array", entity_id);
        tags.push(ErrorKind::UnsupportedShape);
        return Vec::new();
    };

    let mut samples = Vec::with_capacity(items.len());
    for item in items {
        let period_start = item
            .get("period_start")
            .and_then(Value::as_str)
            .and_then(parse_timestamp);
        let estimate = item.get("pv_estimate").and_then(Value::as_f64);

        match (period_start, estimate) {
            (Some(ts), Some(kw)) if kw.is_finite() && kw >= 0.0 => {
                samples.push(PvSample {
                    period_start: ts,
                    pv_estimate_kw: kw,
                });
            }
            _ => {
                debug!("Dropping malformed PV sample on {}: {}", entity_id, item);
                if !tags.contains(&ErrorKind::MalformedSample) {
                    tags.push(ErrorKind::MalformedSample);
                }
            }
        }
    }
    samples
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ============= Market Price Shapes =============

/// Recognized market-price attribute shapes
#[derive(Debug, Clone, PartialEq)]
pub enum MarketShape {
    /// `"Today hours": {"HH:00": €/MWh}` (keys may also be full ISO timestamps)
    HourlyMap(Vec<Option<f64>>),
    /// `"prices": [f64; 24]`
    Array24(Vec<f64>),
    Missing,
}

/// Parse a market-price entity into one of the recognized shapes
pub fn parse_market_shape(snapshot: Option<&EntitySnapshot>) -> (MarketShape, Vec<ErrorKind>) {
    let Some(snapshot) = snapshot else {
        return (MarketShape::Missing, Vec::new());
    };

    let mut tags = Vec::new();

    if let Some(map) = snapshot
        .attributes
        .get("Today hours")
        .and_then(Value::as_object)
    {
        let mut by_hour: Vec<Option<f64>> = vec![None; 24];
        for (key, value) in map {
            let Some(hour) = parse_hour_key(key) else {
                debug!("Unrecognized hour key '{}' on {}", key, snapshot.entity_id);
                if !tags.contains(&ErrorKind::MalformedSample) {
                    tags.push(ErrorKind::MalformedSample);
                }
                continue;
            };
            match value.as_f64() {
                Some(price) if price.is_finite() => by_hour[hour as usize] = Some(price),
                _ => {
                    if !tags.contains(&ErrorKind::MalformedSample) {
                        tags.push(ErrorKind::MalformedSample);
                    }
                }
            }
        }
        return (MarketShape::HourlyMap(by_hour), tags);
    }

    if let Some(raw) = snapshot.attributes.get("prices") {
        match raw.as_array() {
            Some(items) if items.len() == 24 => {
                let prices: Vec<f64> = items
                    .iter()
                    .map(|v| v.as_f64().filter(|p| p.is_finite()).unwrap_or(f64::NAN))
                    .collect();
                if prices.iter().any(|p| p.is_nan()) {
                    tags.push(ErrorKind::MalformedSample);
                }
                return (MarketShape::Array24(prices), tags);
            }
            Some(items) => {
                warn!(
                    "Market entity {} has a prices array of length {}, expected 24",
                    snapshot.entity_id,
                    items.len()
                );
                tags.push(ErrorKind::UnsupportedShape);
                return (MarketShape::Missing, tags);
            }
            None => {
                tags.push(ErrorKind::UnsupportedShape);
                return (MarketShape::Missing, tags);
            }
        }
    }

    if !snapshot.attributes.is_empty() {
        tags.push(ErrorKind::UnsupportedShape);
    }
    (MarketShape::Missing, tags)
}

/// Extract the hour from `"HH:00"` or `"YYYY-MM-DDTHH:00:00+TZ"` keys
fn parse_hour_key(key: &str) -> Option<u32> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(key) {
        return Some(chrono::Timelike::hour(&dt));
    }
    let hour_part = key.split(':').next()?;
    let hour: u32 = hour_part.trim().parse().ok()?;
    (hour < 24).then_some(hour)
}

// ============= Battery State =============

/// Parse a battery SOC sensor (percent) into a fraction
///
/// Out-of-range and unparseable readings fall back to 50 %, matching the
/// inverter integrations this scheduler is paired with.
pub fn parse_battery_soc(snapshot: Option<&EntitySnapshot>) -> Option<f64> {
    let snapshot = snapshot?;
    if snapshot.state == "unknown" || snapshot.state == "unavailable" {
        return None;
    }
    match snapshot.state.parse::<f64>() {
        Ok(percent) if (0.0..=100.0).contains(&percent) => Some(percent / 100.0),
        Ok(percent) => {
            warn!(
                "Battery SOC {}% out of range on {}, using 50%",
                percent, snapshot.entity_id
            );
            Some(0.5)
        }
        Err(_) => {
            warn!(
                "Unparseable battery SOC '{}' on {}, using 50%",
                snapshot.state, snapshot.entity_id
            );
            Some(0.5)
        }
    }
}
