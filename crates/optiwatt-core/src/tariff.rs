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

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use optiwatt_types::config::TariffConfig;
use optiwatt_types::error::{ErrorKind, Tagged};
use optiwatt_types::series::{PriceSeries, SLOTS_PER_DAY};

use crate::input::MarketShape;
use crate::timegrid::TimeGrid;

/// Floor of the final consumer price; deeply negative wholesale hours
/// never push the indexed tariff to or below zero
const MIN_PRICE_EUR_KWH: f64 = 1e-4;

/// Indexed-tariff calculator
///
/// Total function of its inputs; a missing or malformed market source
/// degrades to a constant wholesale fallback instead of failing.
#[derive(Debug, Clone)]
pub struct TariffCalculator {
    config: TariffConfig,
}

/// Per-component breakdown of one indexed price, for observability
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingComponents {
    pub market_price_eur_mwh: f64,
    pub market_price_adjusted: f64,
    pub quality_component: f64,
    pub transmission_tariff: f64,
    pub frequency_reserve: f64,
    pub subtotal: f64,
    pub vat_amount: f64,
    pub total_with_vat: f64,
    pub final_price_eur_kwh: f64,
}

impl TariffCalculator {
    pub fn new(config: TariffConfig) -> Self {
        Self { config }
    }

    /// Compute the 96-slot indexed price series for the grid's day
    ///
    /// Market shapes provide 24 hourly wholesale prices; each slot looks up
    /// its nearest lower hour. Hours without a price, and a missing source
    /// altogether, use the configured fallback wholesale price.
    pub fn price_series(&self, grid: &TimeGrid, market: &MarketShape) -> Tagged<PriceSeries> {
        let mut tags = Vec::new();
        let hourly = self.hourly_market_prices(market, &mut tags);

        let month = grid.date().month();
        let mut prices = Vec::with_capacity(SLOTS_PER_DAY);
        for slot in 0..SLOTS_PER_DAY {
            let hour = grid.slot_hour(slot);
            prices.push(self.indexed_price(hourly[hour as usize], hour, month));
        }

        debug!(
            "Indexed tariff for {}: min={:.4}, max={:.4} €/kWh{}",
            grid.date(),
            prices.iter().cloned().fold(f64::INFINITY, f64::min),
            prices.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            if tags.is_empty() { "" } else { " (degraded)" }
        );

        Tagged {
            value: PriceSeries::from_prices(prices),
            tags,
        }
    }

    /// Expand a market shape into 24 hourly €/MWh values
    fn hourly_market_prices(&self, market: &MarketShape, tags: &mut Vec<ErrorKind>) -> [f64; 24] {
        let fallback = self.config.fallback_market_price_eur_mwh;
        match market {
            MarketShape::HourlyMap(by_hour) => {
                let mut prices = [fallback; 24];
                let mut missing = 0usize;
                for (hour, price) in by_hour.iter().enumerate().take(24) {
                    match price {
                        Some(p) => prices[hour] = *p,
                        None => missing += 1,
                    }
                }
                if missing == 24 {
                    info!("Market map contained no usable hours, using fallback price");
                    push_unique(tags, ErrorKind::NoMarketPrice);
                } else if missing > 0 {
                    push_unique(tags, ErrorKind::MalformedSample);
                }
                prices
            }
            MarketShape::Array24(values) => {
                let mut prices = [fallback; 24];
                for (hour, value) in values.iter().enumerate().take(24) {
                    if value.is_finite() {
                        prices[hour] = *value;
                    } else {
                        push_unique(tags, ErrorKind::MalformedSample);
                    }
                }
                prices
            }
            MarketShape::Missing => {
                info!(
                    "No market price source, using constant fallback {} €/MWh",
                    fallback
                );
                push_unique(tags, ErrorKind::NoMarketPrice);
                [fallback; 24]
            }
        }
    }

    /// price = ((PM·FP + Q + TAE + MFRR) · VAT · TOU · SEASON) / 1000 €/kWh
    pub fn indexed_price(&self, market_eur_mwh: f64, hour: u32, month: u32) -> f64 {
        let c = &self.config;
        let base = (market_eur_mwh * c.fp + c.q + c.tae + c.mfrr) * c.vat;
        let price =
            base * self.time_of_use_multiplier(hour) * self.seasonal_multiplier(month) / 1000.0;
        price.max(MIN_PRICE_EUR_KWH)
    }

    fn time_of_use_multiplier(&self, hour: u32) -> f64 {
        if self.config.peak_hours.contains(&hour) {
            self.config.peak_multiplier
        } else if self.config.off_peak_hours.contains(&hour) {
            self.config.off_peak_multiplier
        } else {
            self.config.shoulder_multiplier
        }
    }

    fn seasonal_multiplier(&self, month: u32) -> f64 {
        if self.config.summer_months.contains(&month) {
            self.config.summer_adjustment
        } else {
            self.config.winter_adjustment
        }
    }

    /// Component breakdown of one price, without TOU/seasonal modifiers
    pub fn pricing_components(&self, market_eur_mwh: f64) -> PricingComponents {
        let c = &self.config;
        let adjusted = market_eur_mwh * c.fp;
        let subtotal = adjusted + c.q + c.tae + c.mfrr;
        let with_vat = subtotal * c.vat;
        PricingComponents {
            market_price_eur_mwh: market_eur_mwh,
            market_price_adjusted: adjusted,
            quality_component: c.q,
            transmission_tariff: c.tae,
            frequency_reserve: c.mfrr,
            subtotal,
            vat_amount: subtotal * (c.vat - 1.0),
            total_with_vat: with_vat,
            final_price_eur_kwh: with_vat / 1000.0,
        }
    }
}

fn push_unique(tags: &mut Vec<ErrorKind>, tag: ErrorKind) {
    if !tags.contains(&tag) {
        tags.push(tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use chrono_tz::Europe::Lisbon;

    fn winter_grid() -> TimeGrid {
        let now = DateTime::parse_from_rfc3339("2025-01-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        TimeGrid::for_instant(Lisbon, now)
    }

    #[test]
    fn test_indexed_price_formula() {
        let calc = TariffCalculator::new(TariffConfig::default());
        // (50 * 1.1674 + 30 + 60 + 1.94) * 1.23 / 1000
        let expected = (50.0 * 1.1674 + 30.0 + 60.0 + 1.94) * 1.23 / 1000.0;
        let price = calc.indexed_price(50.0, 12, 1);
        assert!((price - expected).abs() < 1e-12);
    }

    #[test]
    fn test_missing_market_source_degrades_to_fallback() {
        let calc = TariffCalculator::new(TariffConfig::default());
        let result = calc.price_series(&winter_grid(), &MarketShape::Missing);

        assert_eq!(result.tags, vec![ErrorKind::NoMarketPrice]);
        let expected = calc.indexed_price(50.0, 12, 1);
        assert!((result.value.eur_per_kwh[48] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_nearest_lower_hour_expansion() {
        let calc = TariffCalculator::new(TariffConfig::default());
        let mut by_hour = vec![None; 24];
        by_hour[13] = Some(100.0);
        let result = calc.price_series(&winter_grid(), &MarketShape::HourlyMap(by_hour));

        // All four slots of hour 13 share the same hourly price
        let expected = calc.indexed_price(100.0, 13, 1);
        for slot in 52..56 {
            assert!((result.value.eur_per_kwh[slot] - expected).abs() < 1e-12);
        }
        // Hours without a price fall back and the gap is tagged
        assert!(result.tags.contains(&ErrorKind::MalformedSample));
    }

    #[test]
    fn test_time_of_use_multipliers() {
        let config = TariffConfig {
            peak_multiplier: 2.0,
            off_peak_multiplier: 0.5,
            ..Default::default()
        };
        let calc = TariffCalculator::new(config);

        let shoulder = calc.indexed_price(50.0, 12, 1);
        let peak = calc.indexed_price(50.0, 18, 1);
        let off_peak = calc.indexed_price(50.0, 3, 1);

        assert!((peak / shoulder - 2.0).abs() < 1e-9);
        assert!((off_peak / shoulder - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_seasonal_adjustment() {
        let config = TariffConfig {
            summer_adjustment: 0.9,
            winter_adjustment: 1.1,
            ..Default::default()
        };
        let calc = TariffCalculator::new(config);

        let summer = calc.indexed_price(50.0, 12, 7);
        let winter = calc.indexed_price(50.0, 12, 1);
        assert!(summer < winter);
    }

    #[test]
    fn test_prices_are_strictly_finite_and_positive() {
        let calc = TariffCalculator::new(TariffConfig::default());
        let result = calc.price_series(
            &winter_grid(),
            &MarketShape::Array24(vec![f64::NAN; 24]),
        );
        assert!(result
            .value
            .eur_per_kwh
            .iter()
            .all(|p| p.is_finite() && *p > 0.0));
        assert!(result.tags.contains(&ErrorKind::MalformedSample));
    }

    #[test]
    fn test_negative_wholesale_price_is_floored() {
        let calc = TariffCalculator::new(TariffConfig::default());
        let price = calc.indexed_price(-500.0, 12, 1);
        assert_eq!(price, MIN_PRICE_EUR_KWH);
    }

    #[test]
    fn test_pricing_components_breakdown_sums() {
        let calc = TariffCalculator::new(TariffConfig::default());
        let parts = calc.pricing_components(50.0);
        let recomposed =
            (parts.market_price_adjusted + parts.quality_component + parts.transmission_tariff
                + parts.frequency_reserve)
                * 1.23;
        assert!((parts.total_with_vat - recomposed).abs() < 1e-9);
        assert!((parts.final_price_eur_kwh - parts.total_with_vat / 1000.0).abs() < 1e-12);
    }
}
