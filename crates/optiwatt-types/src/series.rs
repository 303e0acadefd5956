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

use serde::{Deserialize, Serialize};

/// Number of 15-minute slots in one planning day
pub const SLOTS_PER_DAY: usize = 96;

/// Slot duration in minutes
pub const SLOT_MINUTES: i64 = 15;

/// Slot duration in hours (energy = power * SLOT_HOURS)
pub const SLOT_HOURS: f64 = 0.25;

/// PV generation forecast, one kW sample per slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PvForecast {
    pub kw: Vec<f64>,
}

impl PvForecast {
    pub fn zeros() -> Self {
        Self {
            kw: vec![0.0; SLOTS_PER_DAY],
        }
    }

    /// Build from raw values, clipping negatives and fixing the length to 96
    pub fn from_kw(mut kw: Vec<f64>) -> Self {
        kw.resize(SLOTS_PER_DAY, 0.0);
        for v in &mut kw {
            if !v.is_finite() || *v < 0.0 {
                *v = 0.0;
            }
        }
        Self { kw }
    }

    pub fn total_kwh(&self) -> f64 {
        self.kw.iter().sum::<f64>() * SLOT_HOURS
    }
}

/// Household load forecast, one kW sample per slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadForecast {
    pub kw: Vec<f64>,
}

impl LoadForecast {
    pub fn uniform(kw: f64) -> Self {
        Self {
            kw: vec![kw.max(0.0); SLOTS_PER_DAY],
        }
    }

    pub fn from_kw(mut kw: Vec<f64>) -> Self {
        kw.resize(SLOTS_PER_DAY, 0.0);
        for v in &mut kw {
            if !v.is_finite() || *v < 0.0 {
                *v = 0.0;
            }
        }
        Self { kw }
    }

    pub fn mean_kw(&self) -> f64 {
        self.kw.iter().sum::<f64>() / SLOTS_PER_DAY as f64
    }
}

/// Indexed-tariff price series, one €/kWh value per slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub eur_per_kwh: Vec<f64>,
}

impl PriceSeries {
    pub fn uniform(price: f64) -> Self {
        Self {
            eur_per_kwh: vec![price; SLOTS_PER_DAY],
        }
    }

    pub fn from_prices(mut eur_per_kwh: Vec<f64>) -> Self {
        let fallback = 0.1;
        eur_per_kwh.resize(SLOTS_PER_DAY, fallback);
        for v in &mut eur_per_kwh {
            if !v.is_finite() {
                *v = fallback;
            }
        }
        Self { eur_per_kwh }
    }

    pub fn mean(&self) -> f64 {
        self.eur_per_kwh.iter().sum::<f64>() / SLOTS_PER_DAY as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pv_forecast_clips_negative_and_resizes() {
        let pv = PvForecast::from_kw(vec![-1.0, 2.0, f64::NAN]);
        assert_eq!(pv.kw.len(), SLOTS_PER_DAY);
        assert_eq!(pv.kw[0], 0.0);
        assert_eq!(pv.kw[1], 2.0);
        assert_eq!(pv.kw[2], 0.0);
    }

    #[test]
    fn test_load_forecast_uniform() {
        let load = LoadForecast::uniform(1.0);
        assert_eq!(load.kw.len(), SLOTS_PER_DAY);
        assert!((load.mean_kw() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_price_series_replaces_non_finite() {
        let prices = PriceSeries::from_prices(vec![f64::INFINITY; SLOTS_PER_DAY]);
        assert!(prices.eur_per_kwh.iter().all(|p| p.is_finite()));
    }
}
