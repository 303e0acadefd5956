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

//! Per-tick forecast refresh: raw entity snapshots in, memoized typed
//! series out. All three series go through the fingerprint-keyed caches,
//! so an unchanged upstream costs one hash instead of one rebuild.

use chrono::{DateTime, NaiveDate, Utc};
use std::time::Duration;

use optiwatt_types::config::SystemConfig;
use optiwatt_types::error::{ErrorKind, Tagged};
use optiwatt_types::series::{LoadForecast, PriceSeries, PvForecast};

use crate::cache::{fingerprint, SeriesCache};
use crate::forecast::{fuse_pv, synthesize_load};
use crate::input::{parse_battery_soc, parse_market_shape, parse_pv_shape};
use crate::tariff::TariffCalculator;
use crate::timegrid::TimeGrid;
use crate::traits::EntitySnapshot;

/// One fetch of every upstream entity, taken by the input worker
#[derive(Debug, Clone, Default)]
pub struct InputSnapshot {
    pub pv_today: Option<EntitySnapshot>,
    pub pv_tomorrow: Option<EntitySnapshot>,
    pub market: Option<EntitySnapshot>,
    pub battery_soc: Option<EntitySnapshot>,
    /// Chronological `(timestamp, state)` history of the consumption sensor
    pub history: Vec<(DateTime<Utc>, String)>,
    /// False when the recorder read failed outright
    pub history_ok: bool,
    pub fetched_at: Option<DateTime<Utc>>,
}

type PvKey = (u64, u64, i64);
type LoadKey = (u64, i64);
type TariffKey = (NaiveDate, u32, u64, u64);

/// The three derived-series caches (C8)
pub struct ForecastCaches {
    pv: SeriesCache<PvKey, Tagged<PvForecast>>,
    load: SeriesCache<LoadKey, Tagged<LoadForecast>>,
    tariff: SeriesCache<TariffKey, Tagged<PriceSeries>>,
}

impl Default for ForecastCaches {
    fn default() -> Self {
        Self::new()
    }
}

impl ForecastCaches {
    pub fn new() -> Self {
        Self {
            pv: SeriesCache::new(Duration::from_secs(5 * 60)),
            load: SeriesCache::new(Duration::from_secs(15 * 60)),
            // Keyed by (date, hour), so entries roll over at the top of
            // each hour; the TTL is a backstop
            tariff: SeriesCache::new(Duration::from_secs(60 * 60)),
        }
    }

    /// Full purge on reconfiguration
    pub fn purge(&self) {
        self.pv.purge();
        self.load.purge();
        self.tariff.purge();
    }

    pub fn evict_expired(&self) {
        self.pv.evict_expired();
        self.load.evict_expired();
        self.tariff.evict_expired();
    }
}

/// Everything one tick derives from the input snapshot
#[derive(Debug, Clone)]
pub struct RefreshedForecasts {
    pub grid: TimeGrid,
    pub pv: Tagged<PvForecast>,
    pub load: Tagged<LoadForecast>,
    pub price: Tagged<PriceSeries>,
    /// Live SOC fraction from the battery sensor, when available
    pub initial_soc: Option<f64>,
    /// (pv, load, market) input fingerprints for skip detection
    pub fingerprints: (u64, u64, u64),
}

impl RefreshedForecasts {
    /// Union of all degradation tags across the three series
    pub fn degraded_tags(&self) -> Vec<ErrorKind> {
        let mut tags = Vec::new();
        for tag in self
            .pv
            .tags
            .iter()
            .chain(self.load.tags.iter())
            .chain(self.price.tags.iter())
        {
            if !tags.contains(tag) {
                tags.push(*tag);
            }
        }
        tags
    }

    pub fn any_degraded(&self) -> bool {
        self.pv.is_degraded() || self.load.is_degraded() || self.price.is_degraded()
    }
}

/// Refresh all three forecast series through the caches
pub fn refresh_forecasts(
    caches: &ForecastCaches,
    config: &SystemConfig,
    grid: TimeGrid,
    now: DateTime<Utc>,
    snapshot: &InputSnapshot,
) -> RefreshedForecasts {
    let t0_ts = grid.t0().timestamp();

    let pv_today_fp = snapshot
        .pv_today
        .as_ref()
        .map(EntitySnapshot::fingerprint)
        .unwrap_or(0);
    let pv_tomorrow_fp = snapshot
        .pv_tomorrow
        .as_ref()
        .map(EntitySnapshot::fingerprint)
        .unwrap_or(0);
    let pv = caches.pv.get_or_build((pv_today_fp, pv_tomorrow_fp, t0_ts), || {
        let (today_shape, mut tags) = parse_pv_shape(snapshot.pv_today.as_ref());
        let (tomorrow_shape, tomorrow_tags) = parse_pv_shape(snapshot.pv_tomorrow.as_ref());
        for tag in tomorrow_tags {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        let mut fused = fuse_pv(&grid, today_shape.samples(), tomorrow_shape.samples());
        for tag in tags {
            fused.push(tag);
        }
        fused
    });

    let history_fp = fingerprint(
        &snapshot
            .history
            .iter()
            .map(|(ts, state)| (ts.timestamp(), state.as_str()))
            .collect::<Vec<_>>(),
    );
    let load = caches.load.get_or_build((history_fp, t0_ts), || {
        let mut result = synthesize_load(&grid, &snapshot.history, &config.load_template);
        if !snapshot.history_ok {
            result.push(ErrorKind::HistoryUnavailable);
        }
        result
    });

    let market_fp = snapshot
        .market
        .as_ref()
        .map(EntitySnapshot::fingerprint)
        .unwrap_or(0);
    let params_fp = fingerprint(&serde_json::to_string(&config.tariff).unwrap_or_default());
    let hour = chrono::Timelike::hour(&now.with_timezone(&grid.timezone()));
    let price = caches
        .tariff
        .get_or_build((grid.date(), hour, market_fp, params_fp), || {
            let (shape, tags) = parse_market_shape(snapshot.market.as_ref());
            let mut result = TariffCalculator::new(config.tariff.clone()).price_series(&grid, &shape);
            for tag in tags {
                result.push(tag);
            }
            result
        });

    let initial_soc = parse_battery_soc(snapshot.battery_soc.as_ref());

    RefreshedForecasts {
        grid,
        pv,
        load,
        price,
        initial_soc,
        fingerprints: (
            pv_today_fp ^ pv_tomorrow_fp.rotate_left(1),
            history_fp,
            market_fp,
        ),
    }
}
