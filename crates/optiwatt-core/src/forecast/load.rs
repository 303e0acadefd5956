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

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use optiwatt_types::config::LoadTemplateConfig;
use optiwatt_types::error::{ErrorKind, Tagged};
use optiwatt_types::series::{LoadForecast, SLOTS_PER_DAY};

use crate::timegrid::TimeGrid;

/// History coverage below which the gap-filling template is rescaled to
/// the observed consumption level
const SPARSE_COVERAGE_SLOTS: usize = 8;

/// Synthesize the 96-slot load forecast
///
/// Selection order: recorder history (per-slot, most recent sample wins,
/// template fills the gaps), then the diurnal template alone, then a flat
/// last-resort constant. The result is never negative.
pub fn synthesize_load(
    grid: &TimeGrid,
    history: &[(DateTime<Utc>, String)],
    config: &LoadTemplateConfig,
) -> Tagged<LoadForecast> {
    let mut tags = Vec::new();

    let mut observed: Vec<Option<f64>> = vec![None; SLOTS_PER_DAY];
    let mut covered = 0usize;
    for (ts, state) in history {
        let kw = match state.parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => v,
            _ => {
                debug!("Discarding unparseable history sample '{}' at {}", state, ts);
                if !tags.contains(&ErrorKind::MalformedSample) {
                    tags.push(ErrorKind::MalformedSample);
                }
                continue;
            }
        };
        let slot = grid.day_slot(*ts);
        if observed[slot].is_none() {
            covered += 1;
        }
        // History arrives in chronological order, so later samples win
        observed[slot] = Some(kw);
    }

    if covered == 0 {
        if !template_is_usable(config) {
            warn!("Diurnal template unusable and no history, using flat last resort");
            tags.push(ErrorKind::HistoryUnavailable);
            return Tagged {
                value: LoadForecast::uniform(config.last_resort_kw.max(0.0).max(0.01)),
                tags,
            };
        }
        debug!("No consumption history, using diurnal template");
        tags.push(ErrorKind::HistoryUnavailable);
        return Tagged {
            value: template_series(config),
            tags,
        };
    }

    let template = template_series(config);
    let scale = if covered < SPARSE_COVERAGE_SLOTS {
        // Sparse coverage: rescale gap fills to the observed level so a
        // handful of samples does not sit on an unrelated baseline
        let observed_mean = observed.iter().flatten().sum::<f64>() / covered as f64;
        let template_mean = template.mean_kw().max(1e-6);
        (observed_mean / template_mean).clamp(0.25, 4.0)
    } else {
        1.0
    };

    let kw: Vec<f64> = (0..SLOTS_PER_DAY)
        .map(|slot| observed[slot].unwrap_or(template.kw[slot] * scale))
        .collect();

    debug!(
        "Load forecast from history: {}/{} slots observed, template scale {:.2}",
        covered, SLOTS_PER_DAY, scale
    );

    Tagged {
        value: LoadForecast::from_kw(kw),
        tags,
    }
}

/// The parameterized piecewise-linear diurnal template
///
/// Regimes: night (22:00-06:00) flat, morning ramp (06:00-09:00) up to the
/// morning peak, daytime (09:00-17:00) flat, evening (17:00-22:00) a
/// triangular peak topping out at 19:30.
pub fn template_series(config: &LoadTemplateConfig) -> LoadForecast {
    let night = config.night_kw.max(0.0);
    let morning = config.morning_peak_kw.max(0.0);
    let day = config.day_kw.max(0.0);
    let evening = config.evening_peak_kw.max(0.0);

    let kw: Vec<f64> = (0..SLOTS_PER_DAY)
        .map(|slot| {
            let hours = slot as f64 * 0.25;
            if !(6.0..22.0).contains(&hours) {
                night
            } else if hours < 9.0 {
                // Ramp from the night level to the morning peak
                night + (morning - night) * (hours - 6.0) / 3.0
            } else if hours < 17.0 {
                day
            } else if hours < 19.5 {
                // Rise to the evening peak at 19:30
                day + (evening - day) * (hours - 17.0) / 2.5
            } else {
                // Fall back to the night level by 22:00
                evening + (night - evening) * (hours - 19.5) / 2.5
            }
        })
        .collect();

    LoadForecast::from_kw(kw)
}

fn template_is_usable(config: &LoadTemplateConfig) -> bool {
    [
        config.night_kw,
        config.morning_peak_kw,
        config.day_kw,
        config.evening_peak_kw,
    ]
    .iter()
    .all(|v| v.is_finite() && *v >= 0.0)
}
