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

use tracing::{debug, warn};

use optiwatt_types::error::{ErrorKind, Tagged};
use optiwatt_types::series::{PvForecast, SLOTS_PER_DAY};

use crate::input::PvSample;
use crate::timegrid::TimeGrid;

/// Fuse the today + tomorrow 30-minute PV series into a 96-slot kW series
///
/// Pure function. Samples are merged chronologically with exact-timestamp
/// duplicates resolved in favor of the today source, then each slot center
/// is linearly interpolated between its bracketing samples. Slot centers
/// outside the fused coverage yield 0.
pub fn fuse_pv(grid: &TimeGrid, today: &[PvSample], tomorrow: &[PvSample]) -> Tagged<PvForecast> {
    let mut tags = Vec::new();

    let samples = merge_samples(today, tomorrow, &mut tags);

    if samples.is_empty() {
        warn!("No PV forecast data available, using zeros");
        tags.push(ErrorKind::NoPvData);
        return Tagged {
            value: PvForecast::zeros(),
            tags,
        };
    }

    let first = samples[0].period_start;
    let last = samples[samples.len() - 1].period_start;

    let mut kw = vec![0.0; SLOTS_PER_DAY];
    let mut cursor = 0usize;
    for (slot, value) in kw.iter_mut().enumerate() {
        let center = grid.slot_center(slot);
        if center < first || center >= last {
            continue;
        }
        // Slot centers are monotone, so the bracketing index only advances
        while cursor + 1 < samples.len() && samples[cursor + 1].period_start <= center {
            cursor += 1;
        }
        let lower = &samples[cursor];
        let upper = &samples[cursor + 1];
        let span = (upper.period_start - lower.period_start).num_seconds() as f64;
        let offset = (center - lower.period_start).num_seconds() as f64;
        let weight = offset / span;
        *value =
            (lower.pv_estimate_kw * (1.0 - weight) + upper.pv_estimate_kw * weight).max(0.0);
    }

    debug!(
        "Fused {} PV samples spanning {} → {} into 96 slots (peak {:.3} kW)",
        samples.len(),
        first,
        last,
        kw.iter().cloned().fold(0.0, f64::max)
    );

    Tagged {
        value: PvForecast::from_kw(kw),
        tags,
    }
}

/// Validate each source sequence, then concatenate, sort and de-duplicate
///
/// Range checks and the per-source monotone-time check happen before the
/// global sort: a sample whose timestamp does not advance within its own
/// sequence is rejected and tagged, never re-sorted into place.
fn merge_samples(
    today: &[PvSample],
    tomorrow: &[PvSample],
    tags: &mut Vec<ErrorKind>,
) -> Vec<PvSample> {
    // Source rank 0 = today; on equal timestamps the today sample wins
    let mut ranked: Vec<(PvSample, u8)> = Vec::with_capacity(today.len() + tomorrow.len());
    for (samples, rank) in [(today, 0u8), (tomorrow, 1u8)] {
        let mut last_accepted = None;
        for sample in samples {
            if !sample.pv_estimate_kw.is_finite() || sample.pv_estimate_kw < 0.0 {
                if !tags.contains(&ErrorKind::MalformedSample) {
                    tags.push(ErrorKind::MalformedSample);
                }
                continue;
            }
            if let Some(last) = last_accepted {
                if sample.period_start <= last {
                    debug!(
                        "Dropping non-monotone PV sample at {} (previous {})",
                        sample.period_start, last
                    );
                    if !tags.contains(&ErrorKind::MalformedSample) {
                        tags.push(ErrorKind::MalformedSample);
                    }
                    continue;
                }
            }
            last_accepted = Some(sample.period_start);
            ranked.push((*sample, rank));
        }
    }

    ranked.sort_by_key(|(sample, rank)| (sample.period_start, *rank));
    ranked.dedup_by_key(|(sample, _)| sample.period_start);
    ranked.into_iter().map(|(sample, _)| sample).collect()
}
