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

//! Deterministic 15-minute battery/grid simulator.
//!
//! Identical inputs produce identical fitness, which the optimizer's
//! reproducibility guarantee and the forecast caches both rely on. No
//! allocation and no suspension inside the slot loop.

use serde::{Deserialize, Serialize};

use optiwatt_types::config::FitnessWeights;
use optiwatt_types::device::{BatterySpec, DeviceSpec};
use optiwatt_types::series::{LoadForecast, PriceSeries, PvForecast, SLOTS_PER_DAY, SLOT_HOURS};

/// Quadratic coefficient for windowed-device energy shortfalls (per kWh²)
const REQUIRED_ENERGY_WEIGHT: f64 = 50.0;

/// Penalty per SOC clamp event, on top of the clamped energy itself
const SOC_CLAMP_WEIGHT: f64 = 0.05;

/// Penalty per missing slot of a too-short device run
const MIN_RUNTIME_WEIGHT: f64 = 0.1;

/// Penalty per unit of priority-weighted idle time
const PRIORITY_WEIGHT: f64 = 0.05;

/// Everything a candidate is evaluated against
#[derive(Debug, Clone, Copy)]
pub struct SimulationInput<'a> {
    pub pv: &'a PvForecast,
    pub load: &'a LoadForecast,
    pub price: &'a PriceSeries,
    pub battery: &'a BatterySpec,
    pub devices: &'a [DeviceSpec],
    pub weights: FitnessWeights,
    /// Feed-in price credited for export (€/kWh)
    pub export_price_eur_per_kwh: f64,
    /// SOC fraction at slot 0, normally the live sensor reading
    pub initial_soc: f64,
}

/// Aggregate metrics of one simulated candidate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub energy_cost_eur: f64,
    pub grid_import_kwh: f64,
    pub grid_export_kwh: f64,
    /// max(soc) - min(soc) over the day, as a fraction of capacity
    pub battery_cycle_depth: f64,
    pub constraint_penalty: f64,
    pub peak_import_kw: f64,
    /// True when a windowed device cannot physically meet its requirement
    pub infeasible: bool,
    /// Scalar score, higher is better
    pub fitness: f64,
}

/// Simulate one candidate schedule slot by slot
///
/// `device_activity` is row-major `D x 96`; `battery_kw` holds 96 signed
/// commands (+charge / -discharge). Battery commands are clamped to the
/// rate limits first; the SOC update applies the round-trip efficiency on
/// charge, and every SOC clamp feeds the penalty term.
pub fn simulate(
    device_activity: &[f64],
    battery_kw: &[f64],
    input: &SimulationInput<'_>,
) -> SimulationResult {
    debug_assert_eq!(device_activity.len(), input.devices.len() * SLOTS_PER_DAY);
    debug_assert_eq!(battery_kw.len(), SLOTS_PER_DAY);

    let battery = input.battery;
    let has_battery = battery.capacity_kwh > 0.0;

    let mut soc = input.initial_soc.clamp(battery.soc_min, battery.soc_max);
    let mut soc_low = soc;
    let mut soc_high = soc;

    let mut cost = 0.0;
    let mut import_kwh = 0.0;
    let mut export_kwh = 0.0;
    let mut peak_import_kw: f64 = 0.0;
    let mut penalty = 0.0;

    for t in 0..SLOTS_PER_DAY {
        let mut device_load = 0.0;
        for (d, spec) in input.devices.iter().enumerate() {
            device_load += device_activity[d * SLOTS_PER_DAY + t] * spec.power_kw;
        }

        let net_before = input.pv.kw[t] - (input.load.kw[t] + device_load);

        let b = if has_battery {
            let clamped = battery_kw[t].clamp(-battery.max_discharge_kw, battery.max_charge_kw);
            let stored = if clamped >= 0.0 {
                clamped * battery.round_trip_eff
            } else {
                clamped
            };
            let raw = soc + stored * SLOT_HOURS / battery.capacity_kwh;
            let bounded = raw.clamp(battery.soc_min, battery.soc_max);
            if (raw - bounded).abs() > 1e-12 {
                penalty += (raw - bounded).abs() * battery.capacity_kwh + SOC_CLAMP_WEIGHT;
            }
            soc = bounded;
            soc_low = soc_low.min(soc);
            soc_high = soc_high.max(soc);
            clamped
        } else {
            // Inert battery: every command clamps to zero
            0.0
        };

        let net_after = net_before - b;
        let import = (-net_after).max(0.0);
        let export = net_after.max(0.0);

        import_kwh += import * SLOT_HOURS;
        export_kwh += export * SLOT_HOURS;
        peak_import_kw = peak_import_kw.max(import);
        cost += import * input.price.eur_per_kwh[t] * SLOT_HOURS
            - export * input.export_price_eur_per_kwh * SLOT_HOURS;
    }

    let mut infeasible = false;
    for (d, spec) in input.devices.iter().enumerate() {
        let row = &device_activity[d * SLOTS_PER_DAY..(d + 1) * SLOTS_PER_DAY];

        if let Some(window) = &spec.window {
            if window.required_energy_kwh > 0.0 {
                let delivered: f64 =
                    row.iter().sum::<f64>() * spec.power_kw * SLOT_HOURS;
                let shortfall = (window.required_energy_kwh - delivered).max(0.0);
                if shortfall > 0.0 {
                    penalty += REQUIRED_ENERGY_WEIGHT * shortfall * shortfall;
                }
                if window.required_energy_kwh > window.max_energy_kwh(spec.power_kw) + 1e-9 {
                    infeasible = true;
                }
            }
            if window.min_runtime_slots > 1 {
                penalty += MIN_RUNTIME_WEIGHT * short_run_deficit(row, window.min_runtime_slots);
            }
        }

        if spec.priority > 0.0 {
            let idle: f64 = row.iter().map(|a| 1.0 - a.clamp(0.0, 1.0)).sum();
            penalty += PRIORITY_WEIGHT * spec.priority * idle * SLOT_HOURS;
        }
    }

    let cycle_depth = soc_high - soc_low;

    let weights = input.weights;
    let raw_fitness = -(weights.cost * cost
        + weights.penalty * penalty
        + weights.cycles * cycle_depth
        + weights.peak * peak_import_kw * peak_import_kw);
    let fitness = if raw_fitness.is_finite() {
        raw_fitness
    } else {
        f64::NEG_INFINITY
    };

    SimulationResult {
        energy_cost_eur: cost,
        grid_import_kwh: import_kwh,
        grid_export_kwh: export_kwh,
        battery_cycle_depth: cycle_depth,
        constraint_penalty: penalty,
        peak_import_kw,
        infeasible,
        fitness,
    }
}

/// Slots missing from contiguous on-runs shorter than the minimum
fn short_run_deficit(row: &[f64], min_slots: usize) -> f64 {
    let mut deficit = 0usize;
    let mut run = 0usize;
    for &activity in row {
        if activity > 0.5 {
            run += 1;
        } else {
            if run > 0 && run < min_slots {
                deficit += min_slots - run;
            }
            run = 0;
        }
    }
    if run > 0 && run < min_slots {
        deficit += min_slots - run;
    }
    deficit as f64
}
