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

//! End-to-end optimizer scenarios on synthetic days.

use std::time::Duration;

use optiwatt_core::ga::{rule_based_candidate, CancelToken, GaEngine, Population};
use optiwatt_core::sim::{simulate, SimulationInput};
use optiwatt_types::config::{FitnessWeights, OptimizerConfig};
use optiwatt_types::device::{BatterySpec, DeviceControl, DeviceSpec, DeviceWindow};
use optiwatt_types::series::{LoadForecast, PriceSeries, PvForecast, SLOTS_PER_DAY, SLOT_HOURS};

fn engine(population: usize, generations: usize) -> GaEngine {
    GaEngine::new(OptimizerConfig {
        population_size: population,
        generations_max: generations,
        stall_gens: 25,
        workers: Some(2),
        seed: Some(42),
        ..Default::default()
    })
}

/// Flat 1 kW load, no PV, no battery: import is exactly 24 kWh for €4.80
#[test]
fn test_no_pv_flat_load_flat_price() {
    let pv = PvForecast::zeros();
    let load = LoadForecast::uniform(1.0);
    let price = PriceSeries::uniform(0.20);
    let battery = BatterySpec::none();
    let input = SimulationInput {
        pv: &pv,
        load: &load,
        price: &price,
        battery: &battery,
        devices: &[],
        weights: FitnessWeights::default(),
        export_price_eur_per_kwh: 0.0,
        initial_soc: 0.0,
    };

    let outcome = engine(20, 30).run(&input, Duration::from_secs(30), &CancelToken::new(), 42);

    // With nothing to control, every candidate reduces to the same flows
    assert!((outcome.best.result.grid_import_kwh - 24.0).abs() < 1e-9);
    assert!((outcome.best.result.energy_cost_eur - 4.80).abs() < 1e-9);
    assert_eq!(outcome.best.result.grid_export_kwh, 0.0);
}

/// Midday PV surplus with a battery: the optimizer does at least as well as
/// the store-the-surplus heuristic, and the per-slot energy balance holds
#[test]
fn test_pv_surplus_charges_battery() {
    let mut pv_kw = vec![0.0; SLOTS_PER_DAY];
    for v in pv_kw.iter_mut().take(64).skip(32) {
        *v = 3.0;
    }
    let pv = PvForecast::from_kw(pv_kw);
    let load = LoadForecast::uniform(0.5);
    let price = PriceSeries::uniform(0.30);
    let battery = BatterySpec {
        capacity_kwh: 10.0,
        max_charge_kw: 2.0,
        max_discharge_kw: 2.0,
        round_trip_eff: 0.95,
        soc_min: 0.0,
        soc_max: 1.0,
        initial_soc: 0.0,
    };
    let input = SimulationInput {
        pv: &pv,
        load: &load,
        price: &price,
        battery: &battery,
        devices: &[],
        weights: FitnessWeights::default(),
        export_price_eur_per_kwh: 0.0,
        initial_soc: 0.0,
    };

    let outcome = engine(40, 80).run(&input, Duration::from_secs(60), &CancelToken::new(), 42);

    // The rule-based seed (charge from surplus, discharge into deficit) is
    // candidate 0 of generation 0, so the monotone best can never be worse
    let mut seeded = Population::zeroed(1, 0);
    rule_based_candidate(&input, &[], &mut seeded);
    let seed_fitness = simulate(&[], seeded.battery_row(0), &input).fitness;
    assert!(outcome.best.fitness >= seed_fitness - 1e-9);

    // The best plan actually charges during the PV window
    let daytime_charge: f64 = outcome.best.battery_kw[32..64]
        .iter()
        .filter(|b| **b > 0.0)
        .sum();
    assert!(daytime_charge > 0.0);

    // Energy balance: export - import == integral of pv - load - battery
    let result = outcome.best.result;
    let mut expected_net = 0.0;
    for t in 0..SLOTS_PER_DAY {
        let b = outcome.best.battery_kw[t].clamp(-battery.max_discharge_kw, battery.max_charge_kw);
        expected_net += (pv.kw[t] - load.kw[t] - b) * SLOT_HOURS;
    }
    assert!((result.grid_export_kwh - result.grid_import_kwh - expected_net).abs() < 1e-9);
}

/// Peak-price window 18:00-21:00: a windowed 2 kWh device lands off-peak
#[test]
fn test_peak_tariff_device_avoids_peak() {
    let pv = PvForecast::zeros();
    let load = LoadForecast::uniform(0.0);
    let mut prices = vec![0.10; SLOTS_PER_DAY];
    for slot in (18 * 4)..(21 * 4) {
        prices[slot] = 0.40;
    }
    let price = PriceSeries::from_prices(prices);
    let battery = BatterySpec::none();
    let devices = vec![DeviceSpec {
        id: "washer".to_string(),
        power_kw: 1.0,
        priority: 0.0,
        control: DeviceControl::Binary,
        window: Some(DeviceWindow {
            earliest_hour: 16,
            latest_hour: 23,
            min_runtime_slots: 1,
            required_energy_kwh: 2.0,
        }),
    }];
    let input = SimulationInput {
        pv: &pv,
        load: &load,
        price: &price,
        battery: &battery,
        devices: &devices,
        weights: FitnessWeights::default(),
        export_price_eur_per_kwh: 0.0,
        initial_soc: 0.0,
    };

    let outcome = engine(60, 120).run(&input, Duration::from_secs(90), &CancelToken::new(), 42);
    let row = &outcome.best.device_rows[0];

    // Total device energy meets the requirement
    let delivered: f64 = row.iter().sum::<f64>() * SLOT_HOURS;
    assert!(delivered >= 2.0 - 1e-9, "delivered only {} kWh", delivered);

    // Nothing runs outside the 16:00-23:00 window
    for (slot, activity) in row.iter().enumerate() {
        let hour = slot / 4;
        if !(16..23).contains(&hour) {
            assert_eq!(*activity, 0.0, "activity outside window at slot {}", slot);
        }
    }

    // The bulk of the energy lands in the cheap part of the window
    let peak: f64 = row[(18 * 4)..(21 * 4)].iter().sum::<f64>() * SLOT_HOURS;
    assert!(peak < delivered / 2.0, "{} of {} kWh in the peak", peak, delivered);
}

/// Battery capacity 0 behaves as no battery at all (commands clamp to 0)
#[test]
fn test_zero_capacity_battery_is_inert() {
    let pv = PvForecast::zeros();
    let load = LoadForecast::uniform(1.0);
    let price = PriceSeries::uniform(0.20);
    let battery = BatterySpec {
        capacity_kwh: 0.0,
        max_charge_kw: 2.0,
        max_discharge_kw: 2.0,
        round_trip_eff: 0.95,
        soc_min: 0.0,
        soc_max: 1.0,
        initial_soc: 0.0,
    };
    let input = SimulationInput {
        pv: &pv,
        load: &load,
        price: &price,
        battery: &battery,
        devices: &[],
        weights: FitnessWeights::default(),
        export_price_eur_per_kwh: 0.0,
        initial_soc: 0.0,
    };

    let outcome = engine(20, 20).run(&input, Duration::from_secs(30), &CancelToken::new(), 1);

    assert!((outcome.best.result.grid_import_kwh - 24.0).abs() < 1e-9);
    assert_eq!(outcome.best.result.battery_cycle_depth, 0.0);
}

/// An infeasible requirement still yields a best-effort plan that maximizes
/// runtime inside the window
#[test]
fn test_infeasible_requirement_maximizes_runtime() {
    let pv = PvForecast::zeros();
    let load = LoadForecast::uniform(0.0);
    let price = PriceSeries::uniform(0.20);
    let battery = BatterySpec::none();
    let devices = vec![DeviceSpec {
        id: "ev".to_string(),
        power_kw: 1.0,
        priority: 0.0,
        control: DeviceControl::Binary,
        window: Some(DeviceWindow {
            earliest_hour: 20,
            latest_hour: 22, // 2 h window => at most 2 kWh
            min_runtime_slots: 1,
            required_energy_kwh: 5.0,
        }),
    }];
    let input = SimulationInput {
        pv: &pv,
        load: &load,
        price: &price,
        battery: &battery,
        devices: &devices,
        weights: FitnessWeights::default(),
        export_price_eur_per_kwh: 0.0,
        initial_soc: 0.0,
    };

    let outcome = engine(40, 80).run(&input, Duration::from_secs(60), &CancelToken::new(), 42);

    assert!(outcome.best.result.infeasible);
    assert!(outcome.best.result.constraint_penalty > 0.0);
    // Best-effort: (almost) every window slot runs
    let row = &outcome.best.device_rows[0];
    let on_slots = row[(20 * 4)..(22 * 4)].iter().filter(|a| **a > 0.5).count();
    assert!(on_slots >= 7, "expected the window nearly full, got {}", on_slots);
}
