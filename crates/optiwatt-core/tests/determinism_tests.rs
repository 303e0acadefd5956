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

//! Reproducibility, termination and cancellation guarantees of the GA.

use std::time::Duration;

use optiwatt_core::ga::{CancelToken, GaEngine, Termination};
use optiwatt_core::sim::SimulationInput;
use optiwatt_types::config::{FitnessWeights, OptimizerConfig};
use optiwatt_types::device::BatterySpec;
use optiwatt_types::series::{LoadForecast, PriceSeries, PvForecast, SLOTS_PER_DAY};

fn surplus_day() -> (PvForecast, LoadForecast, PriceSeries, BatterySpec) {
    let mut pv_kw = vec![0.0; SLOTS_PER_DAY];
    for v in pv_kw.iter_mut().take(64).skip(32) {
        *v = 3.0;
    }
    (
        PvForecast::from_kw(pv_kw),
        LoadForecast::uniform(0.5),
        PriceSeries::uniform(0.30),
        BatterySpec {
            capacity_kwh: 10.0,
            max_charge_kw: 2.0,
            max_discharge_kw: 2.0,
            round_trip_eff: 0.95,
            soc_min: 0.0,
            soc_max: 1.0,
            initial_soc: 0.0,
        },
    )
}

/// Two runs with seed 42 on the surplus day are identical in plan and metrics
#[test]
fn test_seeded_runs_are_byte_identical() {
    let (pv, load, price, battery) = surplus_day();
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
    let engine = GaEngine::new(OptimizerConfig {
        population_size: 30,
        generations_max: 50,
        workers: Some(2),
        ..Default::default()
    });

    let a = engine.run(&input, Duration::from_secs(120), &CancelToken::new(), 42);
    let b = engine.run(&input, Duration::from_secs(120), &CancelToken::new(), 42);

    assert_eq!(a.best.battery_kw, b.best.battery_kw);
    assert_eq!(a.best.device_rows, b.best.device_rows);
    assert_eq!(a.best.fitness, b.best.fitness);
    assert_eq!(a.metrics, b.metrics);
}

/// Stall patience of 5 ends the run early with a flat tail
#[test]
fn test_stall_termination() {
    let pv = PvForecast::zeros();
    let load = LoadForecast::uniform(0.0);
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
    let engine = GaEngine::new(OptimizerConfig {
        population_size: 20,
        generations_max: 200,
        stall_gens: 5,
        workers: Some(2),
        ..Default::default()
    });

    let outcome = engine.run(&input, Duration::from_secs(120), &CancelToken::new(), 9);

    assert_eq!(outcome.metrics.termination, Termination::Stalled);
    assert!(outcome.metrics.generations_run < 200);

    let history = &outcome.metrics.best_history;
    let tail = &history[history.len() - 5..];
    assert!(tail.iter().all(|f| *f == tail[0]), "best changed in the stall tail");
}

/// A cancel fired mid-run stops at the next generation boundary; the
/// outcome is marked cancelled so the loop never publishes it
#[test]
fn test_cancellation_stops_run_without_result_use() {
    let (pv, load, price, battery) = surplus_day();

    let cancel = CancelToken::new();
    let cancel_remote = cancel.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        cancel_remote.cancel();
    });

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
    // Large population and no stall exit so the run would take far longer
    // than the cancel delay on its own
    let engine = GaEngine::new(OptimizerConfig {
        population_size: 300,
        generations_max: 100_000,
        stall_gens: 100_000,
        workers: Some(2),
        ..Default::default()
    });

    let outcome = engine.run(&input, Duration::from_secs(60), &cancel, 7);
    handle.join().unwrap();

    assert_eq!(outcome.metrics.termination, Termination::Cancelled);
    assert!(outcome.metrics.generations_run < 100_000);
}

/// A fresh run right after a cancelled one is unaffected by the old token
#[test]
fn test_new_run_after_cancellation_completes() {
    let (pv, load, price, battery) = surplus_day();
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
    let engine = GaEngine::new(OptimizerConfig {
        population_size: 20,
        generations_max: 30,
        workers: Some(2),
        ..Default::default()
    });

    let stale = CancelToken::new();
    stale.cancel();
    let cancelled = engine.run(&input, Duration::from_secs(60), &stale, 1);
    assert_eq!(cancelled.metrics.termination, Termination::Cancelled);

    let fresh = engine.run(&input, Duration::from_secs(60), &CancelToken::new(), 1);
    assert_ne!(fresh.metrics.termination, Termination::Cancelled);
    assert!(fresh.metrics.generations_run > 1);
}
