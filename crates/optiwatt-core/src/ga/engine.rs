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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use optiwatt_types::config::OptimizerConfig;
use optiwatt_types::device::DeviceControl;
use optiwatt_types::series::SLOTS_PER_DAY;

use crate::ga::population::Population;
use crate::ga::rule_based_candidate;
use crate::sim::{simulate, SimulationInput, SimulationResult};

/// Fractional-gene mutation noise, sigma proportional to the [0,1] range
const FRACTIONAL_SIGMA: f64 = 0.2;

/// Battery-gene mutation noise span as a fraction of the larger rate limit
const BATTERY_NOISE_SPAN: f64 = 0.2;

/// Cooperative cancellation flag, checked at generation boundaries
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    MaxGenerations,
    Stalled,
    BudgetExhausted,
    Cancelled,
}

/// Per-run statistics; the best-fitness record is monotone non-decreasing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub generations_run: usize,
    pub best_fitness: f64,
    pub best_history: Vec<f64>,
    pub mean_history: Vec<f64>,
    pub std_history: Vec<f64>,
    pub termination: Termination,
}

/// The winning candidate of a run, extracted from the population
#[derive(Debug, Clone, PartialEq)]
pub struct BestCandidate {
    /// Device activity, one row of 96 genes per device
    pub device_rows: Vec<Vec<f64>>,
    /// Battery dispatch genes (kW, +charge / -discharge)
    pub battery_kw: Vec<f64>,
    pub fitness: f64,
    pub result: SimulationResult,
}

/// Best candidate plus run statistics, everything a caller receives
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub best: BestCandidate,
    pub metrics: RunMetrics,
}

/// Genetic optimizer over the device-schedule × battery-dispatch space
///
/// All stochastic operations run on the single master RNG; only the pure
/// fitness evaluation fans out over the bounded rayon pool. With a fixed
/// seed the outcome is therefore identical regardless of worker count.
pub struct GaEngine {
    config: OptimizerConfig,
    pool: rayon::ThreadPool,
}

impl GaEngine {
    pub fn new(config: OptimizerConfig) -> Self {
        let workers = config
            .workers
            .unwrap_or_else(|| num_workers_default())
            .max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .expect("failed to build evaluation pool");
        info!(
            "GA engine ready: population {}, max {} generations, {} evaluation workers",
            config.population_size, config.generations_max, workers
        );
        Self { config, pool }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Run one optimization
    ///
    /// Stops at the generation cap, on stall, when the wall-clock budget is
    /// exhausted (normal termination, best-so-far is returned) or when the
    /// cancel token fires (the caller discards the outcome).
    pub fn run(
        &self,
        input: &SimulationInput<'_>,
        budget: Duration,
        cancel: &CancelToken,
        seed: u64,
    ) -> OptimizationOutcome {
        let cfg = &self.config;
        let n = cfg.population_size;
        let d = input.devices.len();
        let deadline = Instant::now() + budget;

        let masks: Vec<Vec<bool>> = input.devices.iter().map(|dev| dev.slot_mask()).collect();
        let mut rng = StdRng::seed_from_u64(seed);

        let mut population = Population::random(n, input.devices, &masks, input.battery, &mut rng);
        // Seed slot 0 with the rule-based heuristic so the search starts
        // from at least one sane schedule
        rule_based_candidate(input, &masks, &mut population);
        let mut next = Population::zeroed(n, d);

        let mut best_fitness = f64::NEG_INFINITY;
        let mut best_snapshot: Option<(Vec<f64>, Vec<f64>)> = None;
        let mut stall = 0usize;

        let mut best_history = Vec::new();
        let mut mean_history = Vec::new();
        let mut std_history = Vec::new();

        let mut generations_run = 0usize;
        let mut termination = Termination::MaxGenerations;

        for generation in 0..cfg.generations_max {
            self.evaluate(&mut population, input);
            generations_run = generation + 1;

            let order = ranked_indices(&population.fitness);
            let gen_best = order[0];
            let gen_best_fitness = population.fitness[gen_best];

            if gen_best_fitness > best_fitness + cfg.epsilon_improve {
                stall = 0;
            } else {
                stall += 1;
            }
            if gen_best_fitness > best_fitness {
                best_fitness = gen_best_fitness;
                best_snapshot = Some((
                    population.candidate_devices(gen_best).to_vec(),
                    population.battery_row(gen_best).to_vec(),
                ));
            }

            let (mean, std) = mean_std(&population.fitness);
            best_history.push(best_fitness);
            mean_history.push(mean);
            std_history.push(std);

            if generation % 50 == 0 {
                debug!(
                    "Generation {}: best={:.4}, mean={:.4}",
                    generation, best_fitness, mean
                );
            }

            if cancel.is_cancelled() {
                termination = Termination::Cancelled;
                break;
            }
            if Instant::now() >= deadline {
                termination = Termination::BudgetExhausted;
                break;
            }
            if stall >= cfg.stall_gens {
                termination = Termination::Stalled;
                break;
            }
            if generation + 1 == cfg.generations_max {
                break;
            }

            self.breed(&population, &mut next, &order, input, &masks, &mut rng);
            std::mem::swap(&mut population, &mut next);
        }

        let (device_genes, battery_genes) = best_snapshot.unwrap_or_else(|| {
            (
                vec![0.0; d * SLOTS_PER_DAY],
                vec![0.0; SLOTS_PER_DAY],
            )
        });
        let result = simulate(&device_genes, &battery_genes, input);
        let device_rows = device_genes
            .chunks(SLOTS_PER_DAY)
            .map(|row| row.to_vec())
            .collect();

        info!(
            "Optimization finished after {} generations ({:?}): best fitness {:.4}",
            generations_run, termination, best_fitness
        );

        OptimizationOutcome {
            best: BestCandidate {
                device_rows,
                battery_kw: battery_genes,
                fitness: best_fitness,
                result,
            },
            metrics: RunMetrics {
                generations_run,
                best_fitness,
                best_history,
                mean_history,
                std_history,
                termination,
            },
        }
    }

    /// Evaluate every candidate on the bounded pool; result order is stable
    fn evaluate(&self, population: &mut Population, input: &SimulationInput<'_>) {
        let n = population.len();
        let genes: &Population = population;
        let fitness: Vec<f64> = self.pool.install(|| {
            (0..n)
                .into_par_iter()
                .map(|i| simulate(genes.candidate_devices(i), genes.battery_row(i), input).fitness)
                .collect()
        });
        population.fitness = fitness;
    }

    /// Produce the next generation: elites first, then tournament offspring
    fn breed(
        &self,
        population: &Population,
        next: &mut Population,
        order: &[usize],
        input: &SimulationInput<'_>,
        masks: &[Vec<bool>],
        rng: &mut StdRng,
    ) {
        let cfg = &self.config;
        let n = population.len();
        let elite_count = ((cfg.elite_frac * n as f64).ceil() as usize).min(n);

        for (slot, &source) in order.iter().take(elite_count).enumerate() {
            next.copy_from(population, source, slot);
        }

        let mut slot = elite_count;
        while slot < n {
            let parent_a = self.tournament(population, rng);
            let parent_b = self.tournament(population, rng);

            if rng.gen_bool(cfg.p_cx) {
                let point = rng.gen_range(1..SLOTS_PER_DAY);
                next.write_crossover(population, parent_a, parent_b, point, slot);
                if slot + 1 < n {
                    next.write_crossover(population, parent_b, parent_a, point, slot + 1);
                }
            } else {
                next.copy_from(population, parent_a, slot);
                if slot + 1 < n {
                    next.copy_from(population, parent_b, slot + 1);
                }
            }

            self.mutate(next, slot, input, masks, rng);
            if slot + 1 < n {
                self.mutate(next, slot + 1, input, masks, rng);
            }
            slot += 2;
        }
    }

    /// Tournament of k candidates sampled without replacement; ties go to
    /// the lower index
    fn tournament(&self, population: &Population, rng: &mut StdRng) -> usize {
        let n = population.len();
        let k = self.config.tournament_k.clamp(1, n);
        let picks = rand::seq::index::sample(rng, n, k);

        let mut best = n;
        let mut best_fitness = f64::NEG_INFINITY;
        for i in picks {
            let f = population.fitness[i];
            if f > best_fitness || (f == best_fitness && i < best) {
                best = i;
                best_fitness = f;
            }
        }
        best
    }

    /// Per-gene mutation, clamped to each gene's domain
    fn mutate(
        &self,
        population: &mut Population,
        candidate: usize,
        input: &SimulationInput<'_>,
        masks: &[Vec<bool>],
        rng: &mut StdRng,
    ) {
        let cfg = &self.config;
        let gaussian = Normal::new(0.0, FRACTIONAL_SIGMA).expect("valid sigma");

        for (dev, spec) in input.devices.iter().enumerate() {
            let row = population.device_row_mut(candidate, dev);
            for (t, gene) in row.iter_mut().enumerate() {
                if !masks[dev][t] || !rng.gen_bool(cfg.p_mut) {
                    continue;
                }
                match spec.control {
                    DeviceControl::Binary => *gene = 1.0 - *gene,
                    DeviceControl::Fractional => {
                        *gene = (*gene + gaussian.sample(rng)).clamp(0.0, 1.0)
                    }
                }
            }
        }

        let battery = input.battery;
        let max_rate = battery.max_charge_kw.max(battery.max_discharge_kw);
        if max_rate > 0.0 {
            let span = BATTERY_NOISE_SPAN * max_rate;
            let row = population.battery_row_mut(candidate);
            for gene in row.iter_mut() {
                if rng.gen_bool(cfg.p_mut) {
                    *gene = (*gene + rng.gen_range(-span..=span))
                        .clamp(-battery.max_discharge_kw, battery.max_charge_kw);
                }
            }
        }
    }
}

fn num_workers_default() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
        .min(4)
}

/// Indices sorted by fitness, best first; NaN ranks below every finite
/// value and ties keep the lower index first (stable sort)
fn ranked_indices(fitness: &[f64]) -> Vec<usize> {
    let key = |f: f64| if f.is_nan() { f64::NEG_INFINITY } else { f };
    let mut order: Vec<usize> = (0..fitness.len()).collect();
    order.sort_by(|&a, &b| {
        key(fitness[b])
            .partial_cmp(&key(fitness[a]))
            .expect("keys are never NaN")
    });
    order
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return (f64::NEG_INFINITY, 0.0);
    }
    let mean = finite.iter().sum::<f64>() / finite.len() as f64;
    let var = finite.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / finite.len() as f64;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use optiwatt_types::config::FitnessWeights;
    use optiwatt_types::device::{BatterySpec, DeviceSpec, DeviceWindow};
    use optiwatt_types::series::{LoadForecast, PriceSeries, PvForecast};

    fn small_config() -> OptimizerConfig {
        OptimizerConfig {
            population_size: 24,
            generations_max: 40,
            stall_gens: 10,
            workers: Some(2),
            ..Default::default()
        }
    }

    fn battery_only_input<'a>(
        pv: &'a PvForecast,
        load: &'a LoadForecast,
        price: &'a PriceSeries,
        battery: &'a BatterySpec,
    ) -> SimulationInput<'a> {
        SimulationInput {
            pv,
            load,
            price,
            battery,
            devices: &[],
            weights: FitnessWeights::default(),
            export_price_eur_per_kwh: 0.0,
            initial_soc: battery.initial_soc,
        }
    }

    #[test]
    fn test_best_fitness_record_is_monotone() {
        let pv = PvForecast::zeros();
        let load = LoadForecast::uniform(1.0);
        let price = PriceSeries::uniform(0.2);
        let battery = BatterySpec::default();
        let input = battery_only_input(&pv, &load, &price, &battery);

        let engine = GaEngine::new(small_config());
        let outcome = engine.run(&input, Duration::from_secs(60), &CancelToken::new(), 7);

        let history = &outcome.metrics.best_history;
        assert!(!history.is_empty());
        for pair in history.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn test_fixed_seed_is_reproducible() {
        let pv = PvForecast::zeros();
        let load = LoadForecast::uniform(1.0);
        let price = PriceSeries::uniform(0.2);
        let battery = BatterySpec::default();
        let input = battery_only_input(&pv, &load, &price, &battery);

        let engine = GaEngine::new(small_config());
        let a = engine.run(&input, Duration::from_secs(60), &CancelToken::new(), 42);
        let b = engine.run(&input, Duration::from_secs(60), &CancelToken::new(), 42);

        assert_eq!(a.best.battery_kw, b.best.battery_kw);
        assert_eq!(a.best.device_rows, b.best.device_rows);
        assert_eq!(a.metrics, b.metrics);
    }

    #[test]
    fn test_worker_count_does_not_change_outcome() {
        let pv = PvForecast::zeros();
        let load = LoadForecast::uniform(1.0);
        let price = PriceSeries::uniform(0.2);
        let battery = BatterySpec::default();
        let input = battery_only_input(&pv, &load, &price, &battery);

        let mut one = small_config();
        one.workers = Some(1);
        let mut four = small_config();
        four.workers = Some(4);

        let a = GaEngine::new(one).run(&input, Duration::from_secs(60), &CancelToken::new(), 42);
        let b = GaEngine::new(four).run(&input, Duration::from_secs(60), &CancelToken::new(), 42);

        assert_eq!(a.best.battery_kw, b.best.battery_kw);
        assert_eq!(a.metrics.best_history, b.metrics.best_history);
    }

    #[test]
    fn test_stall_terminates_early() {
        // Constant zero inputs: every candidate with zero import scores
        // identically, so the search stalls quickly
        let pv = PvForecast::zeros();
        let load = LoadForecast::uniform(0.0);
        let price = PriceSeries::uniform(0.2);
        let battery = BatterySpec::none();
        let input = battery_only_input(&pv, &load, &price, &battery);

        let mut config = small_config();
        config.stall_gens = 5;
        config.generations_max = 200;
        let engine = GaEngine::new(config);
        let outcome = engine.run(&input, Duration::from_secs(60), &CancelToken::new(), 1);

        assert_eq!(outcome.metrics.termination, Termination::Stalled);
        assert!(outcome.metrics.generations_run < 200);
        let history = &outcome.metrics.best_history;
        let last = history[history.len() - 1];
        for value in history.iter().rev().take(5) {
            assert_eq!(*value, last);
        }
    }

    #[test]
    fn test_pre_cancelled_run_returns_after_one_generation() {
        let pv = PvForecast::zeros();
        let load = LoadForecast::uniform(1.0);
        let price = PriceSeries::uniform(0.2);
        let battery = BatterySpec::default();
        let input = battery_only_input(&pv, &load, &price, &battery);

        let cancel = CancelToken::new();
        cancel.cancel();
        let engine = GaEngine::new(small_config());
        let outcome = engine.run(&input, Duration::from_secs(60), &cancel, 3);

        assert_eq!(outcome.metrics.termination, Termination::Cancelled);
        assert_eq!(outcome.metrics.generations_run, 1);
    }

    #[test]
    fn test_zero_budget_terminates_with_best_so_far() {
        let pv = PvForecast::zeros();
        let load = LoadForecast::uniform(1.0);
        let price = PriceSeries::uniform(0.2);
        let battery = BatterySpec::default();
        let input = battery_only_input(&pv, &load, &price, &battery);

        let engine = GaEngine::new(small_config());
        let outcome = engine.run(&input, Duration::ZERO, &CancelToken::new(), 3);

        assert_eq!(outcome.metrics.termination, Termination::BudgetExhausted);
        assert!(outcome.best.fitness.is_finite());
    }

    #[test]
    fn test_windowed_device_prefers_cheap_slots() {
        // Peak price 18:00-21:00; a 2 kWh requirement inside 16:00-23:00
        // should be scheduled outside the peak
        let pv = PvForecast::zeros();
        let load = LoadForecast::uniform(0.0);
        let mut prices = vec![0.10; 96];
        for slot in (18 * 4)..(21 * 4) {
            prices[slot] = 0.40;
        }
        let price = PriceSeries::from_prices(prices);
        let battery = BatterySpec::none();
        let devices = vec![DeviceSpec {
            id: "boiler".to_string(),
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

        let mut config = small_config();
        config.population_size = 60;
        config.generations_max = 120;
        config.stall_gens = 30;
        let engine = GaEngine::new(config);
        let outcome = engine.run(&input, Duration::from_secs(120), &CancelToken::new(), 42);

        let row = &outcome.best.device_rows[0];
        let delivered: f64 = row.iter().sum::<f64>() * 0.25;
        assert!(delivered >= 2.0 - 1e-9, "delivered {} kWh", delivered);

        let peak_energy: f64 = row[(18 * 4)..(21 * 4)].iter().sum::<f64>() * 0.25;
        let off_peak_energy = delivered - peak_energy;
        assert!(
            off_peak_energy > peak_energy,
            "most energy should land off-peak ({} vs {})",
            off_peak_energy,
            peak_energy
        );
    }
}
