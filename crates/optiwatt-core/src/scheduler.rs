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

//! The control loop (C7): refresh → optimize → publish on an aligned tick.
//!
//! External reads run on a tokio worker that feeds snapshots over a
//! channel; the ECS systems below stay synchronous and only block for the
//! short publication call, the same split the rest of the codebase uses
//! for IO-bound work.

use bevy_ecs::prelude::*;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use optiwatt_types::error::ErrorKind;
use optiwatt_types::plan::DispatchPlan;
use optiwatt_types::record::{PublishedFirstSlot, TickRecord};

use crate::ga::{CancelToken, Termination};
use crate::refresh::{refresh_forecasts, InputSnapshot};
use crate::resources::*;
use crate::sim::SimulationInput;
use crate::timegrid::TimeGrid;

/// Seconds between input-worker polls of the upstream entities
const INPUT_POLL_SECS: u64 = 60;

/// Startup system: spawn the tokio worker that polls all upstream entities
pub fn spawn_input_worker(
    config: Res<CoreConfig>,
    series: Res<TimeSeriesSourceResource>,
    history: Res<HistorySourceResource>,
    clock: Res<ClockResource>,
    mut commands: Commands,
) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    commands.insert_resource(InputChannel { receiver });

    let series = series.0.clone();
    let history = history.0.clone();
    let clock = clock.0.clone();
    let entities = config.0.entities.clone();

    info!(
        "Spawning input worker (pv: {}, market: {}, load: {})",
        entities.pv_forecast_today, entities.market_price, entities.consumption_sensor
    );

    tokio::spawn(async move {
        loop {
            let now = clock.now();
            let mut snapshot = InputSnapshot {
                fetched_at: Some(now),
                ..Default::default()
            };

            for (entity_id, slot) in [
                (&entities.pv_forecast_today, &mut snapshot.pv_today),
                (&entities.pv_forecast_tomorrow, &mut snapshot.pv_tomorrow),
                (&entities.market_price, &mut snapshot.market),
                (&entities.battery_soc, &mut snapshot.battery_soc),
            ] {
                match series.read_series(entity_id).await {
                    Ok(state) => *slot = Some(state),
                    Err(e) => debug!("Entity {} unavailable: {}", entity_id, e),
                }
            }

            match history
                .read_history(
                    &entities.consumption_sensor,
                    now - ChronoDuration::hours(24),
                    now,
                    true,
                )
                .await
            {
                Ok(points) => {
                    snapshot.history = points;
                    snapshot.history_ok = true;
                }
                Err(e) => {
                    debug!("History read failed: {}", e);
                    snapshot.history_ok = false;
                }
            }

            if sender.send(snapshot).is_err() {
                // Receiver gone, the app is shutting down
                return;
            }
            tokio::time::sleep(Duration::from_secs(INPUT_POLL_SECS)).await;
        }
    });
}

/// Drain the input channel, keeping only the newest snapshot
pub fn ingest_inputs_system(
    channel: Option<Res<InputChannel>>,
    mut latest: ResMut<LatestInputs>,
) {
    let Some(channel) = channel else {
        return;
    };
    while let Ok(snapshot) = channel.receiver.try_recv() {
        latest.0 = Some(snapshot);
    }
}

/// Per-tick driver: retry, refresh, skip or launch an optimization
#[allow(clippy::too_many_arguments)]
pub fn control_tick_system(
    config: Res<CoreConfig>,
    clock: Res<ClockResource>,
    caches: Res<ForecastCachesResource>,
    engine: Res<GaEngineResource>,
    sink: Res<PlanSinkResource>,
    journal: Res<JournalResource>,
    latest: Res<LatestInputs>,
    mut state: ResMut<TickState>,
    mut active: ResMut<ActiveOptimization>,
    mut published: ResMut<PublishedPlan>,
) {
    let now = clock.0.now();
    if !state.tick_due(now) {
        return;
    }
    caches.0.evict_expired();

    // Single retry of a publication that failed last tick
    if let Some(plan) = state.pending_retry.take() {
        match block_on_publish(&sink, &plan) {
            Ok(()) => {
                info!("Publication retry succeeded");
                published.0 = Some(plan);
            }
            Err(e) => warn!("Publication retry failed, dropping plan: {}", e),
        }
    }

    let Some(snapshot) = latest.0.clone() else {
        debug!("Tick skipped: no input snapshot yet");
        state.record_failure();
        return;
    };

    let tz = config.0.control.timezone.parse().unwrap_or(chrono_tz::UTC);
    let grid = TimeGrid::for_instant(tz, now);
    let refreshed = refresh_forecasts(&caches.0, &config.0, grid, now, &snapshot);
    let degraded = refreshed.degraded_tags();

    // Degraded and unchanged since the last tick: nothing new to optimize,
    // the previously published plan stays in force
    if refreshed.any_degraded() && state.last_fingerprints == Some(refreshed.fingerprints) {
        info!("Skipped tick: degraded inputs unchanged ({:?})", degraded);
        append_journal(
            &journal,
            TickRecord {
                tick_ts: now,
                best_fitness: None,
                generations_run: 0,
                degraded_inputs: degraded,
                published_first_slot: None,
                skipped: true,
            },
        );
        return;
    }
    state.last_fingerprints = Some(refreshed.fingerprints);

    // A newer tick supersedes any run still in flight
    if let Some(stale) = active.0.take() {
        stale.cancel.cancel();
        debug!("Cancelled in-flight optimization run {}", stale.run_id);
    }

    state.run_counter += 1;
    let run_id = state.run_counter;
    let seed = state.seed_base.wrapping_add(run_id);
    let cancel = CancelToken::new();
    let (sender, receiver) = crossbeam_channel::bounded(1);

    let first_slot = grid.slot_of(now).unwrap_or(0);
    let handle = OptimizationHandle {
        run_id,
        cancel: cancel.clone(),
        receiver,
        launched_at: now,
        degraded,
        grid_start: grid.t0(),
        first_slot,
    };

    let engine = engine.0.clone();
    let system_config = config.0.clone();
    let budget = Duration::from_secs(system_config.control.tick_budget_s);
    let initial_soc = refreshed
        .initial_soc
        .unwrap_or(system_config.battery.initial_soc);
    let pv = refreshed.pv.value;
    let load = refreshed.load.value;
    let price = refreshed.price.value;

    info!(
        "Tick {}: launching optimization (slot {}, budget {}s, seed {})",
        run_id, first_slot, system_config.control.tick_budget_s, seed
    );

    tokio::task::spawn_blocking(move || {
        let input = SimulationInput {
            pv: &pv,
            load: &load,
            price: &price,
            battery: &system_config.battery,
            devices: &system_config.devices,
            weights: system_config.weights,
            export_price_eur_per_kwh: system_config.control.export_price_eur_per_kwh,
            initial_soc,
        };
        let outcome = engine.run(&input, budget, &cancel, seed);
        // Send failure just means the handle was replaced; the run was
        // cancelled and its result is discarded
        let _ = sender.send(OptimizerMessage { run_id, outcome });
    });

    active.0 = Some(handle);
}

/// Collect a finished optimization, publish atomically and journal the tick
pub fn harvest_optimization_system(
    config: Res<CoreConfig>,
    clock: Res<ClockResource>,
    sink: Res<PlanSinkResource>,
    journal: Res<JournalResource>,
    mut state: ResMut<TickState>,
    mut active: ResMut<ActiveOptimization>,
    mut published: ResMut<PublishedPlan>,
) {
    let Some(handle) = active.0.as_ref() else {
        return;
    };

    let message = match handle.receiver.try_recv() {
        Ok(message) => message,
        Err(crossbeam_channel::TryRecvError::Empty) => return,
        Err(crossbeam_channel::TryRecvError::Disconnected) => {
            error!("Optimizer task disappeared without a result");
            active.0 = None;
            state.record_failure();
            return;
        }
    };
    let handle = active.0.take().expect("handle checked above");

    if message.run_id != handle.run_id {
        debug!("Discarding stale optimization result {}", message.run_id);
        return;
    }

    let outcome = message.outcome;
    if outcome.metrics.termination == Termination::Cancelled {
        // Cancelled runs never publish and leave no journal trace
        debug!("Run {} was cancelled", handle.run_id);
        return;
    }

    let mut degraded = handle.degraded.clone();
    if outcome.metrics.termination == Termination::BudgetExhausted {
        push_unique(&mut degraded, ErrorKind::BudgetExhausted);
    }
    if outcome.best.result.infeasible {
        push_unique(&mut degraded, ErrorKind::ConstraintInfeasible);
    }

    let plan = DispatchPlan::from_schedule(
        clock.0.now(),
        handle.grid_start,
        handle.first_slot,
        &config.0.devices,
        outcome.best.device_rows,
        outcome.best.battery_kw,
        outcome.best.fitness,
    );

    let mut record = TickRecord {
        tick_ts: handle.launched_at,
        best_fitness: Some(outcome.best.fitness),
        generations_run: outcome.metrics.generations_run,
        degraded_inputs: degraded,
        published_first_slot: None,
        skipped: false,
    };

    let plan = Arc::new(plan);
    match block_on_publish(&sink, &plan) {
        Ok(()) => {
            info!(
                "Published plan for slot {} (fitness {:.4}, battery {:+.2} kW)",
                plan.first_slot, plan.best_fitness, plan.battery_kw
            );
            record.published_first_slot = Some(PublishedFirstSlot {
                devices: plan.devices.clone(),
                battery_kw: plan.battery_kw,
            });
            published.0 = Some(plan);
            state.record_success();
        }
        Err(e) => {
            warn!("Publication failed, will retry next tick: {}", e);
            state.pending_retry = Some(plan);
            state.record_failure();
        }
    }

    append_journal(&journal, record);
}

fn block_on_publish(
    sink: &PlanSinkResource,
    plan: &Arc<DispatchPlan>,
) -> anyhow::Result<()> {
    let handle = tokio::runtime::Handle::current();
    handle.block_on(async { sink.0.publish_plan(plan).await })
}

fn append_journal(journal: &JournalResource, record: TickRecord) {
    if let Some(journal) = journal.0.as_ref() {
        if let Err(e) = journal.append(&record) {
            warn!("Failed to append tick journal: {}", e);
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
    use chrono::{TimeZone, Utc};

    // The tick cadence, backoff and skip machinery are exercised through
    // TickState here; the end-to-end loop runs in the integration tests
    // with mock ports.

    #[test]
    fn test_aligned_tick_buckets() {
        let mut state = TickState::new(15, 0);
        let aligned = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        assert!(state.tick_due(aligned));

        // Anything inside the same quarter hour is the same bucket
        for minutes in 1..15 {
            assert!(!state.tick_due(aligned + ChronoDuration::minutes(minutes)));
        }
        assert!(state.tick_due(aligned + ChronoDuration::minutes(15)));
    }

    #[test]
    fn test_backoff_widens_buckets() {
        let mut state = TickState::new(15, 0);
        let t = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        assert!(state.tick_due(t));
        for _ in 0..3 {
            state.record_failure();
        }
        assert_eq!(state.interval_minutes, 30);
        // The widened interval means 12:15 no longer fires
        assert!(!state.tick_due(t + ChronoDuration::minutes(15)));
        assert!(state.tick_due(t + ChronoDuration::minutes(30)));
    }
}
