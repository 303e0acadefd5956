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

use bevy_ecs::prelude::*;
use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use std::sync::Arc;

use optiwatt_types::config::SystemConfig;
use optiwatt_types::error::ErrorKind;
use optiwatt_types::plan::DispatchPlan;

use crate::ga::{CancelToken, GaEngine, OptimizationOutcome};
use crate::journal::TickJournal;
use crate::refresh::{ForecastCaches, InputSnapshot};
use crate::traits::{Clock, HistorySource, PlanSink, TimeSeriesSource};

// ============= Configuration & Ports =============

/// Read-only system configuration shared across systems and workers
#[derive(Resource, Clone)]
pub struct CoreConfig(pub Arc<SystemConfig>);

#[derive(Resource, Clone)]
pub struct TimeSeriesSourceResource(pub Arc<dyn TimeSeriesSource>);

#[derive(Resource, Clone)]
pub struct HistorySourceResource(pub Arc<dyn HistorySource>);

#[derive(Resource, Clone)]
pub struct PlanSinkResource(pub Arc<dyn PlanSink>);

#[derive(Resource, Clone)]
pub struct ClockResource(pub Arc<dyn Clock>);

// ============= Derived State =============

#[derive(Resource, Default)]
pub struct ForecastCachesResource(pub ForecastCaches);

#[derive(Resource, Clone)]
pub struct GaEngineResource(pub Arc<GaEngine>);

#[derive(Resource)]
pub struct JournalResource(pub Option<TickJournal>);

/// Channel end the input-fetch worker feeds snapshots into
#[derive(Resource)]
pub struct InputChannel {
    pub receiver: Receiver<InputSnapshot>,
}

/// Most recent input snapshot seen by the ECS side
#[derive(Resource, Default)]
pub struct LatestInputs(pub Option<InputSnapshot>);

/// The currently published plan; the single atomic cell all readers see
///
/// Only the harvest system writes it, and only after the sink accepted
/// the publication.
#[derive(Resource, Default)]
pub struct PublishedPlan(pub Option<Arc<DispatchPlan>>);

// ============= Control Loop State =============

/// Tick cadence, backoff and retry bookkeeping for the scheduler loop
#[derive(Resource, Debug)]
pub struct TickState {
    /// Configured cadence (minutes)
    pub base_interval_minutes: u32,
    /// Current cadence after backoff
    pub interval_minutes: u32,
    /// Instant of the last fired tick
    pub last_tick: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    /// Input fingerprints of the previous tick, for the skip rule
    pub last_fingerprints: Option<(u64, u64, u64)>,
    /// A plan whose publication failed; retried once on the next tick
    pub pending_retry: Option<Arc<DispatchPlan>>,
    pub run_counter: u64,
    pub seed_base: u64,
}

impl TickState {
    pub fn new(tick_minutes: u32, seed_base: u64) -> Self {
        Self {
            base_interval_minutes: tick_minutes,
            interval_minutes: tick_minutes,
            last_tick: None,
            consecutive_failures: 0,
            last_fingerprints: None,
            pending_retry: None,
            run_counter: 0,
            seed_base,
        }
    }

    /// A tick fires once per wall-clock-aligned interval bucket
    ///
    /// Buckets are recomputed against the current (possibly backed-off)
    /// interval, so a widened cadence takes effect immediately.
    pub fn tick_due(&mut self, now: DateTime<Utc>) -> bool {
        let interval_secs = i64::from(self.interval_minutes) * 60;
        let bucket = now.timestamp().div_euclid(interval_secs);
        let last_bucket = self
            .last_tick
            .map(|t| t.timestamp().div_euclid(interval_secs));
        if last_bucket == Some(bucket) {
            return false;
        }
        self.last_tick = Some(now);
        true
    }

    /// Doubles the interval after three consecutive failures, capped at 60 min
    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= 3 {
            self.interval_minutes = (self.interval_minutes * 2).min(60);
        }
    }

    /// First success resets the cadence
    pub fn record_success(&mut self) {
        self.interval_minutes = self.base_interval_minutes;
        self.consecutive_failures = 0;
    }
}

// ============= In-flight Optimization =============

/// Message from the optimizer task back to the harvest system
pub struct OptimizerMessage {
    pub run_id: u64,
    pub outcome: OptimizationOutcome,
}

/// Handle on the optimization currently in flight, if any
///
/// At most one run is active; a newer tick cancels the old run and
/// replaces this handle, so any late result carries a stale run id and is
/// discarded.
pub struct OptimizationHandle {
    pub run_id: u64,
    pub cancel: CancelToken,
    pub receiver: Receiver<OptimizerMessage>,
    pub launched_at: DateTime<Utc>,
    pub degraded: Vec<ErrorKind>,
    pub grid_start: DateTime<Utc>,
    pub first_slot: usize,
}

#[derive(Resource, Default)]
pub struct ActiveOptimization(pub Option<OptimizationHandle>);
