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

pub mod cache;
pub mod forecast;
pub mod ga;
pub mod input;
pub mod journal;
pub mod refresh;
pub mod resources;
pub mod scheduler;
pub mod sim;
pub mod tariff;
pub mod timegrid;
pub mod traits;

use bevy_app::prelude::*;
use bevy_ecs::schedule::IntoScheduleConfigs;

pub use cache::{fingerprint, fingerprint_series, SeriesCache};
pub use forecast::{fuse_pv, synthesize_load};
pub use ga::{
    BestCandidate, CancelToken, GaEngine, OptimizationOutcome, RunMetrics, Termination,
};
pub use input::{parse_battery_soc, parse_market_shape, parse_pv_shape, MarketShape, PvSample, PvShape};
pub use journal::TickJournal;
pub use refresh::{refresh_forecasts, ForecastCaches, InputSnapshot, RefreshedForecasts};
pub use resources::*;
pub use sim::{simulate, SimulationInput, SimulationResult};
pub use tariff::{PricingComponents, TariffCalculator};
pub use timegrid::TimeGrid;
pub use traits::{Clock, EntitySnapshot, HistorySource, PlanSink, SystemClock, TimeSeriesSource};

/// Core plugin: registers the control-loop resources and systems
///
/// The port resources (sources, sink, clock), `CoreConfig`, `TickState`,
/// `GaEngineResource` and `JournalResource` are inserted by the binary
/// before the app runs.
pub struct OptiwattCorePlugin;

impl Plugin for OptiwattCorePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<ForecastCachesResource>()
            .init_resource::<LatestInputs>()
            .init_resource::<PublishedPlan>()
            .init_resource::<ActiveOptimization>()
            .add_systems(Startup, scheduler::spawn_input_worker)
            .add_systems(
                Update,
                (
                    scheduler::ingest_inputs_system,
                    scheduler::control_tick_system,
                    scheduler::harvest_optimization_system,
                )
                    .chain(),
            );
    }
}
