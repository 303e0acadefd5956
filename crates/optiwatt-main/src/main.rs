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

mod config;

use anyhow::Result;
use bevy_app::{prelude::*, ScheduleRunnerPlugin, TaskPoolPlugin};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;

use optiwatt_core::{
    ClockResource, CoreConfig, GaEngine, GaEngineResource, HistorySourceResource, JournalResource,
    OptiwattCorePlugin, PlanSinkResource, SystemClock, TickJournal, TickState,
    TimeSeriesSourceResource,
};
use optiwatt_ha::{HaHistoryAdapter, HaPlanSink, HaTimeSeriesAdapter, HomeAssistantClient};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        match args[1].as_str() {
            "--help" | "-h" => {
                println!("OptiWatt - residential energy-management scheduler");
                println!("Version: {}", VERSION);
                println!();
                println!("Usage: optiwatt [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help    Print this help message");
                println!("  -v, --version Print version");
                println!();
                println!("Configuration is read from OPTIWATT_CONFIG or ./optiwatt.json");
                return Ok(());
            }
            "--version" | "-v" => {
                println!("{}", VERSION);
                return Ok(());
            }
            _ => {}
        }
    }

    // Tokio runtime for HTTP and background workers; the Bevy app runs on
    // a blocking thread inside it so both schedulers stay responsive
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create tokio runtime");

    runtime.block_on(async {
        tokio::task::spawn_blocking(initialize_and_run)
            .await
            .expect("App task panicked")
    })
}

fn initialize_and_run() -> Result<()> {
    // Respects RUST_LOG
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = config::load_config()?;

    info!("🚀 Starting OptiWatt v{}", VERSION);
    info!("📋 Configuration summary:");
    info!(
        "   Optimizer: population {}, max {} generations, budget {}s",
        config.optimizer.population_size,
        config.optimizer.generations_max,
        config.control.tick_budget_s
    );
    info!(
        "   Battery: {:.1} kWh, {:.1}/{:.1} kW, SOC {:.0}%-{:.0}%",
        config.battery.capacity_kwh,
        config.battery.max_charge_kw,
        config.battery.max_discharge_kw,
        config.battery.soc_min * 100.0,
        config.battery.soc_max * 100.0
    );
    info!("   Devices: {}", config.devices.len());
    for device in &config.devices {
        info!(
            "     - {} ({:.2} kW, {:?})",
            device.id, device.power_kw, device.control
        );
    }
    info!(
        "   Tick: every {} min, timezone {}",
        config.control.tick_minutes, config.control.timezone
    );

    // Home Assistant client: supervisor token when running as an addon,
    // HA_BASE_URL/HA_TOKEN otherwise
    let ha_client = if std::env::var("SUPERVISOR_TOKEN").is_ok() {
        info!("🏠 Initializing HA client using Supervisor API...");
        Arc::new(HomeAssistantClient::from_supervisor()?)
    } else {
        info!("🏠 Initializing HA client from environment...");
        Arc::new(HomeAssistantClient::from_config(None, None)?)
    };

    let series = Arc::new(HaTimeSeriesAdapter::new(ha_client.clone()));
    let history = Arc::new(HaHistoryAdapter::new(ha_client.clone()));
    let sink = Arc::new(HaPlanSink::new(
        ha_client.clone(),
        config.entities.battery_setpoint.clone(),
    ));

    let journal = match &config.control.journal_path {
        Some(path) => {
            info!("📝 Tick journal: {}", path);
            Some(TickJournal::new(path.as_str()))
        }
        None => None,
    };

    let seed_base = config.optimizer.seed.unwrap_or_else(|| {
        let seed: u64 = rand::random();
        warn!("No PRNG seed configured, drew {} for this session", seed);
        seed
    });

    let engine = Arc::new(GaEngine::new(config.optimizer.clone()));
    let tick_state = TickState::new(config.control.tick_minutes, seed_base);
    let config = Arc::new(config);

    info!("🎮 Starting control loop...");
    let mut app = App::new();
    app.add_plugins(TaskPoolPlugin::default())
        .add_plugins(ScheduleRunnerPlugin::run_loop(Duration::from_millis(100)))
        .add_plugins(OptiwattCorePlugin)
        .insert_resource(CoreConfig(config))
        .insert_resource(ClockResource(Arc::new(SystemClock)))
        .insert_resource(TimeSeriesSourceResource(series))
        .insert_resource(HistorySourceResource(history))
        .insert_resource(PlanSinkResource(sink))
        .insert_resource(GaEngineResource(engine))
        .insert_resource(JournalResource(journal))
        .insert_resource(tick_state);

    app.run();
    Ok(())
}
