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

use serde::{Deserialize, Serialize};

use crate::device::{BatterySpec, DeviceSpec};

// ============= System Configuration =============

/// Central configuration for the OptiWatt system
///
/// Read-only after startup; a reconfiguration purges every derived-series
/// cache and restarts the control loop state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SystemConfig {
    #[serde(default, rename = "optimizer")]
    pub optimizer: OptimizerConfig,

    #[serde(default, rename = "battery")]
    pub battery: BatterySpec,

    #[serde(default)]
    pub devices: Vec<DeviceSpec>,

    #[serde(default, rename = "tariff")]
    pub tariff: TariffConfig,

    #[serde(default, rename = "weights")]
    pub weights: FitnessWeights,

    #[serde(default, rename = "control")]
    pub control: ControlConfig,

    #[serde(default, rename = "entities")]
    pub entities: EntitiesConfig,

    #[serde(default, rename = "load_template")]
    pub load_template: LoadTemplateConfig,
}

impl SystemConfig {
    /// Clamp out-of-range values in place and return a warning per fix
    ///
    /// Mirrors the permissive posture of the input layer: a bad option
    /// degrades to the nearest legal value instead of refusing to start.
    pub fn validate(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.optimizer.population_size < 10 {
            warnings.push(format!(
                "population_size {} below minimum, clamped to 10",
                self.optimizer.population_size
            ));
            self.optimizer.population_size = 10;
        }
        if self.optimizer.generations_max < 10 {
            warnings.push(format!(
                "generations_max {} below minimum, clamped to 10",
                self.optimizer.generations_max
            ));
            self.optimizer.generations_max = 10;
        }
        for (name, value) in [
            ("p_cx", &mut self.optimizer.p_cx),
            ("p_mut", &mut self.optimizer.p_mut),
            ("elite_frac", &mut self.optimizer.elite_frac),
        ] {
            if !(0.0..=1.0).contains(value) {
                warnings.push(format!("{} {} outside [0,1], clamped", name, value));
                *value = value.clamp(0.0, 1.0);
            }
        }
        if self.optimizer.stall_gens == 0 {
            warnings.push("stall_gens 0 below minimum, clamped to 1".to_string());
            self.optimizer.stall_gens = 1;
        }

        if ![5, 15, 30, 60].contains(&self.control.tick_minutes) {
            warnings.push(format!(
                "tick_minutes {} not in {{5,15,30,60}}, reset to 15",
                self.control.tick_minutes
            ));
            self.control.tick_minutes = 15;
        }
        if self.control.tick_budget_s == 0 {
            warnings.push("tick_budget_s 0 below minimum, clamped to 1".to_string());
            self.control.tick_budget_s = 1;
        }

        if !(0.0..=1.0).contains(&self.battery.round_trip_eff) || self.battery.round_trip_eff == 0.0
        {
            warnings.push(format!(
                "round_trip_eff {} outside (0,1], reset to 0.95",
                self.battery.round_trip_eff
            ));
            self.battery.round_trip_eff = 0.95;
        }
        if self.battery.soc_min > self.battery.soc_max {
            warnings.push(format!(
                "soc_min {} above soc_max {}, swapped",
                self.battery.soc_min, self.battery.soc_max
            ));
            std::mem::swap(&mut self.battery.soc_min, &mut self.battery.soc_max);
        }
        let soc_range = self.battery.soc_min..=self.battery.soc_max;
        if !soc_range.contains(&self.battery.initial_soc) {
            warnings.push(format!(
                "initial_soc {} outside [{}, {}], clamped",
                self.battery.initial_soc, self.battery.soc_min, self.battery.soc_max
            ));
            self.battery.initial_soc = self
                .battery
                .initial_soc
                .clamp(self.battery.soc_min, self.battery.soc_max);
        }

        for device in &mut self.devices {
            if !(0.0..=1.0).contains(&device.priority) {
                warnings.push(format!(
                    "device '{}' priority {} outside [0,1], clamped",
                    device.id, device.priority
                ));
                device.priority = device.priority.clamp(0.0, 1.0);
            }
            if device.power_kw < 0.0 {
                warnings.push(format!(
                    "device '{}' power_kw {} negative, reset to 0",
                    device.id, device.power_kw
                ));
                device.power_kw = 0.0;
            }
        }

        warnings
    }
}

// ============= Optimizer Configuration =============

/// Genetic-algorithm parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_population_size")]
    pub population_size: usize,

    #[serde(default = "default_generations_max")]
    pub generations_max: usize,

    /// Crossover probability
    #[serde(default = "default_p_cx")]
    pub p_cx: f64,

    /// Per-gene mutation probability
    #[serde(default = "default_p_mut")]
    pub p_mut: f64,

    /// Fraction of the population preserved unchanged each generation
    #[serde(default = "default_elite_frac")]
    pub elite_frac: f64,

    /// Early-stop patience in generations
    #[serde(default = "default_stall_gens")]
    pub stall_gens: usize,

    #[serde(default = "default_tournament_k")]
    pub tournament_k: usize,

    /// Minimum best-fitness gain that resets the stall counter
    #[serde(default = "default_epsilon_improve")]
    pub epsilon_improve: f64,

    /// PRNG seed; a random seed is drawn at startup when absent
    #[serde(default)]
    pub seed: Option<u64>,

    /// Evaluation worker threads; defaults to min(cores, 4)
    #[serde(default)]
    pub workers: Option<usize>,
}

fn default_population_size() -> usize {
    100
}
fn default_generations_max() -> usize {
    200
}
fn default_p_cx() -> f64 {
    0.8
}
fn default_p_mut() -> f64 {
    0.05
}
fn default_elite_frac() -> f64 {
    0.2
}
fn default_stall_gens() -> usize {
    20
}
fn default_tournament_k() -> usize {
    3
}
fn default_epsilon_improve() -> f64 {
    1e-9
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            population_size: default_population_size(),
            generations_max: default_generations_max(),
            p_cx: default_p_cx(),
            p_mut: default_p_mut(),
            elite_frac: default_elite_frac(),
            stall_gens: default_stall_gens(),
            tournament_k: default_tournament_k(),
            epsilon_improve: default_epsilon_improve(),
            seed: None,
            workers: None,
        }
    }
}

// ============= Tariff Configuration =============

/// Indexed-tariff parameters
///
/// price = ((PM * fp + q + tae + mfrr) * vat * TOU * SEASON) / 1000 €/kWh,
/// with PM the wholesale price in €/MWh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TariffConfig {
    /// Frequency restoration reserve component (€/MWh)
    #[serde(default = "default_mfrr")]
    pub mfrr: f64,

    /// Quality component (€/MWh)
    #[serde(default = "default_q")]
    pub q: f64,

    /// Fixed multiplier applied to the market price
    #[serde(default = "default_fp")]
    pub fp: f64,

    /// Transmission and distribution tariff (€/MWh)
    #[serde(default = "default_tae")]
    pub tae: f64,

    /// VAT multiplier (1.23 = 23 %)
    #[serde(default = "default_vat")]
    pub vat: f64,

    #[serde(default = "default_one")]
    pub peak_multiplier: f64,
    #[serde(default = "default_one")]
    pub off_peak_multiplier: f64,
    #[serde(default = "default_one")]
    pub shoulder_multiplier: f64,

    /// Hours billed at the peak multiplier
    #[serde(default = "default_peak_hours")]
    pub peak_hours: Vec<u32>,

    /// Hours billed at the off-peak multiplier; everything else is shoulder
    #[serde(default = "default_off_peak_hours")]
    pub off_peak_hours: Vec<u32>,

    #[serde(default = "default_summer_months")]
    pub summer_months: Vec<u32>,
    #[serde(default = "default_one")]
    pub summer_adjustment: f64,
    #[serde(default = "default_one")]
    pub winter_adjustment: f64,

    /// Constant wholesale price assumed when no market source is available (€/MWh)
    #[serde(default = "default_fallback_market_price")]
    pub fallback_market_price_eur_mwh: f64,
}

fn default_mfrr() -> f64 {
    1.94
}
fn default_q() -> f64 {
    30.0
}
fn default_fp() -> f64 {
    1.1674
}
fn default_tae() -> f64 {
    60.0
}
fn default_vat() -> f64 {
    1.23
}
fn default_one() -> f64 {
    1.0
}
fn default_peak_hours() -> Vec<u32> {
    vec![18, 19, 20, 21]
}
fn default_off_peak_hours() -> Vec<u32> {
    vec![0, 1, 2, 3, 4, 5, 6, 23]
}
fn default_summer_months() -> Vec<u32> {
    vec![6, 7, 8, 9]
}
fn default_fallback_market_price() -> f64 {
    50.0
}

impl Default for TariffConfig {
    fn default() -> Self {
        Self {
            mfrr: default_mfrr(),
            q: default_q(),
            fp: default_fp(),
            tae: default_tae(),
            vat: default_vat(),
            peak_multiplier: 1.0,
            off_peak_multiplier: 1.0,
            shoulder_multiplier: 1.0,
            peak_hours: default_peak_hours(),
            off_peak_hours: default_off_peak_hours(),
            summer_months: default_summer_months(),
            summer_adjustment: 1.0,
            winter_adjustment: 1.0,
            fallback_market_price_eur_mwh: default_fallback_market_price(),
        }
    }
}

// ============= Fitness Weights =============

/// Weights of the fitness terms; higher fitness is better, so the weighted
/// sum is negated
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FitnessWeights {
    #[serde(default = "default_one")]
    pub cost: f64,
    #[serde(default = "default_one")]
    pub penalty: f64,
    #[serde(default = "default_w_cycles")]
    pub cycles: f64,
    #[serde(default = "default_w_peak")]
    pub peak: f64,
}

fn default_w_cycles() -> f64 {
    0.1
}
fn default_w_peak() -> f64 {
    0.1
}

impl Default for FitnessWeights {
    fn default() -> Self {
        Self {
            cost: 1.0,
            penalty: 1.0,
            cycles: default_w_cycles(),
            peak: default_w_peak(),
        }
    }
}

// ============= Control Loop Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Control cadence in minutes; one of {5, 15, 30, 60}
    #[serde(default = "default_tick_minutes")]
    pub tick_minutes: u32,

    /// Wall-clock budget for one optimization run (seconds)
    #[serde(default = "default_tick_budget_s")]
    pub tick_budget_s: u64,

    /// IANA timezone the planning day is anchored to
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Feed-in price credited for exported energy (€/kWh)
    #[serde(default)]
    pub export_price_eur_per_kwh: f64,

    /// Tick journal path; journaling is disabled when absent
    #[serde(default)]
    pub journal_path: Option<String>,
}

fn default_tick_minutes() -> u32 {
    15
}
fn default_tick_budget_s() -> u64 {
    10
}
fn default_timezone() -> String {
    "Europe/Lisbon".to_string()
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_minutes: default_tick_minutes(),
            tick_budget_s: default_tick_budget_s(),
            timezone: default_timezone(),
            export_price_eur_per_kwh: 0.0,
            journal_path: None,
        }
    }
}

// ============= Entity Mapping =============

/// Home Assistant entity ids the scheduler reads and writes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitiesConfig {
    #[serde(default = "default_pv_today_entity")]
    pub pv_forecast_today: String,

    #[serde(default = "default_pv_tomorrow_entity")]
    pub pv_forecast_tomorrow: String,

    #[serde(default = "default_market_price_entity")]
    pub market_price: String,

    #[serde(default = "default_consumption_entity")]
    pub consumption_sensor: String,

    #[serde(default = "default_battery_soc_entity")]
    pub battery_soc: String,

    /// Number entity the battery setpoint is written to
    #[serde(default = "default_battery_setpoint_entity")]
    pub battery_setpoint: String,
}

fn default_pv_today_entity() -> String {
    "sensor.solcast_pv_forecast_today".to_string()
}
fn default_pv_tomorrow_entity() -> String {
    "sensor.solcast_pv_forecast_tomorrow".to_string()
}
fn default_market_price_entity() -> String {
    "sensor.omie_electricity_price".to_string()
}
fn default_consumption_entity() -> String {
    "sensor.power_consumption".to_string()
}
fn default_battery_soc_entity() -> String {
    "sensor.battery_soc".to_string()
}
fn default_battery_setpoint_entity() -> String {
    "number.battery_power_setpoint".to_string()
}

impl Default for EntitiesConfig {
    fn default() -> Self {
        Self {
            pv_forecast_today: default_pv_today_entity(),
            pv_forecast_tomorrow: default_pv_tomorrow_entity(),
            market_price: default_market_price_entity(),
            consumption_sensor: default_consumption_entity(),
            battery_soc: default_battery_soc_entity(),
            battery_setpoint: default_battery_setpoint_entity(),
        }
    }
}

// ============= Load Template =============

/// Anchors of the piecewise-linear diurnal load template (kW)
///
/// The template is the single source of truth when no recorder history is
/// available: flat through the night, a morning ramp, a flat daytime
/// plateau and an evening peak.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoadTemplateConfig {
    #[serde(default = "default_night_kw")]
    pub night_kw: f64,
    #[serde(default = "default_morning_peak_kw")]
    pub morning_peak_kw: f64,
    #[serde(default = "default_day_kw")]
    pub day_kw: f64,
    #[serde(default = "default_evening_peak_kw")]
    pub evening_peak_kw: f64,

    /// Constant used when even the template cannot be applied (kW)
    #[serde(default = "default_last_resort_kw")]
    pub last_resort_kw: f64,
}

fn default_night_kw() -> f64 {
    0.2
}
fn default_morning_peak_kw() -> f64 {
    1.5
}
fn default_day_kw() -> f64 {
    0.5
}
fn default_evening_peak_kw() -> f64 {
    3.0
}
fn default_last_resort_kw() -> f64 {
    0.1
}

impl Default for LoadTemplateConfig {
    fn default() -> Self {
        Self {
            night_kw: default_night_kw(),
            morning_peak_kw: default_morning_peak_kw(),
            day_kw: default_day_kw(),
            evening_peak_kw: default_evening_peak_kw(),
            last_resort_kw: default_last_resort_kw(),
        }
    }
}
