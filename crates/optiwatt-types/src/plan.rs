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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::device::{DeviceControl, DeviceSpec};
use crate::series::SLOTS_PER_DAY;

/// Actuator command for a single device in the committed slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub on: bool,
    /// Dimming level for fractional devices; absent for binary devices
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fraction: Option<f64>,
}

impl DeviceCommand {
    /// Derive a command from a gene value according to the device's control kind
    pub fn from_activity(activity: f64, control: DeviceControl) -> Self {
        match control {
            DeviceControl::Binary => Self {
                on: activity > 0.5,
                fraction: None,
            },
            DeviceControl::Fractional => Self {
                on: activity > 0.0,
                fraction: Some(activity.clamp(0.0, 1.0)),
            },
        }
    }
}

/// A complete 24-hour dispatch plan
///
/// Only `devices` and `battery_kw` (the first-slot entries) are commitments;
/// the horizon matrices are advisory and recomputed every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchPlan {
    pub generated_at: DateTime<Utc>,

    /// Local-midnight anchor of the planning day
    pub grid_start: DateTime<Utc>,

    /// Slot index the committed commands apply to
    pub first_slot: usize,

    /// Committed per-device commands for the first slot
    pub devices: BTreeMap<String, DeviceCommand>,

    /// Committed battery setpoint (kW, +charge / -discharge)
    pub battery_kw: f64,

    /// Advisory device activity horizon, one row of 96 values per device
    pub device_horizon: Vec<Vec<f64>>,

    /// Advisory battery dispatch horizon, 96 values
    pub battery_horizon: Vec<f64>,

    pub best_fitness: f64,
}

impl DispatchPlan {
    /// Assemble a plan from the optimizer's best candidate
    pub fn from_schedule(
        generated_at: DateTime<Utc>,
        grid_start: DateTime<Utc>,
        first_slot: usize,
        specs: &[DeviceSpec],
        device_horizon: Vec<Vec<f64>>,
        battery_horizon: Vec<f64>,
        best_fitness: f64,
    ) -> Self {
        let slot = first_slot.min(SLOTS_PER_DAY - 1);
        let devices = specs
            .iter()
            .zip(device_horizon.iter())
            .map(|(spec, row)| {
                let activity = row.get(slot).copied().unwrap_or(0.0);
                (
                    spec.id.clone(),
                    DeviceCommand::from_activity(activity, spec.control),
                )
            })
            .collect();
        let battery_kw = battery_horizon.get(slot).copied().unwrap_or(0.0);

        Self {
            generated_at,
            grid_start,
            first_slot: slot,
            devices,
            battery_kw,
            device_horizon,
            battery_horizon,
            best_fitness,
        }
    }
}
