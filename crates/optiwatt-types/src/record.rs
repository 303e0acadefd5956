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

use crate::error::ErrorKind;
use crate::plan::DeviceCommand;

/// One observability record per completed control tick
///
/// Appended as a JSON line to the tick journal; not required for
/// correctness of the control loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub tick_ts: DateTime<Utc>,

    /// Best fitness achieved; absent when the tick was skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_fitness: Option<f64>,

    pub generations_run: usize,

    #[serde(default)]
    pub degraded_inputs: Vec<ErrorKind>,

    /// Commands that were committed this tick
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_first_slot: Option<PublishedFirstSlot>,

    /// True when the tick re-used the prior plan (all inputs degraded
    /// and unchanged)
    #[serde(default)]
    pub skipped: bool,
}

/// The committed portion of a published plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedFirstSlot {
    pub devices: BTreeMap<String, DeviceCommand>,
    pub battery_kw: f64,
}
