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

/// Entity state as returned by `GET /api/states/{entity_id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaEntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub last_updated: DateTime<Utc>,
}

/// One state change as returned by `GET /api/history/period/...`
///
/// The history endpoint omits `entity_id` on all but the first element of
/// each series, so every field except `state` is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaHistoryState {
    #[serde(default)]
    pub entity_id: Option<String>,
    pub state: String,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_changed: Option<DateTime<Utc>>,
}

impl HaHistoryState {
    /// Best-effort timestamp of this change
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_updated.or(self.last_changed)
    }
}
