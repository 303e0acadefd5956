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

//! Typed ports to the outside world. Business logic only ever sees these
//! traits; the Home Assistant adapter crate provides the production
//! implementations, tests provide mocks.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use optiwatt_types::plan::DispatchPlan;

use crate::cache::fingerprint;

/// Raw state of one source entity, as delivered by the host platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_id: String,
    pub state: String,
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub last_updated: DateTime<Utc>,
}

impl EntitySnapshot {
    /// Change-detection fingerprint over state, attributes and update time
    pub fn fingerprint(&self) -> u64 {
        let attributes = serde_json::to_string(&self.attributes).unwrap_or_default();
        fingerprint(&(
            self.entity_id.as_str(),
            self.state.as_str(),
            attributes.as_str(),
            self.last_updated.timestamp_micros(),
        ))
    }
}

/// Read access to live entity states (forecasts, prices, sensors)
#[async_trait]
pub trait TimeSeriesSource: Send + Sync {
    async fn read_series(&self, entity_id: &str) -> Result<EntitySnapshot>;

    /// Check if the source is reachable
    async fn health_check(&self) -> Result<bool>;

    /// Source name for logging
    fn name(&self) -> &str;
}

/// Read access to recorded state history
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Fetch `(timestamp, state)` pairs for an entity over a time range,
    /// in chronological order
    async fn read_history(
        &self,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        significant_only: bool,
    ) -> Result<Vec<(DateTime<Utc>, String)>>;

    fn name(&self) -> &str;
}

/// Write access to the device/battery actuators
///
/// Publishing the same plan twice must be idempotent at the sink.
#[async_trait]
pub trait PlanSink: Send + Sync {
    async fn publish_plan(&self, plan: &DispatchPlan) -> Result<()>;

    fn name(&self) -> &str;
}

/// Wall-clock abstraction, injected so the control loop is testable
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
