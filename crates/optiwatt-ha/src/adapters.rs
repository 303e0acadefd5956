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

//! Adapters from the core ports to the Home Assistant REST API. This is
//! the only place where native HA errors meet the core's degraded-result
//! posture: adapters surface errors, the core turns them into fallbacks.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use optiwatt_core::traits::{EntitySnapshot, HistorySource, PlanSink, TimeSeriesSource};
use optiwatt_types::plan::DispatchPlan;

use crate::client::HomeAssistantClient;

// ============= Time-Series Source =============

/// Entity-state reads through the HA REST API
pub struct HaTimeSeriesAdapter {
    client: Arc<HomeAssistantClient>,
}

impl HaTimeSeriesAdapter {
    pub fn new(client: Arc<HomeAssistantClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TimeSeriesSource for HaTimeSeriesAdapter {
    async fn read_series(&self, entity_id: &str) -> Result<EntitySnapshot> {
        let state = self.client.get_state(entity_id).await?;
        Ok(EntitySnapshot {
            entity_id: state.entity_id,
            state: state.state,
            attributes: state.attributes,
            last_updated: state.last_updated,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.client.ping().await?)
    }

    fn name(&self) -> &str {
        "home-assistant"
    }
}

// ============= History Source =============

/// Recorder history reads through the HA REST API
pub struct HaHistoryAdapter {
    client: Arc<HomeAssistantClient>,
}

impl HaHistoryAdapter {
    pub fn new(client: Arc<HomeAssistantClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HistorySource for HaHistoryAdapter {
    async fn read_history(
        &self,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        significant_only: bool,
    ) -> Result<Vec<(DateTime<Utc>, String)>> {
        let states = self
            .client
            .get_history(entity_id, start, end, significant_only)
            .await?;

        let mut points: Vec<(DateTime<Utc>, String)> = states
            .into_iter()
            .filter_map(|s| s.timestamp().map(|ts| (ts, s.state)))
            .collect();
        points.sort_by_key(|(ts, _)| *ts);

        debug!("Fetched {} history points for {}", points.len(), entity_id);
        Ok(points)
    }

    fn name(&self) -> &str {
        "home-assistant-recorder"
    }
}

// ============= Plan Sink =============

/// Publishes the committed first slot of a plan to the actuators
///
/// Device ids are HA entity ids. Binary devices toggle through the generic
/// homeassistant domain (idempotent on repeat); fractional devices on the
/// light domain get a brightness, number entities a set_value. The battery
/// setpoint goes to the configured number entity in kW.
pub struct HaPlanSink {
    client: Arc<HomeAssistantClient>,
    battery_setpoint_entity: String,
}

impl HaPlanSink {
    pub fn new(client: Arc<HomeAssistantClient>, battery_setpoint_entity: String) -> Self {
        Self {
            client,
            battery_setpoint_entity,
        }
    }

    async fn publish_device(&self, entity_id: &str, on: bool, fraction: Option<f64>) -> Result<()> {
        match fraction {
            Some(level) if entity_id.starts_with("number.") => {
                self.client
                    .call_service(
                        "number.set_value",
                        json!({ "entity_id": entity_id, "value": level }),
                    )
                    .await?;
            }
            Some(level) if entity_id.starts_with("light.") && on => {
                self.client
                    .call_service(
                        "light.turn_on",
                        json!({
                            "entity_id": entity_id,
                            "brightness_pct": (level * 100.0).round() as u32,
                        }),
                    )
                    .await?;
            }
            _ => {
                let service = if on {
                    "homeassistant.turn_on"
                } else {
                    "homeassistant.turn_off"
                };
                self.client
                    .call_service(service, json!({ "entity_id": entity_id }))
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PlanSink for HaPlanSink {
    async fn publish_plan(&self, plan: &DispatchPlan) -> Result<()> {
        // One failing actuator must not block the rest: every device and
        // the battery setpoint are attempted each tick. The first error is
        // still returned so the publication as a whole is retried.
        let mut first_error: Option<anyhow::Error> = None;

        for (entity_id, command) in &plan.devices {
            if let Err(e) = self
                .publish_device(entity_id, command.on, command.fraction)
                .await
            {
                warn!("Failed to actuate {}: {}", entity_id, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        if let Err(e) = self
            .client
            .call_service(
                "number.set_value",
                json!({
                    "entity_id": self.battery_setpoint_entity,
                    "value": plan.battery_kw,
                }),
            )
            .await
        {
            warn!("Failed to set battery setpoint: {}", e);
            if first_error.is_none() {
                first_error = Some(e.into());
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        debug!(
            "Published plan: {} devices, battery {:+.2} kW",
            plan.devices.len(),
            plan.battery_kw
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "home-assistant-actuators"
    }
}
