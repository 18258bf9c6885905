//! Command plans and the climate service calls they expand into.

use serde::Serialize;
use serde_json::json;

use hearth_api::ServiceCall;

use crate::config::HvacConfig;

/// Operational mode commanded to hub entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HvacMode {
    Heat,
    Cool,
    Off,
}

/// One evaluation's output: what every enabled entity should be told.
///
/// Produced by the decision engine, consumed once by the fan-out, then
/// discarded. `Off` carries no setpoint or preset — the defrost lockout
/// also maps here, since defrost is not a hub-visible mode.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandPlan {
    Heat { setpoint_c: f64, preset_mode: String },
    Cool { setpoint_c: f64, preset_mode: String },
    Off,
}

impl CommandPlan {
    /// Build the plan for a decided mode from the configured setpoints.
    pub fn for_mode(mode: HvacMode, config: &HvacConfig) -> Self {
        match mode {
            HvacMode::Heat => Self::Heat {
                setpoint_c: config.heating.setpoint_c,
                preset_mode: config.heating.preset_mode.clone(),
            },
            HvacMode::Cool => Self::Cool {
                setpoint_c: config.cooling.setpoint_c,
                preset_mode: config.cooling.preset_mode.clone(),
            },
            HvacMode::Off => Self::Off,
        }
    }

    pub fn mode(&self) -> HvacMode {
        match self {
            Self::Heat { .. } => HvacMode::Heat,
            Self::Cool { .. } => HvacMode::Cool,
            Self::Off => HvacMode::Off,
        }
    }

    /// Expand into the service calls for one entity, in dispatch order:
    /// `set_hvac_mode`, then (when not off) `set_temperature` and
    /// `set_preset_mode`.
    pub fn service_calls(&self, entity_id: &str) -> Vec<ServiceCall> {
        let mut calls = vec![
            ServiceCall::new("climate", "set_hvac_mode").data(json!({
                "entity_id": entity_id,
                "hvac_mode": self.mode().to_string(),
            })),
        ];

        if let Self::Heat {
            setpoint_c,
            preset_mode,
        }
        | Self::Cool {
            setpoint_c,
            preset_mode,
        } = self
        {
            calls.push(ServiceCall::new("climate", "set_temperature").data(json!({
                "entity_id": entity_id,
                "temperature": setpoint_c,
            })));
            calls.push(ServiceCall::new("climate", "set_preset_mode").data(json!({
                "entity_id": entity_id,
                "preset_mode": preset_mode,
            })));
        }

        calls
    }
}
