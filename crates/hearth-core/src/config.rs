//! Domain configuration for the decision engine and controller.
//!
//! These types are plain values: validation and file/env loading live in
//! `hearth-config`, which converts its raw structures into this module.
//! Everything here is immutable after construction and shared read-only
//! across the controller, the master machine, and the strategies.

use std::time::Duration;

use serde::Serialize;

/// System operation mode selected by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SystemMode {
    /// Arbitrate between heating and cooling from current conditions.
    Auto,
    HeatOnly,
    CoolOnly,
    Off,
}

/// Indoor hysteresis band and outdoor operating range for one strategy.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TemperatureThresholds {
    pub indoor_min: f64,
    pub indoor_max: f64,
    /// Minimum outdoor temperature at which the equipment may run.
    pub outdoor_min: f64,
    /// Maximum outdoor temperature at which the equipment may run.
    pub outdoor_max: f64,
}

/// Defrost cycle parameters for heat-pump outdoor units.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DefrostOptions {
    /// Outdoor temperature at or below which defrost cycles are needed.
    pub outdoor_threshold_c: f64,
    /// Minimum interval between the end of one cycle and the start of
    /// the next.
    pub period: Duration,
    /// Length of one defrost cycle.
    pub duration: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeatingOptions {
    /// Target temperature sent to entities while heating.
    pub setpoint_c: f64,
    pub preset_mode: String,
    pub thresholds: TemperatureThresholds,
    pub defrost: Option<DefrostOptions>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoolingOptions {
    /// Target temperature sent to entities while cooling.
    pub setpoint_c: f64,
    pub preset_mode: String,
    pub thresholds: TemperatureThresholds,
}

/// Daily window during which the controller may command non-idle modes.
///
/// Hours are in local time, `0..=23`; `end` is inclusive and the window
/// does not span midnight. Weekday mornings start at `start_weekday`,
/// weekend mornings at `start_weekend`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ActiveHours {
    pub start_weekday: u8,
    pub start_weekend: u8,
    pub end: u8,
}

impl ActiveHours {
    /// Whether `hour` falls inside the window (bounds inclusive).
    pub fn contains(&self, hour: u8, is_weekday: bool) -> bool {
        let start = if is_weekday {
            self.start_weekday
        } else {
            self.start_weekend
        };
        start <= hour && hour <= self.end
    }
}

/// One controllable climate entity.
#[derive(Debug, Clone, Serialize)]
pub struct HvacEntity {
    /// Hub identifier, shaped `domain.name` (always `climate.*` here).
    pub entity_id: String,
    pub enabled: bool,
    /// Whether the entity's outdoor unit runs defrost cycles.
    pub defrost_capable: bool,
}

/// Complete HVAC policy: sensors, entities, strategy options, schedule.
#[derive(Debug, Clone, Serialize)]
pub struct HvacConfig {
    /// Indoor temperature sensor driving event-based evaluation.
    pub temp_sensor: String,
    /// Outdoor temperature sensor, polled over REST.
    pub outdoor_sensor: String,
    pub system_mode: SystemMode,
    /// Fan-out targets, commanded in declaration order.
    pub entities: Vec<HvacEntity>,
    pub heating: HeatingOptions,
    pub cooling: CoolingOptions,
    pub active_hours: Option<ActiveHours>,
    /// Periodic safety-net evaluation interval. Default: 5 minutes.
    pub tick_interval: Duration,
}

impl HvacConfig {
    pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(300);

    /// Whether the schedule permits operation at the given local time.
    /// No configured schedule means always active.
    pub fn is_active_at(&self, hour: u8, is_weekday: bool) -> bool {
        self.active_hours
            .is_none_or(|hours| hours.contains(hour, is_weekday))
    }
}

/// Shared fixture policy used by unit tests across the crate: a heat
/// pump with defrost, two entities, and the weekday/weekend schedule.
#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;

    pub fn fixture_config() -> HvacConfig {
        HvacConfig {
            temp_sensor: "sensor.indoor_temperature".into(),
            outdoor_sensor: "sensor.outdoor_temperature".into(),
            system_mode: SystemMode::Auto,
            entities: vec![
                HvacEntity {
                    entity_id: "climate.living_room_ac".into(),
                    enabled: true,
                    defrost_capable: true,
                },
                HvacEntity {
                    entity_id: "climate.bedroom_ac".into(),
                    enabled: true,
                    defrost_capable: false,
                },
            ],
            heating: HeatingOptions {
                setpoint_c: 21.0,
                preset_mode: "comfort".into(),
                thresholds: TemperatureThresholds {
                    indoor_min: 19.7,
                    indoor_max: 20.2,
                    outdoor_min: -10.0,
                    outdoor_max: 15.0,
                },
                defrost: Some(DefrostOptions {
                    outdoor_threshold_c: 0.0,
                    period: Duration::from_secs(3600),
                    duration: Duration::from_secs(300),
                }),
            },
            cooling: CoolingOptions {
                setpoint_c: 24.0,
                preset_mode: "windFree".into(),
                thresholds: TemperatureThresholds {
                    indoor_min: 23.5,
                    indoor_max: 25.0,
                    outdoor_min: 10.0,
                    outdoor_max: 45.0,
                },
            },
            active_hours: Some(ActiveHours {
                start_weekday: 8,
                start_weekend: 7,
                end: 21,
            }),
            tick_interval: HvacConfig::DEFAULT_TICK_INTERVAL,
        }
    }
}
