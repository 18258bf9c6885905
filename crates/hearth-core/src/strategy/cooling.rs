//! Cooling strategy: a plain two-state hysteresis machine.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::config::HvacConfig;
use crate::strategy::Conditions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CoolingState {
    CoolingOff,
    Cooling,
}

pub struct CoolingStrategy {
    config: Arc<HvacConfig>,
    state: CoolingState,
}

impl CoolingStrategy {
    pub fn new(config: Arc<HvacConfig>) -> Self {
        debug!(
            setpoint_c = config.cooling.setpoint_c,
            preset_mode = %config.cooling.preset_mode,
            "cooling strategy initialized"
        );
        Self {
            config,
            state: CoolingState::CoolingOff,
        }
    }

    pub fn state(&self) -> CoolingState {
        self.state
    }

    /// Run one transition. The `now` parameter keeps the signature
    /// uniform with the heating strategy; cooling has no timers.
    pub fn process(&mut self, cond: Conditions, _now: Instant) -> CoolingState {
        let can_operate = self.can_operate(cond);
        let temp_too_low = cond.indoor_c < self.config.cooling.thresholds.indoor_min;
        let temp_too_high = cond.indoor_c > self.config.cooling.thresholds.indoor_max;

        debug!(
            state = %self.state,
            can_operate,
            temp_too_low,
            temp_too_high,
            indoor_c = cond.indoor_c,
            outdoor_c = cond.outdoor_c,
            "cooling strategy evaluation"
        );

        self.state = match self.state {
            CoolingState::CoolingOff => {
                if can_operate && temp_too_high {
                    info!(
                        indoor_c = cond.indoor_c,
                        setpoint_c = self.config.cooling.setpoint_c,
                        "cooling on"
                    );
                    CoolingState::Cooling
                } else {
                    CoolingState::CoolingOff
                }
            }
            CoolingState::Cooling => {
                if !can_operate || temp_too_low {
                    info!(indoor_c = cond.indoor_c, "cooling off");
                    CoolingState::CoolingOff
                } else {
                    CoolingState::Cooling
                }
            }
        };

        self.state
    }

    fn can_operate(&self, cond: Conditions) -> bool {
        let thresholds = &self.config.cooling.thresholds;
        let weather_ok =
            thresholds.outdoor_min <= cond.outdoor_c && cond.outdoor_c <= thresholds.outdoor_max;
        weather_ok && self.config.is_active_at(cond.hour, cond.is_weekday)
    }
}
