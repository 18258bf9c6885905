//! Master HVAC state machine.
//!
//! Holds no hysteresis of its own: each evaluation arbitrates a target
//! (in auto mode), delegates to the matching strategy machine, and maps
//! the strategy result onto its own Idle/Heating/Cooling/Defrost state.
//! At most one of heating/cooling is non-idle at any instant, and the
//! `Defrost` state always maps to an `off` command — defrost is never
//! surfaced to the hub as a mode.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::command::HvacMode;
use crate::config::{HvacConfig, SystemMode};
use crate::strategy::{Conditions, CoolingState, CoolingStrategy, HeatingState, HeatingStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum MasterState {
    Idle,
    Heating,
    Cooling,
    Defrost,
}

/// Resolved evaluation target after auto-mode arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Heat,
    Cool,
    Off,
}

pub struct HvacMachine {
    config: Arc<HvacConfig>,
    state: MasterState,
    heating: HeatingStrategy,
    cooling: CoolingStrategy,
    last_conditions: Option<Conditions>,
}

impl HvacMachine {
    pub fn new(config: Arc<HvacConfig>) -> Self {
        info!(
            system_mode = %config.system_mode,
            "HVAC state machine initialized"
        );
        Self {
            heating: HeatingStrategy::new(Arc::clone(&config)),
            cooling: CoolingStrategy::new(Arc::clone(&config)),
            config,
            state: MasterState::Idle,
            last_conditions: None,
        }
    }

    pub fn state(&self) -> MasterState {
        self.state
    }

    /// The hub-visible mode for the current state. `Defrost` reports
    /// `off`: it is an internal lockout, not a hub mode.
    pub fn hvac_mode(&self) -> HvacMode {
        match self.state {
            MasterState::Heating => HvacMode::Heat,
            MasterState::Cooling => HvacMode::Cool,
            MasterState::Idle | MasterState::Defrost => HvacMode::Off,
        }
    }

    pub fn last_conditions(&self) -> Option<Conditions> {
        self.last_conditions
    }

    pub fn heating(&self) -> &HeatingStrategy {
        &self.heating
    }

    /// Run one evaluation step.
    ///
    /// Returns `None` without transitioning when either temperature is
    /// missing. Outside active hours the machine stops whatever is
    /// running and reports `off`.
    pub fn evaluate(
        &mut self,
        indoor_c: Option<f64>,
        outdoor_c: Option<f64>,
        hour: u8,
        is_weekday: bool,
        now: Instant,
    ) -> Option<HvacMode> {
        let (Some(indoor_c), Some(outdoor_c)) = (indoor_c, outdoor_c) else {
            warn!("cannot evaluate: missing temperature data");
            return None;
        };
        let cond = Conditions {
            indoor_c,
            outdoor_c,
            hour,
            is_weekday,
        };
        self.last_conditions = Some(cond);

        if !self.config.is_active_at(hour, is_weekday) {
            if self.state == MasterState::Idle {
                debug!(hour, "outside active hours, staying idle");
            } else {
                info!(hour, state = %self.state, "outside active hours, stopping");
                self.transition_to_idle();
            }
            return Some(HvacMode::Off);
        }

        let target = self.arbitrate(cond);
        debug!(?target, state = %self.state, "target mode determined");

        let mode = match target {
            Target::Heat => match self.heating.process(cond, now) {
                HeatingState::Heating => {
                    self.transition_to(MasterState::Heating);
                    HvacMode::Heat
                }
                HeatingState::Defrost => {
                    self.transition_to(MasterState::Defrost);
                    HvacMode::Off
                }
                HeatingState::Off => {
                    self.transition_to_idle();
                    HvacMode::Off
                }
            },
            Target::Cool => match self.cooling.process(cond, now) {
                CoolingState::Cooling => {
                    self.transition_to(MasterState::Cooling);
                    HvacMode::Cool
                }
                CoolingState::CoolingOff => {
                    self.transition_to_idle();
                    HvacMode::Off
                }
            },
            Target::Off => {
                self.transition_to_idle();
                HvacMode::Off
            }
        };

        debug!(
            state = %self.state,
            mode = %mode,
            indoor_c = cond.indoor_c,
            outdoor_c = cond.outdoor_c,
            "evaluation complete"
        );
        Some(mode)
    }

    /// Pick the evaluation target. Manual modes pass through; auto mode
    /// prioritizes hard indoor violations, then chooses by which
    /// equipment the outdoor temperature allows to run.
    fn arbitrate(&self, cond: Conditions) -> Target {
        match self.config.system_mode {
            SystemMode::HeatOnly => return Target::Heat,
            SystemMode::CoolOnly => return Target::Cool,
            SystemMode::Off => return Target::Off,
            SystemMode::Auto => {}
        }

        let ht = &self.config.heating.thresholds;
        let ct = &self.config.cooling.thresholds;
        let heat_ok = ht.outdoor_min <= cond.outdoor_c && cond.outdoor_c <= ht.outdoor_max;
        let cool_ok = ct.outdoor_min <= cond.outdoor_c && cond.outdoor_c <= ct.outdoor_max;

        if cond.indoor_c < ht.indoor_min && heat_ok {
            debug!(indoor_c = cond.indoor_c, "urgent heating");
            return Target::Heat;
        }
        if cond.indoor_c > ct.indoor_max && cool_ok {
            debug!(indoor_c = cond.indoor_c, "urgent cooling");
            return Target::Cool;
        }

        match (heat_ok, cool_ok) {
            (true, true) => {
                // Both could run; split by the gap between the heating
                // ceiling and the cooling floor.
                let midpoint = (ht.outdoor_max + ct.outdoor_min) / 2.0;
                if cond.outdoor_c <= midpoint {
                    Target::Heat
                } else {
                    Target::Cool
                }
            }
            (true, false) => Target::Heat,
            (false, true) => Target::Cool,
            (false, false) => Target::Off,
        }
    }

    fn transition_to(&mut self, next: MasterState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "master transition");
            self.state = next;
        }
    }

    /// Stop whatever is running: Heating stops heating, Cooling stops
    /// cooling, Defrost ends the lockout, Idle is a no-op.
    fn transition_to_idle(&mut self) {
        self.transition_to(MasterState::Idle);
    }
}
