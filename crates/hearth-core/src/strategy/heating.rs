//! Heating strategy with defrost cycle management.
//!
//! Defrost is a compressor-protection lockout: while the outdoor unit is
//! cold enough to ice up, heating is periodically suspended for a fixed
//! duration. The strategy owns both defrost timestamps; they are process
//! local and reset on restart, so a fresh run treats the first defrost
//! opportunity as eligible.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::config::HvacConfig;
use crate::strategy::Conditions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum HeatingState {
    Off,
    Heating,
    Defrost,
}

pub struct HeatingStrategy {
    config: Arc<HvacConfig>,
    state: HeatingState,
    /// When the last defrost cycle ended. Set exactly when a cycle ends.
    defrost_last: Option<Instant>,
    /// When the in-progress defrost cycle started.
    defrost_started: Option<Instant>,
}

impl HeatingStrategy {
    pub fn new(config: Arc<HvacConfig>) -> Self {
        debug!(
            setpoint_c = config.heating.setpoint_c,
            defrost_enabled = config.heating.defrost.is_some(),
            "heating strategy initialized"
        );
        Self {
            config,
            state: HeatingState::Off,
            defrost_last: None,
            defrost_started: None,
        }
    }

    pub fn state(&self) -> HeatingState {
        self.state
    }

    pub fn defrost_last(&self) -> Option<Instant> {
        self.defrost_last
    }

    pub fn defrost_started(&self) -> Option<Instant> {
        self.defrost_started
    }

    /// Run one transition. The first matching rule fires; the returned
    /// state equals [`state()`](Self::state) afterwards.
    pub fn process(&mut self, cond: Conditions, now: Instant) -> HeatingState {
        let can_operate = self.can_operate(cond);
        let temp_too_low = cond.indoor_c < self.config.heating.thresholds.indoor_min;
        let temp_too_high = cond.indoor_c > self.config.heating.thresholds.indoor_max;
        let need_defrost = self.need_defrost(cond, now);

        debug!(
            state = %self.state,
            can_operate,
            temp_too_low,
            temp_too_high,
            need_defrost,
            indoor_c = cond.indoor_c,
            outdoor_c = cond.outdoor_c,
            "heating strategy evaluation"
        );

        self.state = match self.state {
            HeatingState::Off => {
                if can_operate && temp_too_low && need_defrost {
                    self.start_defrost(cond, now)
                } else if can_operate && temp_too_low {
                    info!(
                        indoor_c = cond.indoor_c,
                        setpoint_c = self.config.heating.setpoint_c,
                        "heating on"
                    );
                    HeatingState::Heating
                } else {
                    HeatingState::Off
                }
            }
            HeatingState::Heating => {
                if can_operate && need_defrost {
                    self.start_defrost(cond, now)
                } else if !can_operate || temp_too_high {
                    info!(indoor_c = cond.indoor_c, "heating off");
                    HeatingState::Off
                } else {
                    HeatingState::Heating
                }
            }
            HeatingState::Defrost => {
                if self.defrost_complete(now) {
                    info!("defrost cycle complete");
                    self.end_defrost(now)
                } else if !can_operate {
                    info!("defrost cycle aborted, conditions no longer operable");
                    self.end_defrost(now)
                } else {
                    HeatingState::Defrost
                }
            }
        };

        self.state
    }

    fn can_operate(&self, cond: Conditions) -> bool {
        let thresholds = &self.config.heating.thresholds;
        let weather_ok =
            thresholds.outdoor_min <= cond.outdoor_c && cond.outdoor_c <= thresholds.outdoor_max;
        weather_ok && self.config.is_active_at(cond.hour, cond.is_weekday)
    }

    /// A defrost cycle is due when the outdoor unit is at or below the
    /// threshold and the configured period has elapsed since the last
    /// cycle (or no cycle has run yet).
    fn need_defrost(&self, cond: Conditions, now: Instant) -> bool {
        let Some(defrost) = &self.config.heating.defrost else {
            return false;
        };
        if cond.outdoor_c > defrost.outdoor_threshold_c {
            return false;
        }
        match self.defrost_last {
            Some(last) => now.duration_since(last) >= defrost.period,
            None => true,
        }
    }

    fn defrost_complete(&self, now: Instant) -> bool {
        let Some(started) = self.defrost_started else {
            return false;
        };
        // No configuration means the cycle can never have been started
        // intentionally; treat it as already complete.
        let Some(defrost) = &self.config.heating.defrost else {
            return true;
        };
        now.duration_since(started) >= defrost.duration
    }

    fn start_defrost(&mut self, cond: Conditions, now: Instant) -> HeatingState {
        info!(outdoor_c = cond.outdoor_c, "starting defrost cycle");
        self.defrost_started = Some(now);
        HeatingState::Defrost
    }

    fn end_defrost(&mut self, now: Instant) -> HeatingState {
        self.defrost_last = Some(now);
        self.defrost_started = None;
        HeatingState::Off
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_fixtures::fixture_config;
    use std::time::Duration;

    fn strategy() -> HeatingStrategy {
        HeatingStrategy::new(Arc::new(fixture_config()))
    }

    fn cond(indoor_c: f64, outdoor_c: f64) -> Conditions {
        Conditions {
            indoor_c,
            outdoor_c,
            hour: 14,
            is_weekday: true,
        }
    }

    #[test]
    fn off_stays_off_at_exact_indoor_min() {
        // Strict `<`: the boundary itself does not engage heating.
        let mut s = strategy();
        assert_eq!(s.process(cond(19.7, 5.0), Instant::now()), HeatingState::Off);
    }

    #[test]
    fn off_starts_heating_below_indoor_min() {
        let mut s = strategy();
        assert_eq!(
            s.process(cond(18.0, 5.0), Instant::now()),
            HeatingState::Heating
        );
    }

    #[test]
    fn off_goes_straight_to_defrost_when_cold_and_due() {
        let mut s = strategy();
        let now = Instant::now();
        assert_eq!(s.process(cond(18.0, -5.0), now), HeatingState::Defrost);
        assert_eq!(s.defrost_started(), Some(now));
    }

    #[test]
    fn heating_enters_defrost_without_temp_check() {
        let mut s = strategy();
        let now = Instant::now();
        assert_eq!(s.process(cond(18.0, 5.0), now), HeatingState::Heating);
        // Indoor temp has recovered, but defrost preempts heating anyway.
        assert_eq!(s.process(cond(20.0, -5.0), now), HeatingState::Defrost);
    }

    #[test]
    fn heating_stops_above_indoor_max() {
        let mut s = strategy();
        let now = Instant::now();
        s.process(cond(18.0, 5.0), now);
        assert_eq!(s.process(cond(20.3, 5.0), now), HeatingState::Off);
    }

    #[test]
    fn heating_stops_outside_outdoor_range() {
        let mut s = strategy();
        let now = Instant::now();
        s.process(cond(18.0, 5.0), now);
        assert_eq!(s.process(cond(18.0, -15.0), now), HeatingState::Off);
    }

    #[test]
    fn heating_holds_between_thresholds() {
        let mut s = strategy();
        let now = Instant::now();
        s.process(cond(18.0, 5.0), now);
        // Hysteresis: inside the band, keep heating.
        assert_eq!(s.process(cond(20.0, 5.0), now), HeatingState::Heating);
    }

    #[test]
    fn outdoor_bounds_are_inclusive() {
        let mut s = strategy();
        let now = Instant::now();
        assert_eq!(s.process(cond(18.0, -10.0), now), HeatingState::Defrost);
        let mut s = strategy();
        assert_eq!(s.process(cond(18.0, 15.0), now), HeatingState::Heating);
    }

    #[test]
    fn defrost_ends_after_duration_and_records_completion() {
        let mut s = strategy();
        let start = Instant::now();
        s.process(cond(18.0, -5.0), start);

        let mid = start + Duration::from_secs(200);
        assert_eq!(s.process(cond(18.0, -5.0), mid), HeatingState::Defrost);

        let done = start + Duration::from_secs(301);
        assert_eq!(s.process(cond(18.0, -5.0), done), HeatingState::Off);
        assert_eq!(s.defrost_last(), Some(done));
        assert_eq!(s.defrost_started(), None);
    }

    #[test]
    fn defrost_aborts_when_conditions_become_inoperable() {
        let mut s = strategy();
        let start = Instant::now();
        s.process(cond(18.0, -5.0), start);

        let later = start + Duration::from_secs(10);
        assert_eq!(s.process(cond(18.0, -20.0), later), HeatingState::Off);
        // An aborted cycle still counts as ended.
        assert_eq!(s.defrost_last(), Some(later));
        assert_eq!(s.defrost_started(), None);
    }

    #[test]
    fn defrost_period_gates_the_next_cycle() {
        let mut s = strategy();
        let start = Instant::now();
        s.process(cond(18.0, -5.0), start);

        let done = start + Duration::from_secs(301);
        s.process(cond(18.0, -5.0), done);

        // Within the period: plain heating resumes instead of defrost.
        let soon = done + Duration::from_secs(600);
        assert_eq!(s.process(cond(18.0, -5.0), soon), HeatingState::Heating);

        // After the full period has elapsed since the last cycle ended.
        let eligible = done + Duration::from_secs(3600);
        assert_eq!(s.process(cond(18.0, -5.0), eligible), HeatingState::Defrost);
    }

    #[test]
    fn schedule_gates_operation() {
        let mut s = strategy();
        let outside = Conditions {
            indoor_c: 18.0,
            outdoor_c: 5.0,
            hour: 6,
            is_weekday: true,
        };
        assert_eq!(s.process(outside, Instant::now()), HeatingState::Off);

        // Hour 7 is active on weekends but not on weekdays.
        let weekend_morning = Conditions {
            indoor_c: 18.0,
            outdoor_c: 5.0,
            hour: 7,
            is_weekday: false,
        };
        assert_eq!(
            s.process(weekend_morning, Instant::now()),
            HeatingState::Heating
        );
    }
}
