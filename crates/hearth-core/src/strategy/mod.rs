//! Subordinate strategy machines for heating and cooling.
//!
//! Each strategy is an explicit transition function over
//! `(state, conditions) -> state`: it owns its current state plus any
//! timing bookkeeping (defrost timestamps), and the master machine maps
//! strategy results onto its own transitions.

mod cooling;
mod heating;

pub use cooling::{CoolingState, CoolingStrategy};
pub use heating::{HeatingState, HeatingStrategy};

use serde::Serialize;

/// One evaluation's worth of observed conditions.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Conditions {
    pub indoor_c: f64,
    pub outdoor_c: f64,
    /// Local hour, `0..=23`.
    pub hour: u8,
    pub is_weekday: bool,
}
