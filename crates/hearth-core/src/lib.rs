//! Decision engine and controller loop for the hearth HVAC automation
//! daemon.
//!
//! This crate owns the policy logic between the hub client
//! (`hearth-api`) and the operator's configuration:
//!
//! - **[`HvacMachine`]** — the master state machine
//!   (Idle/Heating/Cooling/Defrost). Arbitrates between heating and
//!   cooling in auto mode and delegates hysteresis to two subordinate
//!   strategy machines.
//!
//! - **[`strategy`]** — the heating strategy (with defrost cycle
//!   timing) and the cooling strategy, each an explicit transition
//!   function over `(state, conditions)`.
//!
//! - **[`Controller`]** — the event-driven loop:
//!   [`start()`](Controller::start) connects the hub client, subscribes
//!   to `state_changed` events filtered on the indoor sensor, spawns a
//!   periodic safety-net tick, and fans every decision out to the
//!   enabled climate entities.
//!
//! - **[`CommandPlan`]** — one evaluation's output, expanded into
//!   `climate.set_hvac_mode` / `set_temperature` / `set_preset_mode`
//!   service calls per entity.
//!
//! - **Configuration types** ([`config`]) — plain, validated-elsewhere
//!   policy values shared read-only by every component.

pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod machine;
pub mod strategy;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{CommandPlan, HvacMode};
pub use config::{
    ActiveHours, CoolingOptions, DefrostOptions, HeatingOptions, HvacConfig, HvacEntity,
    SystemMode, TemperatureThresholds,
};
pub use controller::{Clock, Controller, ControllerStatus, DefrostStatus, SystemClock};
pub use error::CoreError;
pub use machine::{HvacMachine, MasterState};
pub use strategy::{Conditions, CoolingState, CoolingStrategy, HeatingState, HeatingStrategy};
