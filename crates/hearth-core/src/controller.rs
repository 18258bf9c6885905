//! Event-driven controller loop.
//!
//! Wires the hub client to the decision engine: sensor events and a
//! periodic safety-net tick both feed the master machine, and every
//! decision fans out as climate service calls to the enabled entities.
//!
//! Evaluations are serialized through one `tokio::sync::Mutex` around
//! the machine, and a fan-out completes before the lock is released —
//! so evaluation N's commands are always issued before evaluation N+1
//! begins. Dispatch failures are logged per entity and never roll the
//! machine back; the next evaluation re-issues commands, giving
//! best-effort eventual consistency.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, Local, Timelike};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hearth_api::{HassClient, HassEvent};

use crate::command::{CommandPlan, HvacMode};
use crate::config::{HvacConfig, SystemMode};
use crate::error::CoreError;
use crate::machine::{HvacMachine, MasterState};
use crate::strategy::Conditions;

/// Substituted when the outdoor sensor cannot be read. Sits near the
/// auto-mode midpoint, biasing arbitration toward no-operation.
const NEUTRAL_OUTDOOR_C: f64 = 20.0;

/// Delay before retrying after a failed periodic evaluation.
const EVALUATION_RETRY_DELAY: Duration = Duration::from_secs(60);

// ── Wall clock ───────────────────────────────────────────────────────

/// Wall-clock source for schedule decisions, injected into the
/// controller so the active-hours gate can be driven deterministically.
/// Only the local hour and weekday are ever derived from it; every
/// other timestamp in the system is monotonic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

// ── Status snapshot ──────────────────────────────────────────────────

/// Point-in-time controller status for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub running: bool,
    pub hub_connected: bool,
    pub temp_sensor: String,
    pub outdoor_sensor: String,
    pub system_mode: SystemMode,
    pub state: MasterState,
    pub hvac_mode: HvacMode,
    pub conditions: Option<Conditions>,
    pub defrost: Option<DefrostStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DefrostStatus {
    pub active: bool,
    pub seconds_since_last_cycle: Option<u64>,
    pub seconds_in_current_cycle: Option<u64>,
}

// ── Controller ───────────────────────────────────────────────────────

/// Orchestrates the hub client, the master machine, and command fan-out.
///
/// Cheaply cloneable via `Arc`. [`start()`](Self::start) and
/// [`stop()`](Self::stop) are idempotent.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    client: HassClient,
    config: Arc<HvacConfig>,
    clock: Arc<dyn Clock>,

    /// The decision engine. The mutex serializes evaluations; fan-out
    /// happens while it is held.
    machine: Mutex<HvacMachine>,

    running: AtomicBool,

    /// Guards against duplicate handler registration across restarts.
    handler_registered: AtomicBool,

    /// Cancels the tick task; replaced on each start().
    cancel: Mutex<CancellationToken>,

    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    pub fn new(client: HassClient, config: HvacConfig, clock: Arc<dyn Clock>) -> Self {
        let config = Arc::new(config);
        info!(
            temp_sensor = %config.temp_sensor,
            system_mode = %config.system_mode,
            entity_count = config.entities.len(),
            "HVAC controller initialized"
        );
        Self {
            inner: Arc::new(ControllerInner {
                client,
                machine: Mutex::new(HvacMachine::new(Arc::clone(&config))),
                config,
                clock,
                running: AtomicBool::new(false),
                handler_registered: AtomicBool::new(false),
                cancel: Mutex::new(CancellationToken::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &HvacConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start the controller: connect, subscribe, spawn the periodic
    /// tick, and run one immediate evaluation. Idempotent.
    ///
    /// A partial failure tears everything back down before returning.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("controller already running");
            return Ok(());
        }

        info!("starting HVAC controller");
        if let Err(e) = self.start_inner().await {
            error!(error = %e, "failed to start controller");
            self.stop().await;
            return Err(e);
        }
        info!("HVAC controller started");
        Ok(())
    }

    async fn start_inner(&self) -> Result<(), CoreError> {
        self.inner.client.connect().await?;
        self.inner
            .client
            .subscribe_events(Some("state_changed"))
            .await?;

        if !self.inner.handler_registered.swap(true, Ordering::SeqCst) {
            let ctrl = self.clone();
            self.inner
                .client
                .on_event("state_changed", move |event| {
                    let ctrl = ctrl.clone();
                    async move { ctrl.handle_state_change(event).await }
                })
                .await;
        }

        let cancel = CancellationToken::new();
        *self.inner.cancel.lock().await = cancel.clone();

        let ctrl = self.clone();
        let interval = self.inner.config.tick_interval;
        self.inner
            .tasks
            .lock()
            .await
            .push(tokio::spawn(tick_task(ctrl, interval, cancel)));

        // Initial evaluation; failure here is worth a warning, not a
        // startup abort — the tick will retry.
        if let Err(e) = self.evaluate_from_rest().await {
            warn!(error = %e, "initial evaluation failed");
        }

        Ok(())
    }

    /// Stop the controller: cancel the tick task, then disconnect.
    /// Idempotent.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            debug!("controller already stopped");
            return;
        }

        info!("stopping HVAC controller");
        self.inner.cancel.lock().await.cancel();
        for handle in self.inner.tasks.lock().await.drain(..) {
            let _ = handle.await;
        }
        self.inner.client.disconnect().await;
        info!("HVAC controller stopped");
    }

    // ── Public operations ────────────────────────────────────────────

    /// Run one full evaluation outside the tick schedule.
    pub async fn evaluate_now(&self) -> Result<(), CoreError> {
        if !self.is_running() {
            return Err(CoreError::NotRunning);
        }
        info!("manual evaluation triggered");
        self.evaluate_from_rest().await
    }

    /// Manually command a mode on every enabled entity, bypassing the
    /// decision engine but using the configured setpoint and preset.
    pub async fn override_mode(&self, mode: HvacMode) -> Result<(), CoreError> {
        if !self.is_running() {
            return Err(CoreError::NotRunning);
        }
        info!(%mode, "manual override");
        let plan = CommandPlan::for_mode(mode, &self.inner.config);

        // Serialize with regular evaluations.
        let _guard = self.inner.machine.lock().await;
        self.dispatch_plan(&plan).await;
        Ok(())
    }

    /// Current controller and machine status.
    pub async fn status(&self) -> ControllerStatus {
        let machine = self.inner.machine.lock().await;
        let defrost = self.inner.config.heating.defrost.map(|_| {
            let heating = machine.heating();
            DefrostStatus {
                active: heating.defrost_started().is_some(),
                seconds_since_last_cycle: heating.defrost_last().map(|t| t.elapsed().as_secs()),
                seconds_in_current_cycle: heating.defrost_started().map(|t| t.elapsed().as_secs()),
            }
        });

        ControllerStatus {
            running: self.is_running(),
            hub_connected: self.inner.client.is_connected(),
            temp_sensor: self.inner.config.temp_sensor.clone(),
            outdoor_sensor: self.inner.config.outdoor_sensor.clone(),
            system_mode: self.inner.config.system_mode,
            state: machine.state(),
            hvac_mode: machine.hvac_mode(),
            conditions: machine.last_conditions(),
            defrost,
        }
    }

    // ── Sensor event path ────────────────────────────────────────────

    async fn handle_state_change(&self, event: HassEvent) {
        let Some(change) = event.state_change() else {
            return;
        };
        if change.entity_id != self.inner.config.temp_sensor {
            return;
        }
        let Some(new_state) = change.new_state else {
            warn!(entity_id = %change.entity_id, "state change without new state");
            return;
        };
        let Some(indoor_c) = new_state.numeric_state() else {
            warn!(
                entity_id = %change.entity_id,
                state = %new_state.state,
                "ignoring non-numeric sensor state"
            );
            return;
        };

        debug!(indoor_c, "indoor sensor update");
        let outdoor_c = self.fetch_outdoor().await;
        self.evaluate_and_dispatch(Some(indoor_c), Some(outdoor_c))
            .await;
    }

    // ── Periodic / on-demand path ────────────────────────────────────

    async fn evaluate_from_rest(&self) -> Result<(), CoreError> {
        let state = self
            .inner
            .client
            .get_state(&self.inner.config.temp_sensor)
            .await?;
        let indoor_c = state
            .numeric_state()
            .ok_or_else(|| CoreError::InvalidObservation {
                entity_id: self.inner.config.temp_sensor.clone(),
                value: state.state.clone(),
            })?;

        let outdoor_c = self.fetch_outdoor().await;
        self.evaluate_and_dispatch(Some(indoor_c), Some(outdoor_c))
            .await;
        Ok(())
    }

    /// Read the outdoor sensor, substituting a neutral value on failure
    /// so a dead weather sensor cannot pin the system in a
    /// non-operational state.
    async fn fetch_outdoor(&self) -> f64 {
        match self
            .inner
            .client
            .get_state(&self.inner.config.outdoor_sensor)
            .await
        {
            Ok(state) => state.numeric_state().unwrap_or_else(|| {
                warn!(
                    entity_id = %self.inner.config.outdoor_sensor,
                    state = %state.state,
                    "non-numeric outdoor reading, assuming neutral"
                );
                NEUTRAL_OUTDOOR_C
            }),
            Err(e) => {
                warn!(
                    entity_id = %self.inner.config.outdoor_sensor,
                    error = %e,
                    "outdoor sensor fetch failed, assuming neutral"
                );
                NEUTRAL_OUTDOOR_C
            }
        }
    }

    // ── Evaluation and fan-out ───────────────────────────────────────

    async fn evaluate_and_dispatch(&self, indoor_c: Option<f64>, outdoor_c: Option<f64>) {
        let (hour, is_weekday) = clock_fields(&self.inner.clock.now());
        let now = Instant::now();

        let mut machine = self.inner.machine.lock().await;
        let previous = machine.state();
        let Some(mode) = machine.evaluate(indoor_c, outdoor_c, hour, is_weekday, now) else {
            debug!("no decision, skipping dispatch");
            return;
        };
        let state = machine.state();

        info!(
            %previous,
            %state,
            %mode,
            changed = previous != state,
            "evaluation complete"
        );

        let plan = CommandPlan::for_mode(mode, &self.inner.config);
        // Fan-out while the machine lock is held: evaluation N's
        // commands complete before evaluation N+1 can begin.
        self.dispatch_plan(&plan).await;
    }

    /// Issue the plan to every enabled entity in declaration order. A
    /// failing entity is logged and skipped; the rest still receive
    /// their commands.
    async fn dispatch_plan(&self, plan: &CommandPlan) {
        let enabled: Vec<_> = self
            .inner
            .config
            .entities
            .iter()
            .filter(|e| e.enabled)
            .collect();
        if enabled.is_empty() {
            warn!("no enabled climate entities configured");
            return;
        }

        for entity in enabled {
            for call in plan.service_calls(&entity.entity_id) {
                if let Err(e) = self.inner.client.call_service(&call).await {
                    error!(
                        entity_id = %entity.entity_id,
                        service = %call.service,
                        error = %e,
                        "failed to command climate entity"
                    );
                    break;
                }
            }
            debug!(entity_id = %entity.entity_id, mode = %plan.mode(), "entity commanded");
        }
    }
}

// ── Periodic tick ────────────────────────────────────────────────────

/// Safety net against missed events: re-evaluate from REST on a fixed
/// interval, dropping to a short retry delay after a failure.
async fn tick_task(ctrl: Controller, interval: Duration, cancel: CancellationToken) {
    debug!(
        interval_secs = interval.as_secs(),
        "periodic evaluation task started"
    );
    let mut delay = interval;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
        // Cancellation also aborts an in-flight evaluation; its REST
        // errors are swallowed once shutdown has begun.
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = ctrl.evaluate_from_rest() => result,
        };
        delay = match result {
            Ok(()) => interval,
            Err(e) => {
                warn!(
                    error = %e,
                    retry_secs = EVALUATION_RETRY_DELAY.as_secs(),
                    "periodic evaluation failed"
                );
                EVALUATION_RETRY_DELAY
            }
        };
    }
    debug!("periodic evaluation task stopped");
}

/// Derive the schedule inputs from a wall-clock reading. This is the
/// only place a time zone matters.
fn clock_fields<Tz: chrono::TimeZone>(now: &chrono::DateTime<Tz>) -> (u8, bool) {
    let hour = now.hour() as u8;
    let is_weekday = now.weekday().number_from_monday() <= 5;
    (hour, is_weekday)
}
