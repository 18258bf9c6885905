#![allow(clippy::unwrap_used)]
// End-to-end controller tests against a scripted WebSocket hub and a
// wiremock REST API.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hearth_api::{HassClient, HubOptions};
use hearth_core::{
    ActiveHours, Clock, Controller, CoolingOptions, CoreError, DefrostOptions, HeatingOptions,
    HvacConfig, HvacEntity, HvacMode, MasterState, SystemClock, SystemMode,
    TemperatureThresholds,
};

const WAIT: Duration = Duration::from_secs(10);

// ── Fixtures ────────────────────────────────────────────────────────

/// A clock pinned to one instant, for driving the schedule gate.
struct FixedClock(DateTime<Local>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}

fn fixed_clock(year: i32, month: u32, day: u32, hour: u32) -> Arc<FixedClock> {
    let at = Local
        .with_ymd_and_hms(year, month, day, hour, 0, 0)
        .single()
        .expect("unambiguous local time");
    Arc::new(FixedClock(at))
}

fn schedule() -> ActiveHours {
    ActiveHours {
        start_weekday: 8,
        start_weekend: 7,
        end: 21,
    }
}

/// Heat-pump policy. Most tests pass no schedule so they are
/// independent of the wall-clock hour they run at; the schedule tests
/// pin the clock instead.
fn policy(active_hours: Option<ActiveHours>) -> HvacConfig {
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
            HvacEntity {
                entity_id: "climate.garage_ac".into(),
                enabled: false,
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
        active_hours,
        tick_interval: Duration::from_secs(300),
    }
}

fn sensor_body(entity_id: &str, state: &str) -> Value {
    json!({
        "entity_id": entity_id,
        "state": state,
        "attributes": { "unit_of_measurement": "°C" },
        "last_changed": "2026-03-01T10:15:00Z",
        "last_updated": "2026-03-01T10:15:00Z"
    })
}

async fn mount_sensor(server: &MockServer, entity_id: &str, state: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/api/states/{entity_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(sensor_body(entity_id, state)))
        .mount(server)
        .await;
}

fn state_event_frame(entity_id: &str, state: &str) -> Message {
    Message::Text(
        json!({
            "id": 1,
            "type": "event",
            "event": {
                "event_type": "state_changed",
                "data": {
                    "entity_id": entity_id,
                    "new_state": sensor_body(entity_id, state),
                    "old_state": null
                },
                "origin": "LOCAL",
                "time_fired": "2026-03-01T10:15:01Z"
            }
        })
        .to_string()
        .into(),
    )
}

// ── Scripted hub ────────────────────────────────────────────────────

type ServerWs = WebSocketStream<TcpStream>;

/// Accept connections forever; run the handshake on each, forward every
/// post-auth client frame into `frames_tx`, and write any injected
/// frame to the live connection.
async fn run_hub(
    listener: TcpListener,
    frames_tx: mpsc::UnboundedSender<Value>,
    mut inject_rx: mpsc::UnboundedReceiver<Message>,
) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            break;
        };
        let mut ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(_) => continue,
        };
        if handshake(&mut ws).await.is_err() {
            continue;
        }
        let (mut write, mut read) = ws.split();
        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let frame: Value = serde_json::from_str(&text).unwrap();
                        let _ = frames_tx.send(frame);
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                },
                injected = inject_rx.recv() => {
                    if let Some(msg) = injected {
                        if write.send(msg).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}

async fn handshake(ws: &mut ServerWs) -> Result<(), ()> {
    ws.send(Message::Text(
        json!({"type": "auth_required"}).to_string().into(),
    ))
    .await
    .map_err(|_| ())?;
    let _auth = ws.next().await.ok_or(())?.map_err(|_| ())?;
    ws.send(Message::Text(json!({"type": "auth_ok"}).to_string().into()))
        .await
        .map_err(|_| ())?;
    Ok(())
}

struct Harness {
    controller: Controller,
    frames_rx: mpsc::UnboundedReceiver<Value>,
    inject_tx: mpsc::UnboundedSender<Message>,
    _rest: MockServer,
}

async fn harness(config: HvacConfig, indoor: &str, outdoor: &str) -> Harness {
    harness_with_clock(config, indoor, outdoor, Arc::new(SystemClock)).await
}

async fn harness_with_clock(
    config: HvacConfig,
    indoor: &str,
    outdoor: &str,
    clock: Arc<dyn Clock>,
) -> Harness {
    let rest = MockServer::start().await;
    mount_sensor(&rest, &config.temp_sensor, indoor).await;
    mount_sensor(&rest, &config.outdoor_sensor, outdoor).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_addr = listener.local_addr().unwrap();
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (inject_tx, inject_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_hub(listener, frames_tx, inject_rx));

    let mut options = HubOptions::new(
        Url::parse(&format!("ws://{ws_addr}/api/websocket")).unwrap(),
        Url::parse(&rest.uri()).unwrap(),
        SecretString::from("test-token"),
    );
    options.max_initial_retries = 2;
    options.initial_retry_delay = Duration::from_millis(20);

    let client = HassClient::new(options).unwrap();
    let controller = Controller::new(client, config, clock);

    Harness {
        controller,
        frames_rx,
        inject_tx,
        _rest: rest,
    }
}

async fn next_frame(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

/// Pull the next `count` `call_service` frames (skipping anything else)
/// and return `(service, entity_id)` pairs.
async fn next_calls(
    rx: &mut mpsc::UnboundedReceiver<Value>,
    count: usize,
) -> Vec<(String, String)> {
    let mut calls = Vec::new();
    while calls.len() < count {
        let frame = next_frame(rx).await;
        if frame["type"] != "call_service" {
            continue;
        }
        calls.push((
            frame["service"].as_str().unwrap().to_string(),
            frame["service_data"]["entity_id"]
                .as_str()
                .unwrap()
                .to_string(),
        ));
    }
    calls
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_startup_evaluation_fans_out_to_enabled_entities() {
    let mut h = harness(policy(None), "18.0", "5.0").await;
    h.controller.start().await.unwrap();

    // First frame is the state_changed subscription.
    let subscribe = next_frame(&mut h.frames_rx).await;
    assert_eq!(subscribe["type"], "subscribe_events");
    assert_eq!(subscribe["event_type"], "state_changed");

    // Urgent heat: three calls per enabled entity, declaration order,
    // and nothing for the disabled garage entity.
    let calls = next_calls(&mut h.frames_rx, 6).await;
    assert_eq!(
        calls,
        vec![
            ("set_hvac_mode".to_string(), "climate.living_room_ac".to_string()),
            ("set_temperature".to_string(), "climate.living_room_ac".to_string()),
            ("set_preset_mode".to_string(), "climate.living_room_ac".to_string()),
            ("set_hvac_mode".to_string(), "climate.bedroom_ac".to_string()),
            ("set_temperature".to_string(), "climate.bedroom_ac".to_string()),
            ("set_preset_mode".to_string(), "climate.bedroom_ac".to_string()),
        ]
    );

    let status = h.controller.status().await;
    assert!(status.running);
    assert_eq!(status.state, MasterState::Heating);
    assert_eq!(status.hvac_mode, HvacMode::Heat);
    let conditions = status.conditions.expect("conditions recorded");
    assert_eq!(conditions.indoor_c, 18.0);
    assert_eq!(conditions.outdoor_c, 5.0);

    h.controller.stop().await;
    assert!(!h.controller.is_running());
}

#[tokio::test]
async fn test_sensor_event_drives_evaluation_when_rest_indoor_is_broken() {
    // Indoor REST state is non-numeric, so the startup evaluation fails
    // (logged, non-fatal) and only the event path can drive commands.
    let mut h = harness(policy(None), "unavailable", "30.0").await;
    h.controller.start().await.unwrap();

    let subscribe = next_frame(&mut h.frames_rx).await;
    assert_eq!(subscribe["type"], "subscribe_events");

    // Deliver an urgent-cool reading through the event stream.
    h.inject_tx
        .send(state_event_frame("sensor.indoor_temperature", "26.0"))
        .unwrap();

    let calls = next_calls(&mut h.frames_rx, 6).await;
    assert_eq!(calls[0].0, "set_hvac_mode");
    assert_eq!(calls[0].1, "climate.living_room_ac");
    assert_eq!(calls[3].1, "climate.bedroom_ac");

    let status = h.controller.status().await;
    assert_eq!(status.state, MasterState::Cooling);
    assert_eq!(status.hvac_mode, HvacMode::Cool);

    h.controller.stop().await;
}

#[tokio::test]
async fn test_events_for_other_entities_are_ignored() {
    let mut h = harness(policy(None), "20.0", "12.0").await;
    h.controller.start().await.unwrap();

    let _subscribe = next_frame(&mut h.frames_rx).await;
    // Startup evaluation: indoor 20.0 is inside both bands → off plan,
    // one call per enabled entity.
    let startup = next_calls(&mut h.frames_rx, 2).await;
    assert_eq!(startup[0].0, "set_hvac_mode");

    // A different sensor's change must not trigger an evaluation.
    h.inject_tx
        .send(state_event_frame("sensor.hallway_humidity", "55"))
        .unwrap();
    // Follow with a real indoor change; the next calls must belong to
    // it alone (urgent heat → set_temperature appears).
    h.inject_tx
        .send(state_event_frame("sensor.indoor_temperature", "18.0"))
        .unwrap();

    let calls = next_calls(&mut h.frames_rx, 6).await;
    assert_eq!(calls[1].0, "set_temperature");
    assert_eq!(calls[1].1, "climate.living_room_ac");

    h.controller.stop().await;
}

#[tokio::test]
async fn test_schedule_blocks_commands_before_weekday_start() {
    // Monday 2026-03-02 at 06:00: before the 08:00 weekday start.
    // Urgent-heat temperatures, but the schedule forces an off plan.
    let mut h = harness_with_clock(
        policy(Some(schedule())),
        "18.0",
        "5.0",
        fixed_clock(2026, 3, 2, 6),
    )
    .await;
    h.controller.start().await.unwrap();

    let _subscribe = next_frame(&mut h.frames_rx).await;
    let calls = next_calls(&mut h.frames_rx, 2).await;
    assert_eq!(
        calls,
        vec![
            ("set_hvac_mode".to_string(), "climate.living_room_ac".to_string()),
            ("set_hvac_mode".to_string(), "climate.bedroom_ac".to_string()),
        ]
    );

    let status = h.controller.status().await;
    assert_eq!(status.state, MasterState::Idle);
    assert_eq!(status.hvac_mode, HvacMode::Off);

    h.controller.stop().await;
}

#[tokio::test]
async fn test_schedule_admits_weekend_morning_start() {
    // Sunday 2026-03-01 at 07:00: the weekend start hour is inclusive,
    // so the same reading heats.
    let mut h = harness_with_clock(
        policy(Some(schedule())),
        "18.0",
        "5.0",
        fixed_clock(2026, 3, 1, 7),
    )
    .await;
    h.controller.start().await.unwrap();

    let _subscribe = next_frame(&mut h.frames_rx).await;
    let calls = next_calls(&mut h.frames_rx, 6).await;
    assert_eq!(calls[0].0, "set_hvac_mode");
    assert_eq!(calls[1].0, "set_temperature");

    let status = h.controller.status().await;
    assert_eq!(status.state, MasterState::Heating);
    assert_eq!(status.hvac_mode, HvacMode::Heat);

    h.controller.stop().await;
}

#[tokio::test]
async fn test_operations_require_running_controller() {
    let h = harness(policy(None), "18.0", "5.0").await;

    let result = h.controller.evaluate_now().await;
    assert!(matches!(result, Err(CoreError::NotRunning)));

    let result = h.controller.override_mode(HvacMode::Off).await;
    assert!(matches!(result, Err(CoreError::NotRunning)));
}

#[tokio::test]
async fn test_manual_override_commands_configured_setpoints() {
    let mut h = harness(policy(None), "20.0", "12.0").await;
    h.controller.start().await.unwrap();

    let _subscribe = next_frame(&mut h.frames_rx).await;
    let _startup = next_calls(&mut h.frames_rx, 2).await;

    h.controller.override_mode(HvacMode::Heat).await.unwrap();
    let calls = next_calls(&mut h.frames_rx, 6).await;
    assert_eq!(calls[0].0, "set_hvac_mode");
    assert_eq!(calls[1].0, "set_temperature");
    assert_eq!(calls[2].0, "set_preset_mode");

    h.controller.stop().await;
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let mut h = harness(policy(None), "20.0", "12.0").await;
    h.controller.start().await.unwrap();
    h.controller.start().await.unwrap();

    let _subscribe = next_frame(&mut h.frames_rx).await;
    let _startup = next_calls(&mut h.frames_rx, 2).await;

    h.controller.stop().await;
    h.controller.stop().await;
    assert!(!h.controller.is_running());
}
