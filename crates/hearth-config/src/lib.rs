//! Configuration for the hearth daemon.
//!
//! TOML file + `HEARTH_`-prefixed environment overrides (nested keys
//! separated by `__`), validated the way the hub expects, then
//! translated into `hearth_api::HubOptions` and
//! `hearth_core::HvacConfig`.
//!
//! A note on the schedule fields: earlier revisions of this system had
//! a `start`/`start_weekday` pair whose names did not match how they
//! were used. The file format here names them `start_weekday` and
//! `start_weekend` with exactly those semantics — weekday mornings use
//! `start_weekday`, weekend mornings use `start_weekend`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use hearth_api::HubOptions;
use hearth_core::{
    ActiveHours, CoolingOptions, DefrostOptions, HeatingOptions, HvacConfig, HvacEntity,
    SystemMode, TemperatureThresholds,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no hub token configured (set hub.token, hub.token_env, or HEARTH_HUB__TOKEN)")]
    NoToken,

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── Raw file structs ────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub app: AppSettings,
    pub hub: HubSettings,
    pub hvac: HvacSettings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Default tracing filter when RUST_LOG is unset.
    pub log_level: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HubSettings {
    /// WebSocket endpoint, e.g. `ws://hub.local:8123/api/websocket`.
    pub ws_url: String,

    /// REST base URL, e.g. `http://hub.local:8123`.
    pub rest_url: String,

    /// Bearer token in plaintext (prefer `token_env` or `HEARTH_HUB__TOKEN`).
    pub token: Option<String>,

    /// Name of an environment variable holding the bearer token.
    pub token_env: Option<String>,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    5
}
fn default_retry_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize)]
pub struct ThresholdSettings {
    pub indoor_min: f64,
    pub indoor_max: f64,
    pub outdoor_min: f64,
    pub outdoor_max: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DefrostSettings {
    pub temperature_threshold: f64,
    pub period_seconds: u64,
    pub duration_seconds: u64,
}

impl Default for DefrostSettings {
    fn default() -> Self {
        Self {
            temperature_threshold: 0.0,
            period_seconds: 3600,
            duration_seconds: 300,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HeatingSettings {
    #[serde(default = "default_heating_temperature")]
    pub temperature: f64,

    #[serde(default = "default_heating_preset")]
    pub preset_mode: String,

    pub temperature_thresholds: ThresholdSettings,

    pub defrost: Option<DefrostSettings>,
}

fn default_heating_temperature() -> f64 {
    21.0
}
fn default_heating_preset() -> String {
    "comfort".into()
}

#[derive(Debug, Deserialize)]
pub struct CoolingSettings {
    #[serde(default = "default_cooling_temperature")]
    pub temperature: f64,

    #[serde(default = "default_cooling_preset")]
    pub preset_mode: String,

    pub temperature_thresholds: ThresholdSettings,
}

fn default_cooling_temperature() -> f64 {
    24.0
}
fn default_cooling_preset() -> String {
    "eco".into()
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ActiveHoursSettings {
    pub start_weekday: u8,
    pub start_weekend: u8,
    pub end: u8,
}

impl Default for ActiveHoursSettings {
    fn default() -> Self {
        Self {
            start_weekday: 8,
            start_weekend: 7,
            end: 22,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EntitySettings {
    pub entity_id: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub defrost: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct HvacSettings {
    pub temp_sensor: String,

    #[serde(default = "default_outdoor_sensor")]
    pub outdoor_sensor: String,

    #[serde(default = "default_system_mode")]
    pub system_mode: String,

    #[serde(default)]
    pub entities: Vec<EntitySettings>,

    pub heating: HeatingSettings,
    pub cooling: CoolingSettings,

    pub active_hours: Option<ActiveHoursSettings>,

    /// Periodic evaluation interval in milliseconds.
    #[serde(default = "default_state_check_interval_ms")]
    pub state_check_interval_ms: u64,
}

fn default_outdoor_sensor() -> String {
    "sensor.openweathermap_temperature".into()
}
fn default_system_mode() -> String {
    "auto".into()
}
fn default_state_check_interval_ms() -> u64 {
    300_000
}

// ── Config file discovery ───────────────────────────────────────────

/// Platform config path, e.g. `~/.config/hearth/config.toml` on Linux.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "hearth", "hearth").map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".config").join("hearth")
}

/// Resolve the config file: an explicit path wins, then the
/// `HEARTH_CONFIG_FILE` variable, then the first existing conventional
/// location, falling back to the platform path.
pub fn find_config_file(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(from_env) = std::env::var("HEARTH_CONFIG_FILE") {
        let path = PathBuf::from(from_env);
        if path.exists() {
            return path;
        }
    }

    let candidates = [
        PathBuf::from("hearth.toml"),
        config_path(),
        PathBuf::from("/etc/hearth/config.toml"),
    ];
    for candidate in &candidates {
        if candidate.exists() {
            return candidate.clone();
        }
    }
    config_path()
}

// ── Loading ─────────────────────────────────────────────────────────

/// Load settings from a TOML file plus `HEARTH_`-prefixed environment
/// overrides (`HEARTH_HUB__WS_URL`, `HEARTH_HVAC__SYSTEM_MODE`, ...).
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    if !path.exists() {
        return Err(invalid(
            "config file",
            format!("not found: {}", path.display()),
        ));
    }

    let figment = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("HEARTH_").split("__"));

    let settings: Settings = figment.extract()?;
    Ok(settings)
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the hub bearer token: the variable named by `token_env`,
/// then `HEARTH_TOKEN`, then the plaintext `token` field.
pub fn resolve_token(hub: &HubSettings) -> Result<SecretString, ConfigError> {
    resolve_token_with(hub, |name| std::env::var(name).ok())
}

fn resolve_token_with(
    hub: &HubSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<SecretString, ConfigError> {
    if let Some(ref env_name) = hub.token_env {
        if let Some(value) = lookup(env_name) {
            return Ok(SecretString::from(value));
        }
    }
    if let Some(value) = lookup("HEARTH_TOKEN") {
        return Ok(SecretString::from(value));
    }
    if let Some(ref token) = hub.token {
        return Ok(SecretString::from(token.clone()));
    }
    Err(ConfigError::NoToken)
}

// ── Validation and conversion ───────────────────────────────────────

/// Build `HubOptions` from the `[hub]` section.
pub fn hub_options(settings: &Settings) -> Result<HubOptions, ConfigError> {
    let hub = &settings.hub;

    let ws_url: Url = hub
        .ws_url
        .parse()
        .map_err(|_| invalid("hub.ws_url", format!("invalid URL: {}", hub.ws_url)))?;
    if !matches!(ws_url.scheme(), "ws" | "wss") {
        return Err(invalid("hub.ws_url", "scheme must be ws:// or wss://"));
    }

    let rest_url: Url = hub
        .rest_url
        .parse()
        .map_err(|_| invalid("hub.rest_url", format!("invalid URL: {}", hub.rest_url)))?;
    if !matches!(rest_url.scheme(), "http" | "https") {
        return Err(invalid("hub.rest_url", "scheme must be http:// or https://"));
    }

    let token = resolve_token(hub)?;

    let mut options = HubOptions::new(ws_url, rest_url, token);
    options.max_initial_retries = hub.max_retries;
    options.initial_retry_delay = Duration::from_millis(hub.retry_delay_ms);
    Ok(options)
}

/// Build the validated `HvacConfig` from the `[hvac]` section.
pub fn hvac_config(settings: &Settings) -> Result<HvacConfig, ConfigError> {
    let hvac = &settings.hvac;

    validate_sensor("hvac.temp_sensor", &hvac.temp_sensor)?;
    validate_sensor("hvac.outdoor_sensor", &hvac.outdoor_sensor)?;

    let system_mode = match hvac.system_mode.as_str() {
        "auto" => SystemMode::Auto,
        "heat_only" => SystemMode::HeatOnly,
        "cool_only" => SystemMode::CoolOnly,
        "off" => SystemMode::Off,
        other => {
            return Err(invalid(
                "hvac.system_mode",
                format!("expected 'auto', 'heat_only', 'cool_only', or 'off', got '{other}'"),
            ));
        }
    };

    let entities = hvac
        .entities
        .iter()
        .map(|entity| {
            validate_entity_id("hvac.entities.entity_id", &entity.entity_id)?;
            Ok(HvacEntity {
                entity_id: entity.entity_id.clone(),
                enabled: entity.enabled,
                defrost_capable: entity.defrost,
            })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    validate_range("hvac.heating.temperature", hvac.heating.temperature, 10.0, 35.0)?;
    validate_range("hvac.cooling.temperature", hvac.cooling.temperature, 15.0, 35.0)?;

    let heating = HeatingOptions {
        setpoint_c: hvac.heating.temperature,
        preset_mode: hvac.heating.preset_mode.clone(),
        thresholds: thresholds("hvac.heating", &hvac.heating.temperature_thresholds)?,
        defrost: hvac.heating.defrost.as_ref().map(|d| DefrostOptions {
            outdoor_threshold_c: d.temperature_threshold,
            period: Duration::from_secs(d.period_seconds),
            duration: Duration::from_secs(d.duration_seconds),
        }),
    };

    let cooling = CoolingOptions {
        setpoint_c: hvac.cooling.temperature,
        preset_mode: hvac.cooling.preset_mode.clone(),
        thresholds: thresholds("hvac.cooling", &hvac.cooling.temperature_thresholds)?,
    };

    let active_hours = hvac
        .active_hours
        .as_ref()
        .map(|hours| {
            validate_hour("hvac.active_hours.start_weekday", hours.start_weekday)?;
            validate_hour("hvac.active_hours.start_weekend", hours.start_weekend)?;
            validate_hour("hvac.active_hours.end", hours.end)?;
            // The window may not span midnight.
            if hours.start_weekday > hours.end || hours.start_weekend > hours.end {
                return Err(invalid(
                    "hvac.active_hours",
                    "start hours must not be later than end",
                ));
            }
            Ok(ActiveHours {
                start_weekday: hours.start_weekday,
                start_weekend: hours.start_weekend,
                end: hours.end,
            })
        })
        .transpose()?;

    Ok(HvacConfig {
        temp_sensor: hvac.temp_sensor.clone(),
        outdoor_sensor: hvac.outdoor_sensor.clone(),
        system_mode,
        entities,
        heating,
        cooling,
        active_hours,
        tick_interval: Duration::from_millis(hvac.state_check_interval_ms),
    })
}

/// Validate the full settings without building anything the caller
/// keeps. Used by the `validate` CLI mode.
pub fn validate(settings: &Settings) -> Result<(), ConfigError> {
    hub_options(settings)?;
    hvac_config(settings)?;
    Ok(())
}

fn thresholds(
    section: &str,
    raw: &ThresholdSettings,
) -> Result<TemperatureThresholds, ConfigError> {
    for (name, value) in [
        ("indoor_min", raw.indoor_min),
        ("indoor_max", raw.indoor_max),
        ("outdoor_min", raw.outdoor_min),
        ("outdoor_max", raw.outdoor_max),
    ] {
        validate_range(
            &format!("{section}.temperature_thresholds.{name}"),
            value,
            -50.0,
            60.0,
        )?;
    }
    if raw.indoor_min >= raw.indoor_max {
        return Err(invalid(
            &format!("{section}.temperature_thresholds"),
            "indoor_min must be below indoor_max",
        ));
    }
    if raw.outdoor_min > raw.outdoor_max {
        return Err(invalid(
            &format!("{section}.temperature_thresholds"),
            "outdoor_min must not exceed outdoor_max",
        ));
    }
    Ok(TemperatureThresholds {
        indoor_min: raw.indoor_min,
        indoor_max: raw.indoor_max,
        outdoor_min: raw.outdoor_min,
        outdoor_max: raw.outdoor_max,
    })
}

fn validate_range(field: &str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(invalid(
            field,
            format!("{value} outside allowed range {min}..={max} °C"),
        ));
    }
    Ok(())
}

fn validate_hour(field: &str, hour: u8) -> Result<(), ConfigError> {
    if hour > 23 {
        return Err(invalid(field, format!("{hour} is not an hour (0..=23)")));
    }
    Ok(())
}

fn validate_entity_id(field: &str, entity_id: &str) -> Result<(), ConfigError> {
    let mut parts = entity_id.split('.');
    let valid = matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(domain), Some(name), None) if !domain.is_empty() && !name.is_empty()
    );
    if !valid {
        return Err(invalid(
            field,
            format!("'{entity_id}' must be shaped 'domain.name'"),
        ));
    }
    Ok(())
}

fn validate_sensor(field: &str, entity_id: &str) -> Result<(), ConfigError> {
    validate_entity_id(field, entity_id)?;
    if !entity_id.starts_with("sensor.") {
        return Err(invalid(
            field,
            format!("'{entity_id}' must be a sensor.* entity"),
        ));
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID_CONFIG: &str = r#"
        [hub]
        ws_url = "ws://hub.local:8123/api/websocket"
        rest_url = "http://hub.local:8123"
        token = "long-lived-token"

        [hvac]
        temp_sensor = "sensor.indoor_temperature"
        outdoor_sensor = "sensor.outdoor_temperature"
        system_mode = "auto"

        [[hvac.entities]]
        entity_id = "climate.living_room_ac"
        defrost = true

        [[hvac.entities]]
        entity_id = "climate.bedroom_ac"
        enabled = false

        [hvac.heating]
        temperature = 21.0
        preset_mode = "comfort"

        [hvac.heating.temperature_thresholds]
        indoor_min = 19.7
        indoor_max = 20.2
        outdoor_min = -10.0
        outdoor_max = 15.0

        [hvac.heating.defrost]
        temperature_threshold = 0.0
        period_seconds = 3600
        duration_seconds = 300

        [hvac.cooling]
        temperature = 24.0
        preset_mode = "windFree"

        [hvac.cooling.temperature_thresholds]
        indoor_min = 23.5
        indoor_max = 25.0
        outdoor_min = 10.0
        outdoor_max = 45.0

        [hvac.active_hours]
        start_weekday = 8
        start_weekend = 7
        end = 21
    "#;

    fn load(toml_text: &str) -> Result<Settings, ConfigError> {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").expect("temp file");
        file.write_all(toml_text.as_bytes()).expect("write config");
        load_settings(file.path())
    }

    #[test]
    fn loads_and_converts_a_full_config() {
        let settings = load(VALID_CONFIG).expect("valid config");
        let config = hvac_config(&settings).expect("valid hvac section");

        assert_eq!(config.temp_sensor, "sensor.indoor_temperature");
        assert_eq!(config.system_mode, SystemMode::Auto);
        assert_eq!(config.entities.len(), 2);
        assert!(config.entities[0].defrost_capable);
        assert!(!config.entities[1].enabled);
        assert_eq!(config.heating.setpoint_c, 21.0);
        let defrost = config.heating.defrost.expect("defrost configured");
        assert_eq!(defrost.period, Duration::from_secs(3600));
        let hours = config.active_hours.expect("schedule configured");
        assert_eq!(hours.start_weekday, 8);
        assert_eq!(hours.start_weekend, 7);
        assert_eq!(config.tick_interval, Duration::from_secs(300));

        let options = hub_options(&settings).expect("valid hub section");
        assert_eq!(options.max_initial_retries, 5);
        assert_eq!(options.initial_retry_delay, Duration::from_secs(1));
    }

    #[test]
    fn missing_file_is_a_validation_error() {
        let result = load_settings(Path::new("/nonexistent/hearth.toml"));
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn rejects_bad_system_mode() {
        let settings = load(&VALID_CONFIG.replace("\"auto\"", "\"turbo\"")).expect("loads");
        let result = hvac_config(&settings);
        assert!(matches!(
            result,
            Err(ConfigError::Validation { ref field, .. }) if field == "hvac.system_mode"
        ));
    }

    #[test]
    fn rejects_non_sensor_temp_source() {
        let settings = load(
            &VALID_CONFIG.replace("sensor.indoor_temperature", "climate.indoor_temperature"),
        )
        .expect("loads");
        assert!(hvac_config(&settings).is_err());
    }

    #[test]
    fn rejects_inverted_indoor_band() {
        let settings =
            load(&VALID_CONFIG.replace("indoor_min = 19.7", "indoor_min = 20.7")).expect("loads");
        assert!(hvac_config(&settings).is_err());
    }

    #[test]
    fn rejects_schedule_spanning_midnight() {
        let settings =
            load(&VALID_CONFIG.replace("end = 21", "end = 5")).expect("loads");
        assert!(matches!(
            hvac_config(&settings),
            Err(ConfigError::Validation { ref field, .. }) if field == "hvac.active_hours"
        ));
    }

    #[test]
    fn rejects_heating_setpoint_out_of_range() {
        let settings =
            load(&VALID_CONFIG.replace("temperature = 21.0", "temperature = 40.0")).expect("loads");
        assert!(hvac_config(&settings).is_err());
    }

    #[test]
    fn rejects_ws_url_with_http_scheme() {
        let settings = load(&VALID_CONFIG.replace(
            "ws://hub.local:8123/api/websocket",
            "http://hub.local:8123/api/websocket",
        ))
        .expect("loads");
        let result = hub_options(&settings);
        assert!(matches!(
            result,
            Err(ConfigError::Validation { ref field, .. }) if field == "hub.ws_url"
        ));
    }

    #[test]
    fn token_resolution_prefers_named_env_var() {
        use secrecy::ExposeSecret;

        let hub = HubSettings {
            ws_url: "ws://hub.local/api/websocket".into(),
            rest_url: "http://hub.local".into(),
            token: Some("from-file".into()),
            token_env: Some("MY_HUB_TOKEN".into()),
            max_retries: 5,
            retry_delay_ms: 1000,
        };

        let token = resolve_token_with(&hub, |name| {
            (name == "MY_HUB_TOKEN").then(|| "from-env".to_string())
        })
        .expect("resolves");
        assert_eq!(token.expose_secret(), "from-env");

        // Without the env var, the plaintext field is the fallback.
        let token = resolve_token_with(&hub, |_| None).expect("resolves");
        assert_eq!(token.expose_secret(), "from-file");
    }

    #[test]
    fn missing_token_everywhere_is_an_error() {
        let hub = HubSettings {
            ws_url: "ws://hub.local/api/websocket".into(),
            rest_url: "http://hub.local".into(),
            token: None,
            token_env: None,
            max_retries: 5,
            retry_delay_ms: 1000,
        };
        let result = resolve_token_with(&hub, |_| None);
        assert!(matches!(result, Err(ConfigError::NoToken)));
    }

    #[test]
    fn validate_covers_both_sections() {
        let settings = load(VALID_CONFIG).expect("valid config");
        validate(&settings).expect("config validates");
    }
}
