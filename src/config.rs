use crate::domain::Domain;
use crate::ingest::{DomainSettings, IngestSettings, WindowSpec};
use crate::scheduler::SchedulerSettings;
use crate::time::CivilClock;
use anyhow::{bail, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_SETUP_CONFIG_PATH: &str = "/etc/shift-telemetry/config.json";
const DEFAULT_TIMEZONE: &str = "Asia/Kolkata";

fn setup_config_path() -> PathBuf {
    if let Some(path) = env_value("SHIFT_SETUP_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_SETUP_CONFIG_PATH)
}

/// Trimmed, non-empty environment value.
fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_value(key).and_then(|value| value.parse::<T>().ok())
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SetupConfigOverrides {
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    redis_url: Option<String>,
    #[serde(default)]
    mqtt_host: Option<String>,
    #[serde(default)]
    mqtt_port: Option<u16>,
    #[serde(default)]
    mqtt_username: Option<String>,
    #[serde(default)]
    mqtt_password: Option<String>,
    #[serde(default)]
    mqtt_topic_prefix: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
}

fn load_setup_config_overrides() -> Option<SetupConfigOverrides> {
    let path = setup_config_path();
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    let mut bytes = contents.into_bytes();
    match simd_json::serde::from_slice(&mut bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse setup config; using env defaults"
            );
            None
        }
    }
}

/// Only fills settings the environment left unset.
fn apply_setup_overrides(config: &mut Config, overrides: &SetupConfigOverrides) {
    let pick = |env_key: &str, value: &Option<String>| -> Option<String> {
        if env_value(env_key).is_some() {
            return None;
        }
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    if let Some(url) = pick("SHIFT_REDIS_URL", &overrides.redis_url) {
        config.redis_url = url;
    }
    if let Some(host) = pick("SHIFT_MQTT_HOST", &overrides.mqtt_host) {
        config.mqtt_host = host;
    }
    if env_value("SHIFT_MQTT_PORT").is_none() {
        if let Some(port) = overrides.mqtt_port.filter(|v| *v != 0) {
            config.mqtt_port = port;
        }
    }
    if let Some(username) = pick("SHIFT_MQTT_USERNAME", &overrides.mqtt_username) {
        config.mqtt_username = Some(username);
    }
    if let Some(password) = pick("SHIFT_MQTT_PASSWORD", &overrides.mqtt_password) {
        config.mqtt_password = Some(password);
    }
    if let Some(prefix) = pick("SHIFT_MQTT_TOPIC_PREFIX", &overrides.mqtt_topic_prefix) {
        config.mqtt_topic_prefix = prefix;
    }
    if let Some(tz) = pick("SHIFT_TIMEZONE", &overrides.timezone) {
        match CivilClock::parse(&tz) {
            Ok(clock) => config.clock = clock,
            Err(err) => tracing::warn!(error = %err, "ignoring setup config timezone"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateBackend {
    Redis,
    Memory,
}

impl FromStr for StateBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown state backend `{other}` (expected redis or memory)"),
        }
    }
}

/// Which halves of the service this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roles {
    pub ingest: bool,
    pub scheduler: bool,
}

impl FromStr for Roles {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let mut roles = Roles {
            ingest: false,
            scheduler: false,
        };
        for role in value.split(',').map(str::trim).filter(|r| !r.is_empty()) {
            match role.to_ascii_lowercase().as_str() {
                "ingest" => roles.ingest = true,
                "scheduler" => roles.scheduler = true,
                other => bail!("unknown role `{other}` (expected ingest and/or scheduler)"),
            }
        }
        if !roles.ingest && !roles.scheduler {
            bail!("at least one role is required");
        }
        Ok(roles)
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Only the scheduler role talks to Postgres.
    pub database_url: Option<String>,
    pub db_pool_size: u32,
    pub state_backend: StateBackend,
    pub redis_url: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic_prefix: String,
    pub mqtt_keepalive_secs: u64,
    pub mqtt_client_id: String,
    pub roles: Roles,
    pub scheduler_interval_secs: u64,
    pub clock: CivilClock,
    pub rolls_fallback_counts: f64,
    pub revolution_counter: DomainSettings,
    pub workforce: DomainSettings,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let setup_overrides = load_setup_config_overrides();

        let database_url = env_value("SHIFT_DATABASE_URL")
            .or_else(|| env_value("DATABASE_URL"))
            .or_else(|| {
                setup_overrides
                    .as_ref()
                    .and_then(|ov| ov.database_url.as_deref())
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
            });

        let state_backend = match env_value("SHIFT_STATE_BACKEND") {
            Some(value) => value.parse::<StateBackend>()?,
            None => StateBackend::Redis,
        };
        let roles = match env_value("SHIFT_ROLES") {
            Some(value) => value.parse::<Roles>()?,
            None => Roles {
                ingest: true,
                scheduler: true,
            },
        };
        let database_url = require_database_url(roles, database_url)?;
        let clock = CivilClock::parse(
            &env_value("SHIFT_TIMEZONE").unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
        )
        .map_err(anyhow::Error::msg)?;

        let rolls_fallback_counts = env_parse::<f64>("SHIFT_ROLLS_FALLBACK_COUNTS")
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(1000.0);

        let mut config = Self {
            database_url,
            db_pool_size: env_parse("SHIFT_DB_POOL_SIZE").unwrap_or(10),
            state_backend,
            redis_url: env_value("SHIFT_REDIS_URL")
                .unwrap_or_else(|| "redis://127.0.0.1:6379/".to_string()),
            mqtt_host: env_value("SHIFT_MQTT_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            mqtt_port: env_parse("SHIFT_MQTT_PORT").unwrap_or(1883),
            mqtt_username: env_value("SHIFT_MQTT_USERNAME"),
            mqtt_password: env_value("SHIFT_MQTT_PASSWORD"),
            mqtt_topic_prefix: env_value("SHIFT_MQTT_TOPIC_PREFIX")
                .unwrap_or_else(|| "floor".to_string()),
            mqtt_keepalive_secs: env_parse("SHIFT_MQTT_KEEPALIVE_SECS").unwrap_or(30),
            mqtt_client_id: env_value("SHIFT_MQTT_CLIENT_ID")
                .unwrap_or_else(|| format!("shift-telemetry-{}", std::process::id())),
            roles,
            scheduler_interval_secs: env_parse::<u64>("SHIFT_SCHEDULER_INTERVAL_SECS")
                .unwrap_or(60)
                .clamp(1, 60),
            clock,
            rolls_fallback_counts,
            revolution_counter: domain_settings_from_env(Domain::RevolutionCounter),
            workforce: domain_settings_from_env(Domain::Workforce),
            otlp_endpoint: env_value("OTEL_EXPORTER_OTLP_ENDPOINT"),
        };

        if let Some(overrides) = setup_overrides.as_ref() {
            apply_setup_overrides(&mut config, overrides);
        }

        Ok(config)
    }

    pub fn mqtt_keepalive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keepalive_secs)
    }

    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            revolution_counter: self.revolution_counter,
            workforce: self.workforce,
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            interval: Duration::from_secs(self.scheduler_interval_secs),
            rolls_fallback_counts: self.rolls_fallback_counts,
        }
    }
}

fn domain_env_prefix(domain: Domain) -> &'static str {
    match domain {
        Domain::RevolutionCounter => "SHIFT_REVOLUTION",
        Domain::Workforce => "SHIFT_WORKFORCE",
    }
}

fn domain_settings_from_env(domain: Domain) -> DomainSettings {
    let prefix = domain_env_prefix(domain);
    let default_window_minutes = match domain {
        Domain::RevolutionCounter => 1,
        Domain::Workforce => 0,
    };
    let window_minutes = env_parse::<u64>(&format!("{prefix}_TRAILING_WINDOW_MINUTES"))
        .unwrap_or(default_window_minutes);
    let sample_interval = env_parse::<u64>(&format!("{prefix}_SAMPLE_INTERVAL_SECONDS"))
        .filter(|v| *v > 0)
        .unwrap_or(5);
    let connection_timeout_seconds = match domain {
        Domain::RevolutionCounter => Some(
            env_parse::<u64>(&format!("{prefix}_CONNECTION_TIMEOUT_SECONDS")).unwrap_or(30),
        ),
        Domain::Workforce => env_parse::<u64>(&format!("{prefix}_CONNECTION_TIMEOUT_SECONDS")),
    };
    DomainSettings {
        window: WindowSpec::from_minutes(window_minutes, sample_interval),
        reading_list_max: env_parse(&format!("{prefix}_READING_LIST_MAX")).unwrap_or(0),
        connection_timeout_seconds,
    }
}

fn require_database_url(roles: Roles, database_url: Option<String>) -> Result<Option<String>> {
    if roles.scheduler && database_url.is_none() {
        bail!(
            "SHIFT_DATABASE_URL or DATABASE_URL is required for the scheduler role \
             (or present as database_url in the setup config)"
        );
    }
    Ok(database_url)
}
