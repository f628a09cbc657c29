use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use camino::Utf8PathBuf;
use config::Config;
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;

use crate::core::config::FlowConfig;

#[derive(Clone, Deserialize, Debug)]
pub struct Settings {
    pub environment: String,
    pub application: ApplicationSettings,
    pub kafka: KafkaSettings,
    pub flow: FlowSettings,
}

#[derive(Clone, Deserialize, Debug)]
pub struct ApplicationSettings {
    pub id: String,
    pub logs_directory: String,
}

#[derive(Clone, Deserialize, Debug)]
pub struct KafkaSettings {
    pub bootstrap_servers: String,
    pub group_id: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub session_timeout_ms: u16,
    pub input_topic: String,
    pub state_topic: String,
}

/// Wire representation of `core::config::FlowConfig` — durations are
/// expressed in milliseconds so they round-trip cleanly through YAML/env.
#[derive(Clone, Deserialize, Debug)]
pub struct FlowSettings {
    pub commit_offsets_interval_ms: u64,
    pub trigger_timers_interval_ms: u64,
    pub persist_every_ms: u64,
    pub fire_every_ms: u64,
    pub additional_persist_cooldown_ms: u64,
    pub flush_on_revoke: bool,
    pub ignore_persist_errors: bool,
}

impl From<&FlowSettings> for FlowConfig {
    fn from(settings: &FlowSettings) -> Self {
        FlowConfig {
            commit_offsets_interval: Duration::from_millis(settings.commit_offsets_interval_ms),
            trigger_timers_interval: Duration::from_millis(settings.trigger_timers_interval_ms),
            persist_every: Duration::from_millis(settings.persist_every_ms),
            fire_every: Duration::from_millis(settings.fire_every_ms),
            additional_persist_cooldown: Duration::from_millis(settings.additional_persist_cooldown_ms),
            flush_on_revoke: settings.flush_on_revoke,
            ignore_persist_errors: settings.ignore_persist_errors,
        }
    }
}

fn find_config_dir() -> anyhow::Result<PathBuf> {
    let current_dir = std::env::current_dir().context("Failed to determine the current directory.")?;
    let current_dir =
        Utf8PathBuf::try_from(current_dir).context("Could not convert PathBuf to Utf8PathBuf")?;

    current_dir
        .ancestors()
        .map(|p| p.join("config"))
        .find(|p| {
            let base_path = p.join("base.yaml");
            p.exists() && p.is_dir() && base_path.exists() && base_path.is_file()
        })
        .map(|p| p.canonicalize().unwrap())
        .ok_or_else(|| anyhow::anyhow!("Cannot find config directory!"))
}

/// Loads layered configuration: `config/base.yaml`, an environment-specific
/// overlay (`config/development.yaml` by default), then `APP__`-prefixed
/// environment variable overrides, e.g. `APP_KAFKA__BOOTSTRAP_SERVERS`.
pub fn get_config_settings() -> anyhow::Result<Settings> {
    let config_directory = find_config_dir()?;

    let environment: String = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "development".to_owned());

    let base_source = config::File::from(config_directory.join("base")).required(true);
    let env_source = config::File::from(config_directory.join(environment.as_str())).required(false);
    let overrides_source = config::Environment::with_prefix("app").separator("__");

    let config = Config::builder()
        .add_source(base_source)
        .add_source(env_source)
        .add_source(overrides_source)
        .build()?;

    config.try_deserialize().context("Could not deserialise config settings.")
}
