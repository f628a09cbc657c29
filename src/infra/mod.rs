mod cli;
mod config;
mod tracing;

pub use cli::Cli;
pub use config::{ApplicationSettings, FlowSettings, KafkaSettings, Settings, get_config_settings};
pub use tracing::configure_tracing;
