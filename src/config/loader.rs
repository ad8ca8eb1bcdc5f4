use config::{Config, Environment, File, FileFormat};
use std::path::Path;
use tracing::{debug, info};

use super::settings::AppConfig;
use crate::error::BotError;

pub const ENV_PREFIX: &str = "AUTOTRADER";

/// Build the effective configuration: defaults, then an optional TOML file,
/// then `AUTOTRADER__SECTION__KEY` environment overrides.
pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if let Ok(env_file) = dotenvy::dotenv() {
        debug!("Loaded environment from {}", env_file.display());
    }

    // unset keys fall back to the serde defaults on AppConfig
    let settings = Config::builder()
        .add_source(File::new(&path.to_string_lossy(), FileFormat::Toml).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config: AppConfig = settings.try_deserialize()?;
    config.validate().map_err(BotError::Config)?;

    info!(
        "Configuration loaded (file: {}, symbol: {}, window: {} days)",
        path.display(),
        config.data.symbol,
        config.data.window_capacity
    );
    Ok(config)
}

/// Render the effective configuration as TOML
pub fn render_config(config: &AppConfig) -> anyhow::Result<String> {
    Ok(toml::to_string_pretty(config)?)
}
