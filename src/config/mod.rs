mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./oculux.toml",
        "~/.config/oculux/config.toml",
        "/etc/oculux/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.fetch.read_timeout_secs == 0 {
        anyhow::bail!("fetch.read_timeout_secs cannot be 0");
    }
    if config.fetch.connect_timeout_secs == 0 {
        anyhow::bail!("fetch.connect_timeout_secs cannot be 0");
    }
    if config.fetch.max_retry_delay_ms < config.fetch.retry_delay_ms {
        anyhow::bail!(
            "fetch.max_retry_delay_ms ({}) is below fetch.retry_delay_ms ({})",
            config.fetch.max_retry_delay_ms,
            config.fetch.retry_delay_ms
        );
    }

    if config.buffer.high_water_segments == 0 {
        anyhow::bail!("buffer.high_water_segments cannot be 0");
    }
    if config.buffer.fragments_per_segment == 0 {
        anyhow::bail!("buffer.fragments_per_segment cannot be 0");
    }

    if let Some(manifest) = config.manifest_path() {
        if !manifest.is_file() {
            anyhow::bail!("Resolver manifest does not exist: {:?}", manifest);
        }
    }

    if config.fetch.max_provider_retries.is_none() {
        tracing::debug!("Provider retries are unlimited");
    }

    Ok(())
}
