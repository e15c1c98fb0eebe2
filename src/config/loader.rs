use std::path::Path;

use super::{AppConfig, ConfigError};

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }

    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_yaml::from_str(&content)?;

    validate(&config)?;

    Ok(config)
}

fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    if config.server.client_port == config.server.registration_port {
        return Err(ConfigError::Validation(format!(
            "client_port and registration_port must differ (both are {})",
            config.server.client_port
        )));
    }
    if config.history.capacity == 0 {
        return Err(ConfigError::Validation(
            "history.capacity must be at least 1".to_string(),
        ));
    }
    Ok(())
}
