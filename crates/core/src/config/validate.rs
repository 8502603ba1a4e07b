use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Every stage lane allows at least one concurrent job
/// - The admission queue holds at least one pipeline
/// - Text chunks may hold at least one character
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    for (kind, lane) in config.stages.iter() {
        if lane.max_concurrent == 0 {
            return Err(ConfigError::ValidationError(format!(
                "stages.{}.max_concurrent must be at least 1",
                kind
            )));
        }
    }

    if config.dispatcher.max_pending_pipelines == 0 {
        return Err(ConfigError::ValidationError(
            "dispatcher.max_pending_pipelines must be at least 1".to_string(),
        ));
    }

    if config.chunking.max_chunk_chars == 0 {
        return Err(ConfigError::ValidationError(
            "chunking.max_chunk_chars must be at least 1".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = Config::default();
        config.server.port = 0;
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_zero_concurrency_fails() {
        let mut config = Config::default();
        config.stages.convert_voice.max_concurrent = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("stages.convert_voice.max_concurrent"));
    }

    #[test]
    fn test_validate_zero_queue_fails() {
        let mut config = Config::default();
        config.dispatcher.max_pending_pipelines = 0;
        assert!(validate_config(&config).is_err());
    }
}
