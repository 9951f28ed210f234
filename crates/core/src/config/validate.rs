use super::{types::Config, ConfigError};

/// Longest polling budget accepted: 30 days.
pub const MAX_TOTAL_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

/// Validate configuration
/// Currently validates:
/// - API base URL parses as an http(s) URL
/// - Polling interval, error cap and total duration are non-zero
/// - Total polling duration is at most [`MAX_TOTAL_DURATION_SECS`]
/// - Upload weight lies within [0, 1]
/// - Default processing options are a valid combination
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let url = reqwest::Url::parse(&config.api.base_url).map_err(|e| {
        ConfigError::ValidationError(format!(
            "api.base_url '{}' is not a valid URL: {}",
            config.api.base_url, e
        ))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::ValidationError(format!(
            "api.base_url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.polling.interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "polling.interval_ms cannot be 0".to_string(),
        ));
    }
    if config.polling.max_consecutive_errors == 0 {
        return Err(ConfigError::ValidationError(
            "polling.max_consecutive_errors cannot be 0".to_string(),
        ));
    }
    if config.polling.max_total_duration_secs == 0 {
        return Err(ConfigError::ValidationError(
            "polling.max_total_duration_secs cannot be 0".to_string(),
        ));
    }
    if config.polling.max_total_duration_secs > MAX_TOTAL_DURATION_SECS {
        return Err(ConfigError::ValidationError(format!(
            "polling.max_total_duration_secs must be at most {}, got {}",
            MAX_TOTAL_DURATION_SECS, config.polling.max_total_duration_secs
        )));
    }

    let weight = config.workflow.upload_weight;
    if !(0.0..=1.0).contains(&weight) {
        return Err(ConfigError::ValidationError(format!(
            "workflow.upload_weight must be between 0 and 1, got {}",
            weight
        )));
    }

    config
        .processing
        .validate()
        .map_err(|e| ConfigError::ValidationError(format!("processing: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ColumnProfile;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_bad_url_fails() {
        let mut config = Config::default();
        config.api.base_url = "not a url".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        config.api.base_url = "ftp://files.example.com".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_polling_values_fail() {
        let mut config = Config::default();
        config.polling.interval_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.polling.max_consecutive_errors = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.polling.max_total_duration_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_total_duration_ceiling() {
        let mut config = Config::default();
        config.polling.max_total_duration_secs = MAX_TOTAL_DURATION_SECS;
        assert!(validate_config(&config).is_ok());

        config.polling.max_total_duration_secs = u64::MAX;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("max_total_duration_secs"));
    }

    #[test]
    fn test_validate_upload_weight_range() {
        let mut config = Config::default();
        config.workflow.upload_weight = 1.5;
        assert!(validate_config(&config).is_err());

        config.workflow.upload_weight = 0.0;
        assert!(validate_config(&config).is_ok());

        config.workflow.upload_weight = f64::NAN;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_processing_options() {
        let mut config = Config::default();
        config.processing.column_profile = ColumnProfile::Custom;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("processing"));
    }
}
