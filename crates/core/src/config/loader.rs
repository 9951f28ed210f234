use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Prefix for environment overrides, e.g. `CONSOLIDATOR_API__BASE_URL`.
const ENV_PREFIX: &str = "CONSOLIDATOR_";

/// Load configuration from file with environment variable overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Load configuration from `path` when given, otherwise start from the
/// built-in defaults. Environment overrides apply in both cases.
pub fn load_config_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => Figment::from(Serialized::defaults(Config::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string())),
    }
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[api]
base_url = "http://backend:9000"

[polling]
interval_ms = 1000
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.api.base_url, "http://backend:9000");
        assert_eq!(config.polling.interval_ms, 1000);
    }

    #[test]
    fn test_load_config_from_str_invalid_type() {
        let toml = r#"
[polling]
interval_ms = "fast"
"#;
        let result = load_config_from_str(toml);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/consolidator.toml"));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[api]
base_url = "http://127.0.0.1:3000"

[workflow]
upload_weight = 0.25
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.api.base_url, "http://127.0.0.1:3000");
        assert_eq!(config.workflow.upload_weight, 0.25);
        assert_eq!(config.polling.max_consecutive_errors, 5);
    }

    #[test]
    fn test_load_config_or_default_without_file() {
        let config = load_config_or_default(None).unwrap();
        assert_eq!(config.polling.interval_ms, 2000);
    }
}
