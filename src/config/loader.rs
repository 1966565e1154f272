//! Configuration file loader.

use std::path::Path;

use super::error::{ConfigError, ConfigResult};
use super::types::ForwardConfig;

/// Loads the JSON configuration file.
///
/// Rule-level validation is deliberately not performed here: an invalid
/// individual rule must not prevent startup, so rules are validated one
/// by one when they are bound.
#[derive(Debug, Default)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Create a new configuration loader.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Load configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, cannot be read, or
    /// does not parse as a configuration object with a `forward` array.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> ConfigResult<ForwardConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        self.load_str(&content)
    }

    /// Load configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the `forward` array
    /// is missing.
    pub fn load_str(&self, content: &str) -> ConfigResult<ForwardConfig> {
        let config: ForwardConfig = serde_json::from_str(content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_from_string() {
        let loader = ConfigLoader::new();
        let config = loader
            .load_str(
                r#"{
                    "forward": [
                        {
                            "id": 1,
                            "type": "tcp",
                            "localHost": "127.0.0.1",
                            "targetHost": "127.0.0.1",
                            "localPort": 29171,
                            "targetPort": 8001
                        }
                    ]
                }"#,
            )
            .unwrap();

        assert_eq!(config.forward.len(), 1);
        assert_eq!(config.forward[0].id, 1);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        std::fs::write(&config_path, r#"{"forward": []}"#).unwrap();

        let loader = ConfigLoader::new();
        let config = loader.load(&config_path).unwrap();
        assert!(config.forward.is_empty());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let loader = ConfigLoader::new();
        let result = loader.load("/nonexistent/path/config.json");
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_malformed_json_is_fatal() {
        let loader = ConfigLoader::new();
        let result = loader.load_str("{not json");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_missing_forward_array_is_fatal() {
        let loader = ConfigLoader::new();
        let result = loader.load_str(r#"{"rules": []}"#);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_non_array_forward_is_fatal() {
        let loader = ConfigLoader::new();
        let result = loader.load_str(r#"{"forward": {"id": 1}}"#);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
