//! Configuration Loader
//!
//! Environment-aware configuration loading. Handles YAML file discovery,
//! environment detection, and merging of environment-specific overrides.

use super::error::{ConfigResult, ConfigurationError};
use super::GatewayConfig;
use crate::constants::CONFIG_FILE_NAMES;
use serde_yaml::Value as YamlValue;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Environment names whose sections are merged and then stripped from the document
const ENVIRONMENT_SECTIONS: [&str; 3] = ["development", "test", "production"];

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: GatewayConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Useful for testing without modifying global environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&Self::sanitize_config_for_logging(&config))
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );

        info!(
            environment = %environment,
            services = config.services.len(),
            endpoints = config.endpoints.len(),
            "🔧 Gateway configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an in-memory configuration (embedding applications and tests)
    pub fn from_config(config: GatewayConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        let environment = config.environment.clone();
        Ok(Arc::new(ConfigManager {
            config,
            environment,
            config_directory: PathBuf::from("."),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Sanitized JSON copy of the configuration, safe to log
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect current environment: GATEWAY_ENV || APP_ENV || 'development'
    pub fn detect_environment() -> String {
        env::var("GATEWAY_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn default_config_directory() -> PathBuf {
        env::var("GATEWAY_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    /// Find the configuration file
    fn find_config_file(config_directory: &Path) -> ConfigResult<PathBuf> {
        let mut searched_paths = Vec::new();

        for name in CONFIG_FILE_NAMES {
            let config_path = config_directory.join(name);
            searched_paths.push(config_path.clone());

            if config_path.is_file() {
                debug!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        Err(ConfigurationError::config_file_not_found(searched_paths))
    }

    /// Read a configuration file with a size limit
    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

        let metadata = std::fs::metadata(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                format!(
                    "Configuration file too large ({} bytes > {} bytes limit)",
                    metadata.len(),
                    MAX_CONFIG_FILE_SIZE
                ),
            ));
        }

        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }

    /// Load and merge configuration with environment-specific overrides
    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<GatewayConfig> {
        let config_file = Self::find_config_file(config_directory)?;
        let yaml_content = Self::read_config_file_safely(&config_file)?;
        Self::parse_with_environment(&yaml_content, &config_file.display().to_string(), environment)
    }

    /// Parse a YAML document, apply the environment section and deserialize
    pub(crate) fn parse_with_environment(
        yaml_content: &str,
        source: &str,
        environment: &str,
    ) -> ConfigResult<GatewayConfig> {
        let mut yaml_data: YamlValue = serde_yaml::from_str(yaml_content)
            .map_err(|e| ConfigurationError::invalid_yaml(source, e))?;

        if let Some(env_overrides) = yaml_data
            .get(YamlValue::String(environment.to_string()))
            .cloned()
        {
            debug!("Applying environment-specific overrides for: {}", environment);
            Self::merge_yaml_values(&mut yaml_data, env_overrides)?;
        }

        if let YamlValue::Mapping(ref mut map) = yaml_data {
            for section in ENVIRONMENT_SECTIONS {
                map.remove(YamlValue::String(section.to_string()));
            }
        } else {
            return Err(ConfigurationError::invalid_yaml(
                source,
                "top-level document must be a mapping",
            ));
        }

        let mut config: GatewayConfig = serde_yaml::from_value(yaml_data).map_err(|e| {
            ConfigurationError::invalid_yaml(
                source,
                format!("Failed to deserialize configuration: {e}"),
            )
        })?;

        config.environment = environment.to_string();
        Ok(config)
    }

    /// Recursively merge YAML values (environment overrides into base config).
    /// Sequences are replaced wholesale except `services`, which merge by `id`.
    fn merge_yaml_values(base: &mut YamlValue, override_value: YamlValue) -> ConfigResult<()> {
        match (&mut *base, override_value) {
            (YamlValue::Mapping(base_map), YamlValue::Mapping(override_map)) => {
                for (key, value) in override_map {
                    let is_services = key.as_str() == Some("services");
                    match base_map.get_mut(&key) {
                        Some(existing) if is_services => Self::merge_services(existing, value)?,
                        Some(existing) => Self::merge_yaml_values(existing, value)?,
                        None => {
                            base_map.insert(key, value);
                        }
                    }
                }
            }
            (base_ref, override_val) => {
                *base_ref = override_val;
            }
        }
        Ok(())
    }

    fn merge_services(base: &mut YamlValue, overrides: YamlValue) -> ConfigResult<()> {
        let (YamlValue::Sequence(base_seq), YamlValue::Sequence(override_seq)) = (&mut *base, overrides)
        else {
            return Err(ConfigurationError::ConfigMergeError {
                error: "services overrides must be a list".to_string(),
            });
        };

        for entry in override_seq {
            let id = entry.get("id").cloned();
            let target = id.as_ref().and_then(|id| {
                base_seq
                    .iter_mut()
                    .find(|existing| existing.get("id") == Some(id))
            });
            match target {
                Some(existing) => Self::merge_yaml_values(existing, entry)?,
                None => base_seq.push(entry),
            }
        }
        Ok(())
    }

    fn sanitize_config_for_logging(config: &GatewayConfig) -> serde_json::Value {
        let mut config_json = serde_json::json!(config);
        let sensitive_patterns = ["password", "secret", "key", "token", "credential"];
        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);
        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if is_sensitive && !val.is_object() && !val.is_array() {
                        *val = serde_json::Value::String("[MASKED]".to_string());
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AuthType, CacheKeyStrategy, HttpMethod, ResponseTransform};
    use std::fs;
    use tempfile::TempDir;

    fn create_test_config_yaml() -> &'static str {
        r#"
services:
  - id: glucoserver
    base_url: "http://localhost:8002"
    timeout_ms: 5000
    max_retries: 2
    breaker_failure_threshold: 5
    breaker_open_duration_ms: 30000
    cache_default_ttl_ms: 60000
  - id: tidepool
    base_url: "https://api.tidepool.org"
    health_endpoint: "/status"
    timeout_ms: 10000
    breaker_failure_threshold: 3
    breaker_open_duration_ms: 60000
    supports_offline_fallback: true
    auth_header: "X-Tidepool-Session-Token"

endpoints:
  glucose.mine:
    service: glucoserver
    path: "/glucose/mine"
    auth: bearer
    cache:
      key:
        strategy: path
  tidepool.readings:
    service: tidepool
    path: "/data/{userId}"
    auth: service_specific
    cache:
      ttl_ms: 120000
    transform:
      type: tidepool_readings
  glucose.create:
    service: glucoserver
    path: "/glucose/create"
    method: POST
    auth: bearer

health:
  enabled: true
  check_interval_ms: 30000
  degraded_latency_ms: 1500

test:
  services:
    - id: glucoserver
      timeout_ms: 250
      breaker_open_duration_ms: 100
  health:
    check_interval_ms: 50

production:
  services:
    - id: tidepool
      timeout_ms: 15000
"#
    }

    fn setup_test_config_dir() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let config_dir = temp_dir.path().to_path_buf();
        fs::write(config_dir.join("gateway-config.yaml"), create_test_config_yaml()).unwrap();
        (temp_dir, config_dir)
    }

    #[test]
    fn test_config_file_discovery() {
        let (_temp_dir, config_dir) = setup_test_config_dir();

        let config_file = ConfigManager::find_config_file(&config_dir).unwrap();
        assert_eq!(config_file.file_name().unwrap(), "gateway-config.yaml");
    }

    #[test]
    fn test_config_file_not_found() {
        let temp_dir = TempDir::new().unwrap();

        let result = ConfigManager::find_config_file(temp_dir.path());
        if let Err(ConfigurationError::ConfigFileNotFound { searched_paths }) = result {
            assert_eq!(searched_paths.len(), 2);
        } else {
            panic!("Expected ConfigFileNotFound error");
        }
    }

    #[test]
    fn test_basic_config_loading() {
        let (_temp_dir, config_dir) = setup_test_config_dir();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(config_dir), "development").unwrap();
        let config = manager.config();

        assert_eq!(manager.environment(), "development");
        assert_eq!(config.services.len(), 2);

        let glucose = config.service("glucoserver").unwrap();
        assert_eq!(glucose.timeout_ms, 5000);
        assert_eq!(glucose.health_endpoint, "/health");

        let mine = &config.endpoints["glucose.mine"];
        assert_eq!(mine.method, HttpMethod::Get);
        assert_eq!(mine.auth, AuthType::Bearer);
        assert!(matches!(
            mine.cache.as_ref().unwrap().key,
            CacheKeyStrategy::Path
        ));

        let readings = &config.endpoints["tidepool.readings"];
        assert_eq!(readings.auth, AuthType::ServiceSpecific);
        assert_eq!(readings.transform, ResponseTransform::TidepoolReadings);
        assert_eq!(config.endpoints["glucose.create"].method, HttpMethod::Post);
    }

    #[test]
    fn test_environment_specific_overrides() {
        let (_temp_dir, config_dir) = setup_test_config_dir();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(config_dir.clone()), "test").unwrap();
        let config = manager.config();
        assert_eq!(config.environment, "test");
        assert!(config.is_test_environment());

        let glucose = config.service("glucoserver").unwrap();
        assert_eq!(glucose.timeout_ms, 250);
        assert_eq!(glucose.breaker_open_duration_ms, 100);
        // untouched fields survive the merge
        assert_eq!(glucose.base_url, "http://localhost:8002");
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.health.check_interval_ms, 50);

        let manager =
            ConfigManager::load_from_directory_with_env(Some(config_dir), "production").unwrap();
        assert_eq!(manager.config().service("tidepool").unwrap().timeout_ms, 15000);
        assert_eq!(manager.config().service("glucoserver").unwrap().timeout_ms, 5000);
    }

    #[test]
    fn test_invalid_yaml_reported() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("gateway-config.yaml"), "services: [").unwrap();

        let result = ConfigManager::load_from_directory_with_env(
            Some(temp_dir.path().to_path_buf()),
            "test",
        );
        assert!(matches!(result, Err(ConfigurationError::InvalidYaml { .. })));
    }

    #[test]
    fn test_validation_runs_on_load() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("gateway-config.yml"),
            r#"
services:
  - id: glucoserver
    base_url: "http://localhost:8002"
    timeout_ms: 0
    breaker_failure_threshold: 5
    breaker_open_duration_ms: 30000
"#,
        )
        .unwrap();

        let result = ConfigManager::load_from_directory_with_env(
            Some(temp_dir.path().to_path_buf()),
            "test",
        );
        assert!(matches!(result, Err(ConfigurationError::InvalidValue { .. })));
    }

    #[test]
    fn test_config_sanitization() {
        let mut value = serde_json::json!({
            "services": [{"id": "tidepool", "api_key": "abcdef"}],
            "token_refresh": {"secret": "shh", "enabled": true}
        });
        ConfigManager::sanitize_json_recursive(&mut value, &["key", "secret"]);

        assert_eq!(value["services"][0]["api_key"], "[MASKED]");
        assert_eq!(value["services"][0]["id"], "tidepool");
        assert_eq!(value["token_refresh"]["secret"], "[MASKED]");
        assert_eq!(value["token_refresh"]["enabled"], true);
    }
}
