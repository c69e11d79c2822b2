//! Configuration discovery, environment merging and validation from disk

use diabetactic_gateway::config::{ConfigManager, ConfigurationError};
use diabetactic_gateway::core::{Collaborators, ResilienceCore};
use diabetactic_gateway::orchestration::workflows;
use diabetactic_gateway::registry::{CacheKeyStrategy, EndpointRegistry, ResponseTransform};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn repo_config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config")
}

fn write_config(contents: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("gateway-config.yaml"), contents).unwrap();
    dir
}

const MINIMAL: &str = r#"
services:
  - id: glucoserver
    base_url: http://localhost:8002
    timeout_ms: 5000
    max_retries: 3
    breaker_failure_threshold: 3
    breaker_open_duration_ms: 30000
endpoints:
  glucose.mine:
    service: glucoserver
    path: /glucose/mine
production:
  services:
    - id: glucoserver
      base_url: https://api.example.test/glucose
    - id: login
      base_url: https://api.example.test/auth
      timeout_ms: 8000
      breaker_failure_threshold: 5
      breaker_open_duration_ms: 30000
  backoff:
    base_delay_ms: 500
    max_delay_ms: 8000
    backoff_multiplier: 3.0
    jitter_enabled: false
    jitter_max_percentage: 0.0
"#;

#[test]
fn test_repository_config_loads_for_every_environment() {
    for environment in ["development", "test", "production"] {
        let manager =
            ConfigManager::load_from_directory_with_env(Some(repo_config_dir()), environment)
                .unwrap_or_else(|e| panic!("{environment}: {e}"));
        let config = manager.config();

        assert_eq!(manager.environment(), environment);
        assert_eq!(config.environment, environment);
        let ids: Vec<&str> = config.services.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["tidepool", "glucoserver", "appointments", "login"]);

        let registry = EndpointRegistry::from_config(config).unwrap();
        assert_eq!(registry.service_for_endpoint("glucose.create"), Some("glucoserver"));
        assert_eq!(
            registry.service_for_endpoint("appointments.cancel"),
            Some("appointments")
        );
    }
}

#[test]
fn test_repository_environment_sections_apply() {
    let dir = Some(repo_config_dir());

    let development = ConfigManager::load_from_directory_with_env(dir.clone(), "development").unwrap();
    assert_eq!(development.config().health.check_interval_ms, 10_000);
    assert_eq!(
        development.config().service("glucoserver").unwrap().base_url,
        "http://localhost:8002"
    );

    let test = ConfigManager::load_from_directory_with_env(dir.clone(), "test").unwrap();
    assert!(!test.config().health.enabled);
    assert_eq!(test.config().backoff.max_delay_ms, 10);
    assert!(!test.config().backoff.jitter_enabled);
    // Untouched keys keep their base values
    assert_eq!(test.config().backoff.backoff_multiplier, 2.0);
    assert_eq!(test.config().orchestration.step_retry_delay_ms, 1);

    let production = ConfigManager::load_from_directory_with_env(dir, "production").unwrap();
    let glucose = production.config().service("glucoserver").unwrap();
    assert_eq!(glucose.base_url, "https://api.diabetactic.com/glucose");
    assert_eq!(glucose.timeout_ms, 8000);
    // Fields not overridden survive the per-id merge
    assert_eq!(glucose.breaker_failure_threshold, 3);
    assert_eq!(glucose.cache_default_ttl_ms, 60_000);
    assert_eq!(
        production.config().service("tidepool").unwrap().base_url,
        "https://api.tidepool.org"
    );
}

#[test]
fn test_repository_endpoint_options() {
    let manager =
        ConfigManager::load_from_directory_with_env(Some(repo_config_dir()), "test").unwrap();
    let registry = EndpointRegistry::from_config(manager.config()).unwrap();

    let readings = registry.get("tidepool.readings").unwrap();
    assert_eq!(readings.transform, ResponseTransform::TidepoolReadings);
    let cache = readings.cache.as_ref().unwrap();
    assert_eq!(cache.ttl.as_millis(), 300_000);
    assert_eq!(
        cache.key,
        CacheKeyStrategy::Params {
            names: vec!["startDate".to_string(), "endDate".to_string()]
        }
    );

    let cancel = registry.get("appointments.cancel").unwrap();
    assert!(cancel.idempotent);
    assert_eq!(cancel.path.placeholders().collect::<Vec<_>>(), vec!["appointment_id"]);
    assert!(!registry.get("appointments.create").unwrap().idempotent);
}

#[test]
fn test_repository_config_bootstraps_core() {
    let manager =
        ConfigManager::load_from_directory_with_env(Some(repo_config_dir()), "test").unwrap();
    let core = ResilienceCore::from_config(manager, Collaborators::new()).unwrap();

    assert_eq!(
        core.orchestrator().workflow_names(),
        vec![workflows::APPOINTMENT_BOOKING.to_string()]
    );
    assert_eq!(core.circuit_breakers().service_ids().len(), 4);
    assert!(core.start_health_monitoring().is_none());
}

#[test]
fn test_production_overrides_merge_services_by_id() {
    let dir = write_config(MINIMAL);

    let production =
        ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "production")
            .unwrap();
    let config = production.config();
    assert_eq!(config.services.len(), 2);
    let glucose = config.service("glucoserver").unwrap();
    assert_eq!(glucose.base_url, "https://api.example.test/glucose");
    assert_eq!(glucose.max_retries, 3);
    assert_eq!(glucose.health_endpoint, "/health");
    assert_eq!(config.service("login").unwrap().timeout_ms, 8000);
    assert_eq!(config.backoff.backoff_multiplier, 3.0);

    let development =
        ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "development")
            .unwrap();
    assert_eq!(development.config().services.len(), 1);
    assert_eq!(development.config().backoff.base_delay_ms, 200);
}

#[test]
fn test_missing_file_lists_searched_paths() {
    let dir = TempDir::new().unwrap();
    let err = ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
        .unwrap_err();
    match err {
        ConfigurationError::ConfigFileNotFound { searched_paths } => {
            assert!(!searched_paths.is_empty());
            assert!(searched_paths[0].starts_with(dir.path()));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_invalid_documents_are_rejected() {
    let cases = [
        ("services: [", "Invalid YAML"),
        (
            "services:\n  - id: a\n    base_url: http://a\n    timeout_ms: 0\n    breaker_failure_threshold: 1\n    breaker_open_duration_ms: 1\n",
            "timeout_ms",
        ),
        (
            "services:\n  - id: a\n    base_url: http://a\n    timeout_ms: 10\n    breaker_failure_threshold: 1\n    breaker_open_duration_ms: 1\nendpoints:\n  x.y:\n    service: b\n    path: /y\n",
            "unknown service 'b'",
        ),
        (
            "services:\n  - id: a\n    base_url: http://a\n    timeout_ms: 10\n    breaker_failure_threshold: 1\n    breaker_open_duration_ms: 1\nendpoints:\n  x.y:\n    service: a\n    path: /y/{id\n",
            "endpoints.x.y.path",
        ),
        (
            "services:\n  - id: a\n    base_url: http://a\n    timeout_ms: 10\n    breaker_failure_threshold: 1\n    breaker_open_duration_ms: 1\nendpoints:\n  x.y:\n    service: a\n    path: /y\n    cache: {}\n",
            "ttl",
        ),
        (
            "services:\n  - id: a\n    base_url: http://a\n    timeout_ms: 10\n    breaker_failure_threshold: 1\n    breaker_open_duration_ms: 1\nendpoints:\n  x.y:\n    service: a\n    path: /y\n    method: TELEPORT\n",
            "Invalid YAML",
        ),
        (
            "services:\n  - id: a\n    base_url: glucose.test\n    timeout_ms: 10\n    breaker_failure_threshold: 1\n    breaker_open_duration_ms: 1\n",
            "services.a.base_url",
        ),
        (
            "services:\n  - id: a\n    base_url: localhost:8002\n    timeout_ms: 10\n    breaker_failure_threshold: 1\n    breaker_open_duration_ms: 1\n",
            "unsupported scheme 'localhost'",
        ),
    ];

    for (yaml, expected) in cases {
        let dir = write_config(yaml);
        let err =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap_err();
        assert!(
            err.to_string().contains(expected),
            "expected '{expected}' in '{err}'"
        );
    }
}
