//! Health checking, aggregation and reconnect behavior

mod common;

use common::*;
use diabetactic_gateway::constants::events;
use diabetactic_gateway::health::HealthStatus;
use diabetactic_gateway::registry::HttpMethod;
use diabetactic_gateway::resilience::CircuitState;
use serde_json::json;
use std::time::Duration;

fn health_url(base: &str) -> String {
    url(base, "/health")
}

#[tokio::test(start_paused = true)]
async fn test_check_outcomes_map_to_statuses() {
    let mut config = test_config();
    config.health.degraded_latency_ms = 500;
    let h = TestHarness::with_config(config);

    h.transport
        .respond(HttpMethod::Get, &health_url(GLUCOSE), 200, json!({"status": "ok"}));
    h.transport
        .respond(HttpMethod::Get, &health_url(APPOINTMENTS), 503, json!(null));
    h.transport
        .respond(HttpMethod::Get, &url(TIDEPOOL, "/status"), 200, json!({}))
        .delay(HttpMethod::Get, &url(TIDEPOOL, "/status"), Duration::from_millis(800));

    let monitor = h.core.health_monitor();
    let overall = monitor.perform_health_check_all().await;

    assert_eq!(overall.service("glucoserver").unwrap().status, HealthStatus::Healthy);
    let tidepool = overall.service("tidepool").unwrap();
    assert_eq!(tidepool.status, HealthStatus::Degraded);
    assert_eq!(tidepool.last_latency_ms, Some(800));
    let appointments = overall.service("appointments").unwrap();
    assert_eq!(appointments.status, HealthStatus::Unhealthy);
    assert_eq!(appointments.message.as_deref(), Some("HTTP 503"));

    // Appointments has no offline fallback, so the whole system is unhealthy
    assert_eq!(overall.status, HealthStatus::Unhealthy);
    assert_eq!(h.consecutive_failures("appointments"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_checks_run_concurrently() {
    let mut config = test_config();
    let template = config.services[0].clone();
    for id in ["login", "reports"] {
        let mut extra = template.clone();
        extra.id = id.to_string();
        extra.base_url = format!("http://{id}.test");
        config.services.push(extra);
    }
    let h = TestHarness::with_config(config);

    for base in [GLUCOSE, APPOINTMENTS, "http://login.test", "http://reports.test"] {
        h.transport
            .respond(HttpMethod::Get, &health_url(base), 200, json!({}));
    }
    // Tidepool's check hangs until its 2s timeout
    h.transport.hang(HttpMethod::Get, &url(TIDEPOOL, "/status"));

    let started = tokio::time::Instant::now();
    let overall = h.core.health_monitor().perform_health_check_all().await;
    let elapsed = started.elapsed();

    assert_eq!(overall.services.len(), 5);
    assert!(elapsed >= Duration::from_millis(2000));
    assert!(elapsed < Duration::from_millis(2500), "checks ran serially: {elapsed:?}");
    assert_eq!(overall.service("tidepool").unwrap().status, HealthStatus::Unhealthy);
    // Tidepool supports offline fallback, so its outage only degrades the system
    assert_eq!(overall.status, HealthStatus::Degraded);
}

#[tokio::test]
async fn test_offline_marks_unknown_without_touching_breakers() {
    let h = TestHarness::new();
    h.connectivity.set_online(false);

    let overall = h.core.health_monitor().perform_health_check_all().await;

    assert_eq!(overall.status, HealthStatus::Unknown);
    assert!(overall
        .services
        .iter()
        .all(|s| s.status == HealthStatus::Unknown));
    assert_eq!(h.transport.total_calls(), 0);
    for id in ["glucoserver", "appointments", "tidepool"] {
        let metrics = h.core.circuit_breakers().get(id).unwrap().metrics();
        assert_eq!(metrics.transition_count, 0);
        assert_eq!(metrics.total_calls, 0);
    }
}

#[tokio::test]
async fn test_single_service_check_and_unknown_service() {
    let h = TestHarness::new();
    h.transport
        .respond(HttpMethod::Get, &health_url(GLUCOSE), 200, json!({}));

    let monitor = h.core.health_monitor();
    let snapshot = monitor.run_health_check("glucoserver").await.unwrap();
    assert_eq!(snapshot.status, HealthStatus::Healthy);
    assert!(snapshot.last_checked_at.is_some());
    assert_eq!(
        monitor.service_status("glucoserver").unwrap().status,
        HealthStatus::Healthy
    );
    assert!(monitor.run_health_check("fax-gateway").await.is_err());

    // Nothing else checked yet
    assert_eq!(
        monitor.service_status("appointments").unwrap().status,
        HealthStatus::Unknown
    );
    assert_eq!(h.core.get_overall_health().status, HealthStatus::Degraded);
}

#[tokio::test]
async fn test_check_success_recovers_open_breaker() {
    let h = TestHarness::new();
    h.core.circuit_breakers().get("glucoserver").unwrap().force_open();
    h.transport
        .respond(HttpMethod::Get, &health_url(GLUCOSE), 200, json!({}));

    let monitor = h.core.health_monitor();
    let snapshot = monitor.run_health_check("glucoserver").await.unwrap();
    assert_eq!(snapshot.status, HealthStatus::Healthy);
    assert_eq!(snapshot.breaker_state, CircuitState::Open);

    h.clock.advance(Duration::from_secs(10));
    let snapshot = monitor.run_health_check("glucoserver").await.unwrap();
    assert_eq!(snapshot.breaker_state, CircuitState::Closed);
}

#[tokio::test]
async fn test_check_results_are_broadcast() {
    let h = TestHarness::new();
    h.transport
        .respond(HttpMethod::Get, &health_url(APPOINTMENTS), 200, json!({}));
    let mut events_rx = h.core.events().subscribe();
    let mut health_rx = h.core.health_monitor().subscribe();

    h.core
        .health_monitor()
        .run_health_check("appointments")
        .await
        .unwrap();

    let event = events_rx.recv().await.unwrap();
    assert_eq!(event.name, events::HEALTH_CHECK_COMPLETED);
    assert_eq!(event.context["service_id"], json!("appointments"));
    assert_eq!(event.context["status"], json!("healthy"));

    assert!(health_rx.has_changed().unwrap());
    let overall = health_rx.borrow_and_update().clone();
    assert_eq!(
        overall.service("appointments").unwrap().status,
        HealthStatus::Healthy
    );
}

#[tokio::test(start_paused = true)]
async fn test_monitoring_rechecks_when_connectivity_returns() {
    let h = TestHarness::new();
    let glucose_health = health_url(GLUCOSE);
    h.transport
        .respond(HttpMethod::Get, &glucose_health, 200, json!({}));
    h.transport
        .respond(HttpMethod::Get, &health_url(APPOINTMENTS), 200, json!({}));
    h.transport
        .respond(HttpMethod::Get, &url(TIDEPOOL, "/status"), 200, json!({}));

    let handle = h
        .core
        .health_monitor()
        .start_monitoring(Duration::from_secs(60));

    // First tick fires immediately
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.transport.call_count(HttpMethod::Get, &glucose_health), 1);
    assert_eq!(h.core.get_overall_health().status, HealthStatus::Healthy);

    h.connectivity.set_online(false);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.core.get_overall_health().status, HealthStatus::Unknown);

    h.connectivity.set_online(true);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.transport.call_count(HttpMethod::Get, &glucose_health), 2);
    assert_eq!(h.core.get_overall_health().status, HealthStatus::Healthy);

    handle.abort();
}

#[tokio::test]
async fn test_disabled_monitoring_is_not_started() {
    let h = TestHarness::new();
    assert!(h.core.start_health_monitoring().is_none());
}
