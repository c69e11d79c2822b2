//! # Structured Logging Module
//!
//! Environment-aware structured logging that outputs to both console and a JSON
//! file, for following gateway calls, breaker transitions and workflow runs.

use crate::config::ConfigManager;
use crate::resilience::CircuitState;
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let log_level = get_log_level(&environment);

        let console = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(EnvFilter::new(log_level));

        let log_dir = PathBuf::from("log");
        if let Err(e) = fs::create_dir_all(&log_dir) {
            // Console-only is still useful when the working directory is read-only
            if tracing_subscriber::registry().with(console).try_init().is_ok() {
                tracing::warn!(error = %e, "⚠️ Could not create log directory; logging to console only");
            }
            return;
        }

        // Log file name carries environment, PID, and timestamp
        let pid = process::id();
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_filename = format!("{environment}.{pid}.{timestamp}.log");
        let log_path = log_dir.join(&log_filename);

        let file_appender = tracing_appender::rolling::never(&log_dir, log_filename);
        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

        let subscriber = tracing_subscriber::registry().with(console).with(
            fmt::layer()
                .with_writer(file_writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(EnvFilter::new(log_level)),
        );

        // Don't panic if a global subscriber already exists (e.g. set by a test harness)
        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            log_file = %log_path.display(),
            "🔧 STRUCTURED LOGGING: Initialized with file output"
        );

        // The writer must outlive the process
        std::mem::forget(guard);
    });
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log the outcome of one gateway attempt
pub fn log_gateway_request(
    endpoint: &str,
    service_id: &str,
    method: &str,
    status: &str,
    attempt: u32,
    duration: Duration,
) {
    tracing::info!(
        endpoint = %endpoint,
        service_id = %service_id,
        method = %method,
        status = %status,
        attempt = attempt,
        duration_ms = duration.as_millis() as u64,
        "🌐 GATEWAY_REQUEST"
    );
}

pub fn log_breaker_transition(
    service_id: &str,
    from: CircuitState,
    to: CircuitState,
    consecutive_failures: u32,
) {
    match to {
        CircuitState::Open => tracing::warn!(
            service_id = %service_id,
            from = %from,
            consecutive_failures = consecutive_failures,
            "🔴 Circuit breaker opened (failing fast)"
        ),
        CircuitState::HalfOpen => tracing::info!(
            service_id = %service_id,
            from = %from,
            "🟡 Circuit breaker half-open (testing recovery)"
        ),
        CircuitState::Closed => tracing::info!(
            service_id = %service_id,
            from = %from,
            "🟢 Circuit breaker closed (recovered)"
        ),
    }
}

/// Log structured data for workflow operations
pub fn log_workflow_operation(
    operation: &str,
    run_id: Option<uuid::Uuid>,
    workflow: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        run_id = ?run_id,
        workflow = %workflow,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 WORKFLOW_OPERATION"
    );
}

/// Log structured data for step operations
pub fn log_step_operation(
    operation: &str,
    run_id: uuid::Uuid,
    step_name: &str,
    attempt: u32,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        run_id = %run_id,
        step_name = %step_name,
        attempt = attempt,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔧 STEP_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_helpers_do_not_require_subscriber() {
        log_breaker_transition("glucoserver", CircuitState::Closed, CircuitState::Open, 3);
        log_gateway_request("glucose.mine", "glucoserver", "GET", "200", 1, Duration::from_millis(12));
        log_error("gateway", "request", "boom", None);
    }
}
