//! # Structured Logging Module
//!
//! Environment-aware structured logging to the console and, when the log
//! directory is writable, to a JSON file per process. The helpers below emit the
//! runtime's recurring events (lifecycle transitions, recovery cycles,
//! transaction decisions) with a stable set of fields.

use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;

use chrono::Utc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::state_machine::ComponentState;

static LOGGER_GUARD: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
///
/// Safe to call more than once; only the first call installs a subscriber. An
/// existing global subscriber (e.g. one installed by a test harness) is kept.
pub fn init_structured_logging() {
    LOGGER_GUARD.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let log_dir = PathBuf::from("log");
        let file_writer = match fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let pid = process::id();
                let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
                let appender = tracing_appender::rolling::never(
                    &log_dir,
                    format!("{environment}.{pid}.{timestamp}.log"),
                );
                Some(tracing_appender::non_blocking(appender))
            }
            Err(_) => None,
        };

        let console = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_filter(env_filter(&log_level));

        let (file_layer, guard) = match file_writer {
            Some((writer, guard)) => (
                Some(
                    fmt::layer()
                        .with_writer(writer)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_ansi(false)
                        .json()
                        .with_filter(env_filter(&log_level)),
                ),
                Some(guard),
            ),
            None => (None, None),
        };

        if tracing_subscriber::registry()
            .with(console)
            .with(file_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized - keeping it");
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            file_output = guard.is_some(),
            "Structured logging initialized"
        );

        guard
    });
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("CONDUIT_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log a successful lifecycle transition
pub fn log_lifecycle_transition(
    component: &str,
    transition: &str,
    from: ComponentState,
    to: ComponentState,
    status: &str,
) {
    tracing::info!(
        component = %component,
        transition = %transition,
        from = %from,
        to = %to,
        status = %status,
        "LIFECYCLE_TRANSITION"
    );
}

/// Log one step of a connection recovery cycle
pub fn log_recovery_event(
    connection: &str,
    phase: &str,
    attempt: Option<u32>,
    dependents: Option<usize>,
    details: Option<&str>,
) {
    tracing::info!(
        connection = %connection,
        phase = %phase,
        attempt = attempt,
        dependents = dependents,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "RECOVERY_EVENT"
    );
}

/// Log the commit/rollback decision taken for one message
pub fn log_transaction_decision(
    workflow: &str,
    message_id: &str,
    decision: &str,
    error_kind: Option<&str>,
) {
    tracing::debug!(
        workflow = %workflow,
        message_id = %message_id,
        decision = %decision,
        error_kind = error_kind,
        "TRANSACTION_DECISION"
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
        "ERROR"
    );
}
