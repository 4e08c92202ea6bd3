use crate::protocol::canonical::{CanonicalUsage, FinishReason};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
///
/// Output goes to stderr so it never interleaves with emitted events.
pub fn init_tracing(log_level: &str) {
    let Some(filter) = filter_for_level(log_level) else {
        return;
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn filter_for_level(log_level: &str) -> Option<EnvFilter> {
    let level = log_level.to_uppercase();

    if level == "DISABLED" {
        return None;
    }

    let tracing_level = match level.as_str() {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    };

    Some(EnvFilter::try_new(tracing_level).unwrap_or_else(|_| EnvFilter::new("INFO")))
}

/// Log the outcome of one normalized stream, computing duration from start time.
pub fn log_stream_complete(
    finish_reason: Option<&FinishReason>,
    usage: &CanonicalUsage,
    start_time: Instant,
) {
    let elapsed = start_time.elapsed();
    let unified = finish_reason.map_or("none", |reason| reason.unified.as_str());
    let raw = finish_reason
        .and_then(|reason| reason.raw.as_deref())
        .unwrap_or("");
    info!(
        finish_reason = unified,
        raw_finish_reason = raw,
        prompt_tokens = usage.prompt_tokens.unwrap_or(0),
        completion_tokens = usage.completion_tokens.unwrap_or(0),
        total_tokens = usage.total_tokens().unwrap_or(0),
        duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        "Stream complete"
    );
}
