//! Interpretation of engine CLI output.

use regex::Regex;
use stackop_core::Error;
use stackop_core::stack::Permalink;
use std::sync::LazyLock;

// Only the engine's own service errors count. Provider errors also carry HTTP
// codes and must stay generic failures.
static CONFLICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(error: \[409\] conflict|another update is currently in progress)").unwrap()
});

static PENDING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(pending operations|pending_operations)").unwrap()
});

static NOT_FOUND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(error: \[404\] not found|no stack named)").unwrap()
});

static DRIFT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)no changes were expected but changes (occurred|were proposed)").unwrap()
});

static PERMALINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:View Live|Permalink):\s*(https?://\S+)\s*$").unwrap()
});

/// Classify the combined output of a failed engine invocation.
pub fn classify_failure(operation: &str, output: &str) -> Error {
    let message = format!("{operation}: {}", last_lines(output, 20));

    if DRIFT_RE.is_match(output) {
        Error::RefreshDrift(message)
    } else if CONFLICT_RE.is_match(output) {
        Error::EngineConflict(message)
    } else if PENDING_RE.is_match(output) {
        Error::EnginePendingOperations(message)
    } else if NOT_FOUND_RE.is_match(output) {
        Error::NotFound(message)
    } else {
        Error::EngineFailed(message)
    }
}

/// Link to the run in the engine's console, taken from the last
/// `View Live:` or `Permalink:` line of the output.
pub fn extract_permalink(output: &str) -> Option<Permalink> {
    PERMALINK_RE
        .captures_iter(output)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| Permalink::new(m.as_str()))
}

fn last_lines(output: &str, n: usize) -> String {
    let lines: Vec<&str> = output.trim().lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}
