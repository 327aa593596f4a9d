use std::fmt::Display;
use std::time::{Duration, Instant};

/// Format a `Duration` with automatic unit scaling, e.g. `1.94ms` or `2.34s`.
pub fn fmt_duration(d: Duration) -> String {
    format!("{d:.2?}")
}

/// Warn if more than `threshold` has passed since `start`. Returns whether it did.
pub fn log_if_slow(start: Instant, threshold: Duration, label: &str, subject: &impl Display) -> bool {
    let elapsed = start.elapsed();
    if elapsed <= threshold {
        return false;
    }
    tracing::warn!(
        subject = %subject,
        duration = fmt_duration(elapsed),
        threshold = fmt_duration(threshold),
        "slow {label}"
    );
    true
}
