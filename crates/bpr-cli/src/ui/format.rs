//! Formatting utilities for CLI output.

/// Truncate a string to at most `max_len` characters, ending in `...` when cut.
///
/// Newlines are flattened to spaces first.
pub fn truncate_str(s: &str, max_len: usize) -> String {
    let flat = s.replace(['\n', '\r'], " ");
    if flat.chars().count() <= max_len {
        flat
    } else if max_len <= 3 {
        ".".repeat(max_len)
    } else {
        let head: String = flat.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

/// Format a latency in milliseconds: `850us`, `12.4ms`, `1.52s`.
pub fn format_ms(ms: f64) -> String {
    if ms < 1.0 {
        format!("{:.0}us", ms * 1000.0)
    } else if ms < 1000.0 {
        format!("{:.1}ms", ms)
    } else {
        format!("{:.2}s", ms / 1000.0)
    }
}

/// Format a metric in [0, 1] with four decimals, or `-` when absent.
pub fn format_metric(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.4}", v))
}

/// Format a signed score delta: `+0.0200`, `-0.0050`.
pub fn format_delta(value: f64) -> String {
    format!("{:+.4}", value)
}

/// Format a number with thousands separators.
pub fn format_thousands(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    let len = s.len();

    for (i, c) in s.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result
}
