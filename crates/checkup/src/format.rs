//! Human-readable rendering of check results.

use crate::result::CheckResult;

/// Render a result as `STATUS: message` plus its response time, and the
/// pretty-printed raw data when `verbose` is set.
pub fn format_result(result: &CheckResult, verbose: bool) -> String {
    let mut output = format!(
        "{}: {}\nResponse time: {:.4} seconds",
        result.status().as_str().to_ascii_uppercase(),
        result.message(),
        result.response_time()
    );

    if verbose {
        let raw = serde_json::to_string_pretty(result.raw_data()).unwrap_or_else(|_| "{}".to_string());
        output.push_str("\n\nRaw data:\n");
        output.push_str(&raw);
    }

    output
}
