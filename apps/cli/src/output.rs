//! Terminal rendering of plugin listings and check outcomes.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::process::ExitCode;

use checkup::{CheckOutcome, CheckStatus, PluginInfo, RunSummary};

/// Process exit status for a check status: 0 success, 1 warning, 2 error
pub fn status_code(status: CheckStatus) -> u8 {
    match status {
        CheckStatus::Success => 0,
        CheckStatus::Warning => 1,
        CheckStatus::Error => 2,
    }
}

pub fn exit_code(status: CheckStatus) -> ExitCode {
    ExitCode::from(status_code(status))
}

pub fn render_plugins(plugins: &BTreeMap<String, PluginInfo>) -> String {
    let mut out = String::new();
    for (name, info) in plugins {
        let _ = writeln!(out, "{name}: {}", info.description);
        let _ = writeln!(out, "  required: {}", join_or_none(&info.required_config));
        let _ = writeln!(out, "  optional: {}", join_or_none(&info.optional_config));
    }
    out
}

fn join_or_none(keys: &[String]) -> String {
    if keys.is_empty() { "-".to_string() } else { keys.join(", ") }
}

/// One line per outcome: `[id] STATUS: message (0.1234s)`
pub fn render_outcome(outcome: &CheckOutcome) -> String {
    format!(
        "[{}] {}: {} ({:.4}s)",
        outcome.descriptor.display_id(),
        outcome.result.status().as_str().to_ascii_uppercase(),
        outcome.result.message(),
        outcome.result.response_time()
    )
}

pub fn render_summary(summary: &RunSummary) -> String {
    format!(
        "{} checks: {} success, {} warning, {} error",
        summary.total, summary.success, summary.warning, summary.error
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkup::{CheckDescriptor, CheckResult, PluginConfig};

    #[test]
    fn test_status_codes() {
        assert_eq!(status_code(CheckStatus::Success), 0);
        assert_eq!(status_code(CheckStatus::Warning), 1);
        assert_eq!(status_code(CheckStatus::Error), 2);
    }

    #[test]
    fn test_render_plugins() {
        let mut plugins = BTreeMap::new();
        plugins.insert(
            "website_status".to_string(),
            PluginInfo {
                description: "Check a website".into(),
                required_config: vec!["url".into()],
                optional_config: vec![],
            },
        );
        assert_eq!(render_plugins(&plugins), "website_status: Check a website\n  required: url\n  optional: -\n");
    }

    #[test]
    fn test_render_outcome_and_summary() {
        let outcome = CheckOutcome {
            descriptor: CheckDescriptor::new("dns_record", PluginConfig::new()).with_id("dns-1"),
            result: CheckResult::error("Domain x does not exist").with_response_time(0.5),
        };
        assert_eq!(render_outcome(&outcome), "[dns-1] ERROR: Domain x does not exist (0.5000s)");

        let summary = RunSummary::from_outcomes(std::slice::from_ref(&outcome));
        assert_eq!(render_summary(&summary), "1 checks: 0 success, 0 warning, 1 error");
    }
}
