use serde::{Deserialize, Serialize};

use crate::config::PluginConfig;
use crate::dispatch::DispatchError;
use crate::result::{CheckResult, CheckStatus};

/// A check submitted to the runner
///
/// Fields are optional so that descriptors read from user files can be
/// reported as errors individually instead of rejecting the whole batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<PluginConfig>,
}

impl CheckDescriptor {
    pub fn new(plugin_type: impl Into<String>, config: PluginConfig) -> Self {
        Self { id: None, plugin_type: Some(plugin_type.into()), config: Some(config) }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Placeholder id used when none was supplied
    pub fn placeholder_id(position: usize) -> String {
        format!("check-{position}")
    }

    pub fn display_id(&self) -> &str {
        self.id.as_deref().unwrap_or("<unnamed>")
    }

    pub(crate) fn dispatch_target(&self) -> Result<(&str, &PluginConfig), DispatchError> {
        let plugin_type = self
            .plugin_type
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| DispatchError::InvalidDescriptor("missing plugin_type".into()))?;
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| DispatchError::InvalidDescriptor("missing config".into()))?;
        Ok((plugin_type, config))
    }
}

/// A descriptor paired with the result it produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub descriptor: CheckDescriptor,
    pub result: CheckResult,
}

/// Status counts over a set of outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub success: usize,
    pub warning: usize,
    pub error: usize,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: &[CheckOutcome]) -> Self {
        outcomes.iter().fold(Self::default(), |mut summary, outcome| {
            summary.total += 1;
            match outcome.result.status() {
                CheckStatus::Success => summary.success += 1,
                CheckStatus::Warning => summary.warning += 1,
                CheckStatus::Error => summary.error += 1,
            }
            summary
        })
    }

    /// Most severe status seen, or success for an empty run
    pub fn worst(&self) -> CheckStatus {
        if self.error > 0 {
            CheckStatus::Error
        } else if self.warning > 0 {
            CheckStatus::Warning
        } else {
            CheckStatus::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_partial_descriptor() {
        let descriptor: CheckDescriptor = serde_json::from_value(json!({"id": "a"})).unwrap();
        assert_eq!(descriptor.id.as_deref(), Some("a"));
        assert!(matches!(descriptor.dispatch_target(), Err(DispatchError::InvalidDescriptor(_))));

        let descriptor: CheckDescriptor =
            serde_json::from_value(json!({"plugin_type": "website_status", "config": {"url": "x"}}))
                .unwrap();
        let (plugin_type, config) = descriptor.dispatch_target().unwrap();
        assert_eq!(plugin_type, "website_status");
        assert_eq!(config.get_str("url"), Some("x"));
    }

    #[test]
    fn test_summary_counts() {
        let outcome = |result: CheckResult| CheckOutcome { descriptor: CheckDescriptor::default(), result };
        let outcomes = vec![
            outcome(CheckResult::success("a")),
            outcome(CheckResult::warning("b")),
            outcome(CheckResult::success("c")),
        ];
        let summary = RunSummary::from_outcomes(&outcomes);
        assert_eq!(summary, RunSummary { total: 3, success: 2, warning: 1, error: 0 });
        assert_eq!(summary.worst(), CheckStatus::Warning);
        assert_eq!(RunSummary::default().worst(), CheckStatus::Success);
    }
}
