//! Cross-resolver consistency of a DNS answer.
//!
//! The same query is sent to many independent recursive resolvers; the share
//! of resolvers returning an answer that satisfies the expectation decides the
//! propagation status.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use hickory_proto::rr::RecordType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::debug;

use super::query::{DnsQuerier, DnsQueryError};
use super::resolvers::ResolverDescriptor;
use crate::result::CheckStatus;

/// What an answer must contain to count as consistent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Expectation {
    /// Any successful answer
    #[default]
    Any,
    /// The value must be one of the records
    One(String),
    /// Every value must be among the records
    All(Vec<String>),
}

impl Expectation {
    /// Read an `expected_value` setting: a string, a list of strings, or nothing
    pub fn from_value(value: Option<&Value>) -> Result<Self, String> {
        match value {
            None | Some(Value::Null) => Ok(Expectation::Any),
            Some(Value::String(s)) if s.is_empty() => Ok(Expectation::Any),
            Some(Value::String(s)) => Ok(Expectation::One(s.clone())),
            Some(Value::Array(items)) if items.is_empty() => Ok(Expectation::Any),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(format!("expected_value entries must be strings, got {other}")),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Expectation::All),
            Some(other) => Err(format!("expected_value must be a string or list, got {other}")),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Expectation::Any)
    }

    pub fn matches(&self, records: &[String]) -> bool {
        match self {
            Expectation::Any => true,
            Expectation::One(expected) => contains_record(records, expected),
            Expectation::All(expected) => expected.iter().all(|value| contains_record(records, value)),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Expectation::Any => Value::Null,
            Expectation::One(value) => Value::String(value.clone()),
            Expectation::All(values) => Value::from(values.clone()),
        }
    }
}

fn contains_record(records: &[String], expected: &str) -> bool {
    let expected_trimmed = expected.trim_end_matches('.');
    records
        .iter()
        .any(|record| record == expected || record.trim_end_matches('.') == expected_trimmed)
}

/// Answer of one resolver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverOutcome {
    pub resolver: IpAddr,
    pub name: String,
    pub provider: String,
    pub status: CheckStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub response_time: f64,
    #[serde(rename = "match")]
    pub matched: bool,
}

/// Aggregated propagation outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationReport {
    pub status: CheckStatus,
    pub total_count: usize,
    pub successful_count: usize,
    pub consistent_count: usize,
    pub percentage: f64,
    pub threshold: f64,
    pub resolvers: Vec<ResolverOutcome>,
}

/// Map a consistency percentage onto a status
pub fn classify(percentage: f64, threshold: f64) -> CheckStatus {
    if percentage >= threshold {
        CheckStatus::Success
    } else if percentage >= threshold * 0.7 {
        CheckStatus::Warning
    } else {
        CheckStatus::Error
    }
}

impl PropagationReport {
    pub fn from_outcomes(resolvers: Vec<ResolverOutcome>, threshold: f64) -> Self {
        let total_count = resolvers.len();
        let successful_count = resolvers.iter().filter(|r| r.status == CheckStatus::Success).count();
        let consistent_count =
            resolvers.iter().filter(|r| r.status == CheckStatus::Success && r.matched).count();

        let percentage = if total_count > 0 {
            consistent_count as f64 / total_count as f64 * 100.0
        } else {
            0.0
        };

        Self {
            status: classify(percentage, threshold),
            total_count,
            successful_count,
            consistent_count,
            percentage: (percentage * 10.0).round() / 10.0,
            threshold,
            resolvers,
        }
    }

    /// e.g. `80.0% (8/10 resolvers)`
    pub fn summary(&self) -> String {
        format!("{:.1}% ({}/{} resolvers)", self.percentage, self.consistent_count, self.total_count)
    }
}

/// Fans a query out to many resolvers with bounded concurrency
#[derive(Clone)]
pub struct PropagationChecker {
    querier: Arc<dyn DnsQuerier>,
    timeout: Duration,
    max_workers: usize,
}

impl PropagationChecker {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_MAX_WORKERS: usize = 10;
    pub const DEFAULT_THRESHOLD: f64 = 80.0;

    pub fn new(querier: Arc<dyn DnsQuerier>) -> Self {
        Self { querier, timeout: Self::DEFAULT_TIMEOUT, max_workers: Self::DEFAULT_MAX_WORKERS }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Query every resolver (duplicates included) and aggregate the answers
    pub async fn check(
        &self,
        domain: &str,
        record_type: RecordType,
        expectation: &Expectation,
        resolvers: &[ResolverDescriptor],
        threshold: f64,
    ) -> PropagationReport {
        let limiter = Semaphore::new(self.max_workers.max(1));
        let limiter = &limiter;

        let queries = resolvers.iter().map(|resolver| async move {
            let _permit = limiter.acquire().await.ok();
            self.query_resolver(domain, record_type, expectation, resolver).await
        });

        PropagationReport::from_outcomes(join_all(queries).await, threshold)
    }

    async fn query_resolver(
        &self,
        domain: &str,
        record_type: RecordType,
        expectation: &Expectation,
        resolver: &ResolverDescriptor,
    ) -> ResolverOutcome {
        let started = Instant::now();
        let answer = self.querier.lookup(domain, record_type, &[resolver.ip], self.timeout).await;
        let elapsed = started.elapsed().as_secs_f64();

        let outcome = ResolverOutcome {
            resolver: resolver.ip,
            name: resolver.name.clone(),
            provider: resolver.provider.clone(),
            status: CheckStatus::Success,
            records: Vec::new(),
            error: None,
            response_time: elapsed,
            matched: false,
        };

        match answer {
            Ok(answer) => ResolverOutcome {
                matched: expectation.matches(&answer.records),
                records: answer.records,
                ..outcome
            },
            Err(err) => {
                debug!(resolver = %resolver.ip, domain, error = %err, "Resolver query failed");
                let response_time = match err {
                    DnsQueryError::Timeout => self.timeout.as_secs_f64(),
                    _ => elapsed,
                };
                ResolverOutcome {
                    status: CheckStatus::Error,
                    error: Some(err.to_string()),
                    response_time,
                    ..outcome
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outcome(matched: bool, ok: bool) -> ResolverOutcome {
        ResolverOutcome {
            resolver: "192.0.2.1".parse().unwrap(),
            name: "test".into(),
            provider: "Test".into(),
            status: if ok { CheckStatus::Success } else { CheckStatus::Error },
            records: Vec::new(),
            error: None,
            response_time: 0.01,
            matched,
        }
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(80.0, 80.0), CheckStatus::Success);
        assert_eq!(classify(79.9, 80.0), CheckStatus::Warning);
        assert_eq!(classify(56.0, 80.0), CheckStatus::Warning);
        assert_eq!(classify(55.9, 80.0), CheckStatus::Error);
        assert_eq!(classify(0.0, 0.0), CheckStatus::Success);
    }

    #[test]
    fn test_report_counts_only_successful_matches() {
        // An error outcome never counts as consistent, even if flagged as matching
        let report = PropagationReport::from_outcomes(
            vec![outcome(true, true), outcome(false, true), outcome(true, false)],
            50.0,
        );
        assert_eq!(report.total_count, 3);
        assert_eq!(report.successful_count, 2);
        assert_eq!(report.consistent_count, 1);
        assert_eq!(report.percentage, 33.3);
        assert_eq!(report.status, CheckStatus::Error);
        assert_eq!(report.summary(), "33.3% (1/3 resolvers)");
    }

    #[test]
    fn test_empty_report_is_zero_percent() {
        let report = PropagationReport::from_outcomes(Vec::new(), 80.0);
        assert_eq!(report.percentage, 0.0);
        assert_eq!(report.status, CheckStatus::Error);
    }

    #[test]
    fn test_expectation_matching() {
        let records = vec!["192.0.2.1".to_string(), "mail.example.com".to_string()];

        assert!(Expectation::Any.matches(&[]));
        assert!(Expectation::One("192.0.2.1".into()).matches(&records));
        assert!(Expectation::One("mail.example.com.".into()).matches(&records));
        assert!(!Expectation::One("192.0.2.2".into()).matches(&records));
        assert!(Expectation::All(vec!["192.0.2.1".into(), "mail.example.com".into()]).matches(&records));
        assert!(!Expectation::All(vec!["192.0.2.1".into(), "192.0.2.9".into()]).matches(&records));
    }

    #[test]
    fn test_expectation_from_value() {
        assert_eq!(Expectation::from_value(None), Ok(Expectation::Any));
        assert_eq!(Expectation::from_value(Some(&json!(""))), Ok(Expectation::Any));
        assert_eq!(Expectation::from_value(Some(&json!("1.2.3.4"))), Ok(Expectation::One("1.2.3.4".into())));
        assert_eq!(
            Expectation::from_value(Some(&json!(["a", "b"]))),
            Ok(Expectation::All(vec!["a".into(), "b".into()]))
        );
        assert!(Expectation::from_value(Some(&json!([1]))).is_err());
        assert!(Expectation::from_value(Some(&json!(true))).is_err());
    }

    #[test]
    fn test_outcome_serializes_match_key() {
        let value = serde_json::to_value(outcome(true, true)).unwrap();
        assert_eq!(value["match"], json!(true));
        assert_eq!(value["status"], json!("success"));
        assert!(value.get("error").is_none());
    }
}
