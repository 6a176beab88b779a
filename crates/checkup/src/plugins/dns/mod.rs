//! DNS record checks.
//!
//! The base lookup can be extended with an authoritative-answer probe, a
//! DNSSEC probe and a multi-resolver propagation check. Sub-check outcomes
//! are folded into the final status with [`CheckStatus::escalate`], so a
//! later sub-check can never improve an earlier verdict.

pub mod authority;
pub mod propagation;
pub mod query;
pub mod records;
pub mod resolvers;

pub use propagation::{Expectation, PropagationChecker, PropagationReport, ResolverOutcome, classify};
pub use query::{DnsAnswer, DnsQuerier, DnsQueryError, HickoryQuerier, ProbeOptions, ResponseFlags};
pub use resolvers::{ResolverDescriptor, default_public_resolvers, parse_resolvers};

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use hickory_proto::rr::RecordType;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::PluginConfig;
use crate::plugin::{CheckPlugin, PluginType, validate_required};
use crate::result::{CheckResult, CheckStatus, RawData};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings of one DNS check, parsed from the plugin configuration
#[derive(Debug, Clone)]
struct DnsSettings {
    domain: String,
    record_type: RecordType,
    expectation: Expectation,
    nameservers: Vec<IpAddr>,
    timeout: Duration,
    propagation_timeout: Duration,
    check_propagation: bool,
    resolvers: Vec<ResolverDescriptor>,
    threshold: f64,
    max_workers: usize,
    check_authoritative: bool,
    check_dnssec: bool,
}

impl DnsSettings {
    fn from_config(config: &PluginConfig) -> Result<Self, String> {
        let domain = config
            .get_str("domain")
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| "domain must be a non-empty string".to_string())?;
        let domain = match config.get_str("subdomain").map(str::trim).filter(|s| !s.is_empty()) {
            Some(subdomain) => format!("{subdomain}.{domain}"),
            None => domain.to_string(),
        };

        let record_type_text = config.get_str("record_type").unwrap_or_default();
        let record_type = query::parse_record_type(record_type_text)
            .ok_or_else(|| format!("Invalid record type: {record_type_text}"))?;

        let expectation = Expectation::from_value(config.get("expected_value"))?;

        let nameservers = match config.get("nameserver") {
            Some(value) => resolvers::parse_nameservers(value)?,
            None => Vec::new(),
        };

        let timeout = match config.get("timeout") {
            Some(_) => Some(
                config
                    .get_duration_secs("timeout")
                    .ok_or_else(|| "timeout must be a non-negative number of seconds".to_string())?,
            ),
            None => None,
        };

        let check_propagation = config.get_bool_or("check_propagation", false);

        let resolvers = match config.get("resolvers") {
            Some(Value::Null) | None => default_public_resolvers(),
            Some(value) => parse_resolvers(value)?,
        };

        let threshold = match config.get("propagation_threshold") {
            Some(_) => config
                .get_f64("propagation_threshold")
                .filter(|t| (0.0..=100.0).contains(t))
                .ok_or_else(|| "propagation_threshold must be a number between 0 and 100".to_string())?,
            None => PropagationChecker::DEFAULT_THRESHOLD,
        };

        let max_workers = match config.get("max_workers") {
            Some(_) => config
                .get_u64("max_workers")
                .filter(|n| *n > 0)
                .ok_or_else(|| "max_workers must be a positive integer".to_string())? as usize,
            None => PropagationChecker::DEFAULT_MAX_WORKERS,
        };

        Ok(Self {
            domain,
            record_type,
            expectation,
            nameservers,
            timeout: timeout.unwrap_or(DEFAULT_TIMEOUT),
            propagation_timeout: timeout.unwrap_or(PropagationChecker::DEFAULT_TIMEOUT),
            check_propagation,
            resolvers,
            threshold,
            max_workers,
            check_authoritative: config.get_bool_or("check_authoritative", false),
            check_dnssec: config.get_bool_or("check_dnssec", false),
        })
    }
}

/// `dns_record` plugin
pub struct DnsRecordPlugin {
    config: PluginConfig,
    querier: Arc<dyn DnsQuerier>,
}

impl DnsRecordPlugin {
    pub fn new(config: PluginConfig, querier: Arc<dyn DnsQuerier>) -> Self {
        Self { config, querier }
    }

    fn mismatch_message(expectation: &Expectation) -> String {
        match expectation {
            Expectation::All(values) => format!("Expected values {values:?} not all found"),
            Expectation::One(value) => format!("Expected value '{value}' not found"),
            Expectation::Any => String::new(),
        }
    }
}

impl PluginType for DnsRecordPlugin {
    const NAME: &'static str = "dns_record";
    const DESCRIPTION: &'static str = "Check DNS records, propagation, authority and DNSSEC for a domain";

    fn required_config() -> &'static [&'static str] {
        &["domain", "record_type"]
    }

    fn optional_config() -> &'static [&'static str] {
        &[
            "expected_value",
            "subdomain",
            "nameserver",
            "timeout",
            "check_propagation",
            "resolvers",
            "propagation_threshold",
            "max_workers",
            "check_authoritative",
            "check_dnssec",
        ]
    }

    fn from_config(config: PluginConfig) -> Self {
        Self::new(config, Arc::new(HickoryQuerier::default()))
    }
}

#[async_trait::async_trait]
impl CheckPlugin for DnsRecordPlugin {
    fn config(&self) -> &PluginConfig {
        &self.config
    }

    fn validate_config(&self) -> bool {
        if !validate_required(&self.config, Self::NAME, Self::required_config()) {
            return false;
        }

        match DnsSettings::from_config(&self.config) {
            Ok(settings) => {
                let wants_value = matches!(
                    settings.record_type,
                    RecordType::A | RecordType::AAAA | RecordType::CNAME | RecordType::TXT
                );
                if wants_value && settings.expectation.is_any() {
                    warn!(
                        domain = %settings.domain,
                        record_type = %settings.record_type,
                        "No expected_value given, only record existence will be checked"
                    );
                }
                true
            }
            Err(reason) => {
                error!(plugin = Self::NAME, %reason, "Invalid DNS check configuration");
                false
            }
        }
    }

    async fn run_check(&self) -> anyhow::Result<CheckResult> {
        let settings = DnsSettings::from_config(&self.config).map_err(|e| anyhow!(e))?;
        let domain = settings.domain.as_str();
        let record_type = settings.record_type;

        let started = Instant::now();
        let base = self.querier.lookup(domain, record_type, &settings.nameservers, settings.timeout).await;
        let query_time = started.elapsed().as_secs_f64();
        debug!(domain, %record_type, query_time, ok = base.is_ok(), "Base DNS lookup finished");

        let mut raw = RawData::new();
        raw.insert("domain".into(), domain.into());
        raw.insert("record_type".into(), record_type.to_string().into());
        raw.insert("query_time".into(), query_time.into());
        raw.insert(
            "nameserver".into(),
            match settings.nameservers.as_slice() {
                [] => Value::String("system".into()),
                [single] => Value::String(single.to_string()),
                many => Value::from(many.iter().map(IpAddr::to_string).collect::<Vec<_>>()),
            },
        );

        let mut status = CheckStatus::Success;
        let mut issues = Vec::new();
        let mut records = Vec::new();

        let base_failure = match base {
            Ok(answer) => {
                let matched = settings.expectation.matches(&answer.records);
                raw.insert("records".into(), Value::from(answer.records.clone()));
                raw.insert("expected_value".into(), settings.expectation.to_value());
                raw.insert("expected_value_match".into(), matched.into());
                raw.insert("ttl".into(), answer.ttl.map(Value::from).unwrap_or(Value::Null));
                if !matched {
                    status = CheckStatus::Error;
                    issues.push(Self::mismatch_message(&settings.expectation));
                }
                records = answer.records;
                None
            }
            Err(err) => {
                status = CheckStatus::Error;
                raw.insert("error".into(), err.tag().into());
                raw.insert("records".into(), Value::Array(Vec::new()));
                let message = match &err {
                    DnsQueryError::NxDomain => format!("Domain {domain} does not exist"),
                    DnsQueryError::NoAnswer => format!("No {record_type} records found for {domain}"),
                    DnsQueryError::Timeout => format!("Timeout resolving {record_type} records for {domain}"),
                    other => format!("Error checking DNS records: {other}"),
                };
                Some(message)
            }
        };

        if settings.check_authoritative {
            let report =
                authority::check_authoritative(self.querier.as_ref(), domain, record_type, settings.timeout).await;
            if !report.is_authoritative {
                status = status.escalate(CheckStatus::Warning);
                issues.push("Non-authoritative response".to_string());
            }
            raw.insert("authoritative".into(), serde_json::to_value(&report)?);
        }

        if settings.check_dnssec {
            let report = authority::check_dnssec(
                self.querier.as_ref(),
                domain,
                record_type,
                &settings.nameservers,
                settings.timeout,
            )
            .await;
            if !report.is_valid {
                status = status.escalate(CheckStatus::Error);
                issues.push("DNSSEC validation failed".to_string());
            }
            raw.insert("dnssec".into(), serde_json::to_value(&report)?);
        }

        if settings.check_propagation {
            let checker = PropagationChecker::new(Arc::clone(&self.querier))
                .with_timeout(settings.propagation_timeout)
                .with_max_workers(settings.max_workers);
            let report = checker
                .check(domain, record_type, &settings.expectation, &settings.resolvers, settings.threshold)
                .await;

            match report.status {
                CheckStatus::Error => issues.push(format!("Poor propagation: {}", report.summary())),
                CheckStatus::Warning => issues.push(format!("Partial propagation: {}", report.summary())),
                CheckStatus::Success => {}
            }
            status = status.escalate(report.status);
            raw.insert("propagation".into(), serde_json::to_value(&report)?);
        }

        let record_label = record_type.to_string();
        let mut message = match (base_failure, status) {
            (Some(base_message), _) if issues.is_empty() => base_message,
            (Some(base_message), _) => format!("{base_message} ({})", issues.join(", ")),
            (None, CheckStatus::Success) => match &settings.expectation {
                Expectation::All(_) => {
                    format!("DNS {record_label} records for {domain} contain all expected values")
                }
                Expectation::One(_) => format!("DNS {record_label} record for {domain} matches expected value"),
                Expectation::Any if records.len() > 1 => format!("DNS {record_label} records found for {domain}"),
                Expectation::Any => format!("DNS {record_label} record found for {domain}"),
            },
            (None, _) if issues.is_empty() => format!("DNS {record_label} record check for {domain} failed"),
            (None, _) => format!("DNS {record_label} record check for {domain} has issues: {}", issues.join(", ")),
        };

        if !records.is_empty() {
            if records.len() <= 5 {
                message.push_str(&format!(". Values: {}", records.join(", ")));
            } else {
                message.push_str(&format!(". Found {} records", records.len()));
            }
        }

        Ok(CheckResult::new(status, message, query_time, raw))
    }
}
