//! Authoritative-answer and DNSSEC probes.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use hickory_proto::rr::RecordType;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::query::{DnsQuerier, ProbeOptions};

/// Resolver used for DNSSEC probes when neither a nameserver nor a system resolver is known
pub const FALLBACK_VALIDATING_RESOLVER: IpAddr = IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1));

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthoritativeReport {
    pub is_authoritative: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nameserver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempted_nameservers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnssecReport {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_signed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The queried name followed by its parents, stopping at the registrable domain
pub fn enclosing_zones(domain: &str) -> Vec<String> {
    let labels: Vec<&str> = domain.trim_end_matches('.').split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() <= 2 {
        return vec![labels.join(".")];
    }
    (0..=labels.len() - 2).map(|start| labels[start..].join(".")).collect()
}

/// IPv4 addresses of the nameservers of the closest enclosing zone
async fn zone_nameservers(querier: &dyn DnsQuerier, domain: &str, timeout: Duration) -> Vec<IpAddr> {
    for zone in enclosing_zones(domain) {
        let names = match querier.lookup(&zone, RecordType::NS, &[], timeout).await {
            Ok(answer) => answer.records,
            Err(err) => {
                debug!(zone = %zone, error = %err, "No NS records for zone");
                continue;
            }
        };

        let mut addresses = Vec::new();
        for name in &names {
            match querier.lookup(name, RecordType::A, &[], timeout).await {
                Ok(answer) => addresses.extend(answer.records.iter().filter_map(|r| r.parse::<IpAddr>().ok())),
                Err(err) => debug!(nameserver = %name, error = %err, "Failed to resolve nameserver address"),
            }
        }

        if !addresses.is_empty() {
            return addresses;
        }
    }

    Vec::new()
}

/// Ask the zone's own nameservers, without recursion, until one answers authoritatively
pub async fn check_authoritative(
    querier: &dyn DnsQuerier,
    domain: &str,
    record_type: RecordType,
    timeout: Duration,
) -> AuthoritativeReport {
    let nameservers = zone_nameservers(querier, domain, timeout).await;
    if nameservers.is_empty() {
        return AuthoritativeReport {
            is_authoritative: false,
            error: Some(format!("No authoritative nameservers found for {domain}")),
            ..Default::default()
        };
    }

    let options = ProbeOptions { recursion_desired: false, dnssec_ok: false };
    let mut last_error = None;

    for server in &nameservers {
        match querier.probe(domain, record_type, *server, options, timeout).await {
            Ok(flags) if flags.authoritative => {
                return AuthoritativeReport {
                    is_authoritative: true,
                    nameserver: Some(server.to_string()),
                    flags: Some(flags.to_text()),
                    ..Default::default()
                };
            }
            Ok(flags) => debug!(nameserver = %server, flags = %flags.to_text(), "Non-authoritative response"),
            Err(err) => {
                debug!(nameserver = %server, error = %err, "Authoritative probe failed");
                last_error = Some(err.to_string());
            }
        }
    }

    AuthoritativeReport {
        is_authoritative: false,
        attempted_nameservers: nameservers.iter().map(IpAddr::to_string).collect(),
        error: Some(last_error.unwrap_or_else(|| "No authoritative response received".to_string())),
        ..Default::default()
    }
}

/// Ask a validating resolver for the record with DNSSEC requested
pub async fn check_dnssec(
    querier: &dyn DnsQuerier,
    domain: &str,
    record_type: RecordType,
    nameservers: &[IpAddr],
    timeout: Duration,
) -> DnssecReport {
    let server = nameservers
        .first()
        .copied()
        .or_else(|| querier.system_nameserver())
        .unwrap_or(FALLBACK_VALIDATING_RESOLVER);

    let options = ProbeOptions { recursion_desired: true, dnssec_ok: true };
    match querier.probe(domain, record_type, server, options, timeout).await {
        Ok(flags) if flags.is_server_failure() => DnssecReport {
            is_valid: false,
            is_signed: Some(true),
            flags: Some(flags.to_text()),
            error: Some("DNSSEC validation failed (SERVFAIL)".into()),
        },
        Ok(flags) => DnssecReport {
            is_valid: true,
            is_signed: Some(flags.authentic_data),
            flags: Some(flags.to_text()),
            error: None,
        },
        Err(err) => DnssecReport { is_valid: false, is_signed: None, flags: None, error: Some(err.to_string()) },
    }
}
