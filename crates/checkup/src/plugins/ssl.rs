use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, error, info};
use url::Url;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::config::PluginConfig;
use crate::net::{self, tls};
use crate::plugin::{CheckPlugin, PluginType, validate_required};
use crate::result::{CheckResult, CheckStatus, RawData};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_WARNING_DAYS: i64 = 30;
const DEFAULT_CRITICAL_DAYS: i64 = 14;

/// `ssl_certificate` plugin - TLS certificate validity and expiry
pub struct SslCertificatePlugin {
    config: PluginConfig,
}

/// Fields of the leaf certificate that end up in the result
#[derive(Debug, Clone, PartialEq)]
struct CertificateSummary {
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    subject: String,
    issuer: String,
    version: u32,
    serial_number: String,
    signature_algorithm: String,
    alternative_names: Vec<String>,
}

impl CertificateSummary {
    fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) =
            X509Certificate::from_der(der).map_err(|e| anyhow!("Failed to parse certificate: {}", e))?;

        let validity = cert.validity();
        let not_before = DateTime::from_timestamp(validity.not_before.timestamp(), 0)
            .ok_or_else(|| anyhow!("Invalid notBefore timestamp"))?;
        let not_after = DateTime::from_timestamp(validity.not_after.timestamp(), 0)
            .ok_or_else(|| anyhow!("Invalid notAfter timestamp"))?;

        let mut alternative_names = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => alternative_names.push(format!("DNS:{}", dns)),
                    GeneralName::IPAddress(bytes) => {
                        let ip = match bytes.len() {
                            4 => <[u8; 4]>::try_from(*bytes).ok().map(|b| std::net::IpAddr::from(b).to_string()),
                            16 => <[u8; 16]>::try_from(*bytes).ok().map(|b| std::net::IpAddr::from(b).to_string()),
                            _ => None,
                        };
                        if let Some(ip) = ip {
                            alternative_names.push(format!("IP:{}", ip));
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(Self {
            not_before,
            not_after,
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            version: cert.version().0 + 1,
            serial_number: cert.raw_serial_as_string(),
            signature_algorithm: cert.signature_algorithm.algorithm.to_id_string(),
            alternative_names,
        })
    }

    /// Whole days until expiry, negative once expired
    fn days_until_expiration(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_days()
    }

    fn evaluate(&self, now: DateTime<Utc>, warning_days: i64, critical_days: i64) -> (CheckStatus, String) {
        let days = self.days_until_expiration(now);
        let expires = self.not_after.to_rfc3339();

        if now < self.not_before {
            (
                CheckStatus::Error,
                format!("Certificate not yet valid. Valid from {}", self.not_before.to_rfc3339()),
            )
        } else if now > self.not_after {
            (CheckStatus::Error, format!("Certificate expired on {}", expires))
        } else if days <= critical_days {
            (
                CheckStatus::Error,
                format!("Certificate expires very soon: {} days left (expires on {})", days, expires),
            )
        } else if days <= warning_days {
            (
                CheckStatus::Warning,
                format!("Certificate expiration approaching: {} days left (expires on {})", days, expires),
            )
        } else {
            (CheckStatus::Success, format!("Certificate valid until {} ({} days remaining)", expires, days))
        }
    }
}

/// Host and port from a bare hostname or a URL
fn target(hostname: &str, explicit_port: Option<u64>) -> Result<(String, u16)> {
    let hostname = hostname.trim();
    let (host, url_port) = if hostname.starts_with("http://") || hostname.starts_with("https://") {
        let url = Url::parse(hostname).map_err(|e| anyhow!("Invalid URL: {}", e))?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow!("Invalid URL format: {}. Could not extract hostname.", hostname))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        (host, url.port_or_known_default())
    } else {
        (hostname.to_string(), None)
    };

    if host.is_empty() {
        return Err(anyhow!("hostname must not be empty"));
    }

    let port = match explicit_port {
        Some(port) => u16::try_from(port).ok().filter(|p| *p > 0).ok_or_else(|| anyhow!("Invalid port: {}", port))?,
        None => url_port.unwrap_or(443),
    };
    Ok((host, port))
}

impl SslCertificatePlugin {
    fn target(&self) -> Result<(String, u16)> {
        let hostname = self.config.get_str("hostname").ok_or_else(|| anyhow!("hostname is required"))?;
        let port = match self.config.get("port") {
            None | Some(Value::Null) => None,
            Some(_) => Some(self.config.get_u64("port").ok_or_else(|| anyhow!("port must be a number"))?),
        };
        target(hostname, port)
    }

    fn days_setting(&self, key: &str, default: i64) -> Result<i64> {
        match self.config.get(key) {
            None => Ok(default),
            Some(_) => self
                .config
                .get_i64(key)
                .filter(|d| *d >= 0)
                .ok_or_else(|| anyhow!("{} must be a non-negative integer", key)),
        }
    }

    fn timeout(&self) -> Result<Duration> {
        match self.config.get("timeout") {
            None => Ok(DEFAULT_TIMEOUT),
            Some(_) => self
                .config
                .get_duration_secs("timeout")
                .ok_or_else(|| anyhow!("timeout must be a non-negative number of seconds")),
        }
    }

    fn check_settings(&self) -> Result<()> {
        self.target()?;
        self.timeout()?;
        let warning = self.days_setting("warning_days", DEFAULT_WARNING_DAYS)?;
        let critical = self.days_setting("critical_days", DEFAULT_CRITICAL_DAYS)?;
        if critical > warning {
            return Err(anyhow!("critical_days must not exceed warning_days"));
        }
        Ok(())
    }
}

impl PluginType for SslCertificatePlugin {
    const NAME: &'static str = "ssl_certificate";
    const DESCRIPTION: &'static str = "Check TLS certificate validity and expiration";

    fn required_config() -> &'static [&'static str] {
        &["hostname"]
    }

    fn optional_config() -> &'static [&'static str] {
        &["port", "timeout", "warning_days", "critical_days", "check_chain", "verify_hostname"]
    }

    fn from_config(config: PluginConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl CheckPlugin for SslCertificatePlugin {
    fn config(&self) -> &PluginConfig {
        &self.config
    }

    fn validate_config(&self) -> bool {
        if !validate_required(&self.config, Self::NAME, Self::required_config()) {
            return false;
        }

        match self.check_settings() {
            Ok(()) => true,
            Err(e) => {
                error!(plugin = Self::NAME, error = %e, "Invalid SSL check configuration");
                false
            }
        }
    }

    async fn run_check(&self) -> Result<CheckResult> {
        let (host, port) = self.target()?;
        let timeout_duration = self.timeout()?;
        let warning_days = self.days_setting("warning_days", DEFAULT_WARNING_DAYS)?;
        let critical_days = self.days_setting("critical_days", DEFAULT_CRITICAL_DAYS)?;
        let verify = self.config.get_bool_or("verify_hostname", true);
        let check_chain = self.config.get_bool_or("check_chain", false);

        debug!(host = %host, port, timeout = ?timeout_duration, "Checking TLS certificate");
        let start = Instant::now();

        let handshake = async {
            let stream = net::connect_tcp(&host, port, timeout_duration).await?;
            tls::handshake(stream, &host, verify).await
        };

        let tls_stream = match timeout(timeout_duration, handshake).await {
            Err(_) => {
                return Ok(CheckResult::error_from(
                    format!("Connection timed out after {}s", timeout_duration.as_secs_f64()),
                    "timeout",
                    "Timeout",
                )
                .with_response_time(start.elapsed().as_secs_f64()));
            }
            Ok(Err(e)) => {
                let message = e.to_string();
                let (summary, error_type) = if message.starts_with("TLS handshake failed") {
                    (format!("SSL error: {}", message), "SSLError")
                } else {
                    (format!("Connection error: {}", message), "ConnectionError")
                };
                return Ok(CheckResult::error_from(summary, message, error_type)
                    .with_response_time(start.elapsed().as_secs_f64()));
            }
            Ok(Ok(stream)) => stream,
        };
        let response_time = start.elapsed().as_secs_f64();

        let (_, connection) = tls_stream.get_ref();
        let chain: Vec<Vec<u8>> = connection
            .peer_certificates()
            .map(|certs| certs.iter().map(|c| c.as_ref().to_vec()).collect())
            .unwrap_or_default();
        let leaf = chain.first().ok_or_else(|| anyhow!("Server presented no certificate"))?;
        let summary = CertificateSummary::from_der(leaf)?;

        let now = Utc::now();
        let (status, message) = summary.evaluate(now, warning_days, critical_days);
        info!(host = %host, port, %status, "TLS certificate check finished");

        let mut raw = RawData::new();
        raw.insert("hostname".into(), host.clone().into());
        raw.insert("port".into(), port.into());
        raw.insert("not_before".into(), summary.not_before.to_rfc3339().into());
        raw.insert("not_after".into(), summary.not_after.to_rfc3339().into());
        raw.insert("days_until_expiration".into(), summary.days_until_expiration(now).into());
        raw.insert("subject".into(), summary.subject.into());
        raw.insert("issuer".into(), summary.issuer.into());
        raw.insert("version".into(), summary.version.into());
        raw.insert("serial_number".into(), summary.serial_number.into());
        raw.insert("signature_algorithm".into(), summary.signature_algorithm.into());
        raw.insert("alternative_names".into(), Value::from(summary.alternative_names));

        if check_chain {
            raw.insert("protocol".into(), tls::protocol_name(connection.protocol_version()).into());
            raw.insert(
                "cipher".into(),
                connection
                    .negotiated_cipher_suite()
                    .map(|suite| format!("{:?}", suite.suite()))
                    .unwrap_or_else(|| "unknown".to_string())
                    .into(),
            );
            raw.insert("chain_length".into(), chain.len().into());
        }

        Ok(CheckResult::new(status, message, response_time, raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use serde_json::json;

    fn summary(now: DateTime<Utc>, valid_from_days: i64, valid_for_days: i64) -> CertificateSummary {
        CertificateSummary {
            not_before: now + TimeDelta::days(valid_from_days),
            not_after: now + TimeDelta::days(valid_for_days),
            subject: "CN=example.com".into(),
            issuer: "CN=Test CA".into(),
            version: 3,
            serial_number: "01".into(),
            signature_algorithm: "1.2.840.113549.1.1.11".into(),
            alternative_names: vec!["DNS:example.com".into()],
        }
    }

    #[test]
    fn test_expiry_thresholds() {
        let now = Utc::now();
        // Small offset so whole-day truncation lands on the intended value
        let at = now - TimeDelta::minutes(1);

        assert_eq!(summary(now, -10, 90).evaluate(at, 30, 14).0, CheckStatus::Success);
        assert_eq!(summary(now, -10, 30).evaluate(at, 30, 14).0, CheckStatus::Warning);
        assert_eq!(summary(now, -10, 14).evaluate(at, 30, 14).0, CheckStatus::Error);
        assert_eq!(summary(now, -10, 15).evaluate(at, 30, 14).0, CheckStatus::Warning);
    }

    #[test]
    fn test_outside_validity_window() {
        let now = Utc::now();
        let (status, message) = summary(now, -100, -1).evaluate(now, 30, 14);
        assert_eq!(status, CheckStatus::Error);
        assert!(message.starts_with("Certificate expired on"));

        let (status, message) = summary(now, 2, 300).evaluate(now, 30, 14);
        assert_eq!(status, CheckStatus::Error);
        assert!(message.starts_with("Certificate not yet valid"));
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!(target("example.com", None).unwrap(), ("example.com".to_string(), 443));
        assert_eq!(target("https://example.com/path", None).unwrap(), ("example.com".to_string(), 443));
        assert_eq!(target("http://example.com", None).unwrap(), ("example.com".to_string(), 80));
        assert_eq!(target("https://example.com:8443", None).unwrap(), ("example.com".to_string(), 8443));
        assert_eq!(target("example.com", Some(993)).unwrap(), ("example.com".to_string(), 993));
        assert!(target("https://", None).is_err());
        assert!(target("example.com", Some(70000)).is_err());
    }

    #[test]
    fn test_validate_config() {
        let plugin = |config| SslCertificatePlugin::from_config(PluginConfig::from_value(config).unwrap());
        assert!(plugin(json!({"hostname": "example.com"})).validate_config());
        assert!(!plugin(json!({})).validate_config());
        assert!(!plugin(json!({"hostname": "example.com", "warning_days": 7, "critical_days": 14})).validate_config());
        assert!(!plugin(json!({"hostname": "example.com", "port": "https"})).validate_config());
    }
}
