//! Mail server checks for SMTP, IMAP and POP3.
//!
//! Without credentials the plugin only verifies that the server greets and
//! answers a capability query. With credentials (or an SMTP test message)
//! it logs in and exercises the mailbox or submission path.

pub mod imap;
pub mod pop3;
pub mod session;
pub mod smtp;

pub use session::{MailError, MailSession};

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use hickory_proto::rr::RecordType;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::dns::records::parse_mx;
use super::dns::{DnsQuerier, HickoryQuerier};
use crate::config::PluginConfig;
use crate::plugin::{CheckPlugin, PluginType, validate_required};
use crate::result::{CheckResult, CheckStatus, RawData};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SUBJECT: &str = "Checkup test message";
const DEFAULT_BODY: &str = "This is a test message sent by checkup to verify mail delivery.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Smtp,
    Imap,
    Pop3,
}

impl Protocol {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "smtp" => Some(Protocol::Smtp),
            "imap" => Some(Protocol::Imap),
            "pop3" => Some(Protocol::Pop3),
            _ => None,
        }
    }

    /// Well-known port for implicit TLS or plain connections
    pub fn default_port(self, use_ssl: bool) -> u16 {
        match (self, use_ssl) {
            (Protocol::Smtp, true) => 465,
            (Protocol::Smtp, false) => 25,
            (Protocol::Imap, true) => 993,
            (Protocol::Imap, false) => 143,
            (Protocol::Pop3, true) => 995,
            (Protocol::Pop3, false) => 110,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Smtp => "SMTP",
            Protocol::Imap => "IMAP",
            Protocol::Pop3 => "POP3",
        })
    }
}

#[derive(Debug, Clone)]
struct MailSettings {
    hostname: String,
    protocol: Protocol,
    port: u16,
    use_ssl: bool,
    use_tls: bool,
    timeout: Duration,
    credentials: Option<(String, String)>,
    test_message: Option<smtp::TestMessage>,
    resolve_mx: bool,
}

impl MailSettings {
    fn from_config(config: &PluginConfig) -> Result<Self, String> {
        let hostname = config
            .get_str("hostname")
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| "hostname must be a non-empty string".to_string())?
            .to_string();

        let protocol_text = config.get_str("protocol").unwrap_or_default();
        let protocol = Protocol::parse(protocol_text)
            .ok_or_else(|| format!("Invalid protocol: {protocol_text}. Must be one of: smtp, imap, pop3"))?;

        let use_ssl = config.get_bool_or("use_ssl", false);
        let port = match config.get("port") {
            Some(_) => config
                .get_u64("port")
                .and_then(|p| u16::try_from(p).ok())
                .filter(|p| *p > 0)
                .ok_or_else(|| "port must be between 1 and 65535".to_string())?,
            None => protocol.default_port(use_ssl),
        };

        let timeout = match config.get("timeout") {
            Some(_) => config
                .get_duration_secs("timeout")
                .ok_or_else(|| "timeout must be a non-negative number of seconds".to_string())?,
            None => DEFAULT_TIMEOUT,
        };

        let credentials = match (config.get_str("username"), config.get_str("password")) {
            (Some(user), Some(password)) => {
                Some((single_line("username", user)?.to_string(), single_line("password", password)?.to_string()))
            }
            (Some(_), None) => return Err("Password is required when username is provided".into()),
            _ => None,
        };

        let test_message = if config.get_bool_or("test_send", false) {
            match (config.get_str("from_email"), config.get_str("to_email")) {
                (Some(from), Some(to)) => Some(smtp::TestMessage {
                    from: single_line("from_email", from)?.to_string(),
                    to: single_line("to_email", to)?.to_string(),
                    subject: single_line("subject", &config.get_string_or("subject", DEFAULT_SUBJECT))?.to_string(),
                    body: config.get_string_or("message", DEFAULT_BODY),
                }),
                _ => return Err("When test_send is enabled, from_email and to_email are required".into()),
            }
        } else {
            None
        };

        Ok(Self {
            hostname,
            protocol,
            port,
            use_ssl,
            use_tls: config.get_bool_or("use_tls", false),
            timeout,
            credentials,
            test_message,
            resolve_mx: config.get_bool_or("resolve_mx", false),
        })
    }

    /// Whether the check logs in or submits mail instead of only probing
    fn is_authenticated(&self) -> bool {
        self.credentials.is_some() || (self.protocol == Protocol::Smtp && self.test_message.is_some())
    }

    /// MX lookups only make sense for domain names, not literal addresses
    fn wants_mx(&self) -> bool {
        self.resolve_mx
            && self.hostname.contains('.')
            && !self.hostname.starts_with(|c: char| c.is_ascii_digit())
    }
}

/// Values sent inside a command or header line must not carry line breaks
fn single_line<'a>(key: &str, value: &'a str) -> Result<&'a str, String> {
    if value.contains(['\r', '\n']) {
        Err(format!("{key} must not contain line breaks"))
    } else {
        Ok(value)
    }
}

/// `mail_server` plugin
pub struct MailServerPlugin {
    config: PluginConfig,
    querier: Arc<dyn DnsQuerier>,
}

impl MailServerPlugin {
    pub fn new(config: PluginConfig, querier: Arc<dyn DnsQuerier>) -> Self {
        Self { config, querier }
    }

    /// Resolve the exchange with the lowest preference value for `domain`
    async fn resolve_mx(&self, domain: &str, limit: Duration, raw: &mut RawData) -> Option<String> {
        match self.querier.lookup(domain, RecordType::MX, &[], limit).await {
            Ok(answer) => {
                let mut exchanges: Vec<(u16, String)> = answer.records.iter().filter_map(|r| parse_mx(r)).collect();
                exchanges.sort();
                raw.insert(
                    "mx_records".into(),
                    exchanges.iter().map(|(_, name)| name.clone()).collect::<Vec<_>>().into(),
                );
                let (_, exchange) = exchanges.into_iter().next()?;
                info!(domain, exchange = %exchange, "Using highest priority MX record");
                raw.insert("hostname_used".into(), exchange.clone().into());
                Some(exchange)
            }
            Err(err) => {
                warn!(domain, error = %err, "Could not resolve MX records");
                raw.insert("mx_error".into(), err.to_string().into());
                None
            }
        }
    }

    async fn converse(&self, settings: &MailSettings, raw: &mut RawData) -> Result<String, MailError> {
        let port = settings.port;

        if !settings.is_authenticated() {
            let exchange = match settings.wants_mx() {
                true => self.resolve_mx(&settings.hostname, settings.timeout, raw).await,
                false => None,
            };
            let host = exchange.as_deref().unwrap_or(&settings.hostname);
            let location = match &exchange {
                Some(exchange) => format!("for {} (using {}:{})", settings.hostname, exchange, port),
                None => format!("{}:{}", host, port),
            };

            let mut session = MailSession::connect(host, port, settings.use_ssl, settings.timeout).await?;
            let message = match settings.protocol {
                Protocol::Smtp => smtp::basic(&mut session, raw).await?,
                Protocol::Imap => imap::basic(&mut session, raw).await?,
                Protocol::Pop3 => pop3::basic(&mut session, raw).await?,
            };
            return Ok(message.replacen("server is operational", &format!("server {location} is operational"), 1));
        }

        let host = settings.hostname.as_str();
        let mut session = MailSession::connect(host, port, settings.use_ssl, settings.timeout).await?;
        match (settings.protocol, &settings.credentials) {
            (Protocol::Smtp, credentials) => {
                let options = smtp::SmtpOptions {
                    starttls: settings.use_tls && !settings.use_ssl,
                    credentials: credentials.clone(),
                    test_message: settings.test_message.clone(),
                };
                smtp::full(session, host, &options, raw).await
            }
            (Protocol::Imap, Some((user, password))) => imap::full(&mut session, user, password, raw).await,
            (Protocol::Pop3, Some((user, password))) => pop3::full(&mut session, user, password, raw).await,
            (protocol, None) => Err(MailError::Protocol(format!("{protocol} login requires credentials"))),
        }
    }
}

impl PluginType for MailServerPlugin {
    const NAME: &'static str = "mail_server";
    const DESCRIPTION: &'static str = "Check SMTP, IMAP or POP3 server connectivity and optionally authenticate";

    fn required_config() -> &'static [&'static str] {
        &["hostname", "protocol"]
    }

    fn optional_config() -> &'static [&'static str] {
        &[
            "port",
            "username",
            "password",
            "use_ssl",
            "use_tls",
            "timeout",
            "from_email",
            "to_email",
            "test_send",
            "subject",
            "message",
            "resolve_mx",
        ]
    }

    fn from_config(config: PluginConfig) -> Self {
        Self::new(config, Arc::new(HickoryQuerier::default()))
    }
}

#[async_trait::async_trait]
impl CheckPlugin for MailServerPlugin {
    fn config(&self) -> &PluginConfig {
        &self.config
    }

    fn validate_config(&self) -> bool {
        if !validate_required(&self.config, Self::NAME, Self::required_config()) {
            return false;
        }
        match MailSettings::from_config(&self.config) {
            Ok(_) => true,
            Err(reason) => {
                error!(plugin = Self::NAME, %reason, "Invalid mail server configuration");
                false
            }
        }
    }

    async fn run_check(&self) -> anyhow::Result<CheckResult> {
        let settings = MailSettings::from_config(&self.config).map_err(|e| anyhow!(e))?;
        debug!(hostname = %settings.hostname, protocol = %settings.protocol, port = settings.port, "Checking mail server");

        let mut raw = RawData::new();
        raw.insert("hostname".into(), settings.hostname.clone().into());
        raw.insert("protocol".into(), settings.protocol.to_string().to_ascii_lowercase().into());
        raw.insert("port".into(), settings.port.into());
        raw.insert("use_ssl".into(), settings.use_ssl.into());

        let started = Instant::now();
        let outcome = timeout(settings.timeout, self.converse(&settings, &mut raw)).await;
        let elapsed = started.elapsed().as_secs_f64();

        let result = match outcome {
            Ok(Ok(message)) => CheckResult::new(CheckStatus::Success, message, elapsed, raw),
            Ok(Err(err)) => {
                raw.insert("error".into(), err.to_string().into());
                raw.insert("error_type".into(), err.error_type().into());
                let message = match &err {
                    MailError::Authentication(detail) => detail.clone(),
                    other => format!("{} check failed for {}:{}: {}", settings.protocol, settings.hostname, settings.port, other),
                };
                CheckResult::new(CheckStatus::Error, message, elapsed, raw)
            }
            Err(_) => {
                let message = format!("Connection timed out after {}s", settings.timeout.as_secs_f64());
                raw.insert("error".into(), "timeout".into());
                raw.insert("error_type".into(), "Timeout".into());
                CheckResult::new(CheckStatus::Error, message, elapsed, raw)
            }
        };

        info!(status = %result.status(), message = result.message(), "Mail server check finished");
        Ok(result)
    }
}
