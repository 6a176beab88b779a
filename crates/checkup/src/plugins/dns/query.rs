//! Resolver access behind an injectable trait.
//!
//! [`DnsQuerier`] is the only way the DNS code talks to the network, so the
//! propagation and composition logic can run against a scripted fake.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Edns, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RecordType};
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tracing::debug;

use super::records::format_rdata;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnsQueryError {
    #[error("NXDOMAIN")]
    NxDomain,

    #[error("NoAnswer")]
    NoAnswer,

    #[error("Timeout")]
    Timeout,

    #[error("Server failure: {0}")]
    ServerFailure(String),

    #[error("{0}")]
    Transport(String),

    #[error("Invalid domain name: {0}")]
    InvalidName(String),
}

impl DnsQueryError {
    /// Short tag reported in result data
    pub fn tag(&self) -> &'static str {
        match self {
            DnsQueryError::NxDomain => "NXDOMAIN",
            DnsQueryError::NoAnswer => "NoAnswer",
            DnsQueryError::Timeout => "Timeout",
            DnsQueryError::ServerFailure(_) => "ServerFailure",
            DnsQueryError::Transport(_) => "Transport",
            DnsQueryError::InvalidName(_) => "InvalidName",
        }
    }
}

/// Answer of a successful lookup, already rendered as text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsAnswer {
    pub records: Vec<String>,
    pub ttl: Option<u32>,
}

impl DnsAnswer {
    pub fn new(records: Vec<String>) -> Self {
        Self { records, ttl: None }
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Flags requested on a raw probe query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeOptions {
    pub recursion_desired: bool,
    /// Set the EDNS DO bit and request authenticated data
    pub dnssec_ok: bool,
}

/// Header of a probe response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseFlags {
    pub response_code: String,
    pub authoritative: bool,
    pub authentic_data: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub truncated: bool,
}

impl ResponseFlags {
    /// Flags in presentation form, e.g. `QR AA RD`
    pub fn to_text(&self) -> String {
        let mut flags = vec!["QR"];
        if self.authoritative {
            flags.push("AA");
        }
        if self.truncated {
            flags.push("TC");
        }
        if self.recursion_desired {
            flags.push("RD");
        }
        if self.recursion_available {
            flags.push("RA");
        }
        if self.authentic_data {
            flags.push("AD");
        }
        flags.join(" ")
    }

    pub fn is_server_failure(&self) -> bool {
        self.response_code == "SERVFAIL"
    }
}

#[async_trait::async_trait]
pub trait DnsQuerier: Send + Sync {
    /// Resolve `name` through `servers`, or the system resolver when empty
    async fn lookup(
        &self,
        name: &str,
        record_type: RecordType,
        servers: &[IpAddr],
        timeout: Duration,
    ) -> Result<DnsAnswer, DnsQueryError>;

    /// Send one query directly to `server` and report the response header
    async fn probe(
        &self,
        name: &str,
        record_type: RecordType,
        server: IpAddr,
        options: ProbeOptions,
        timeout: Duration,
    ) -> Result<ResponseFlags, DnsQueryError>;

    /// First nameserver of the host configuration, if any
    fn system_nameserver(&self) -> Option<IpAddr>;
}

/// Parse a domain into an absolute name
pub fn parse_name(name: &str) -> Result<Name, DnsQueryError> {
    let mut parsed = Name::from_utf8(name).map_err(|e| DnsQueryError::InvalidName(format!("{name}: {e}")))?;
    parsed.set_fqdn(true);
    Ok(parsed)
}

/// Parse a record type name, case-insensitively
pub fn parse_record_type(value: &str) -> Option<RecordType> {
    match RecordType::from_str(&value.trim().to_ascii_uppercase()) {
        Ok(RecordType::Unknown(_)) | Err(_) => None,
        Ok(record_type) => Some(record_type),
    }
}

fn classify_resolve_error(err: &ResolveError) -> DnsQueryError {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => match *response_code {
            ResponseCode::NXDomain => DnsQueryError::NxDomain,
            ResponseCode::NoError => DnsQueryError::NoAnswer,
            ResponseCode::ServFail => DnsQueryError::ServerFailure(err.to_string()),
            _ => DnsQueryError::Transport(err.to_string()),
        },
        ResolveErrorKind::Timeout => DnsQueryError::Timeout,
        _ => {
            let text = err.to_string();
            if text.contains("timed out") {
                DnsQueryError::Timeout
            } else {
                DnsQueryError::Transport(text)
            }
        }
    }
}

fn rcode_text(code: ResponseCode) -> String {
    match code {
        ResponseCode::NoError => "NOERROR".to_string(),
        ResponseCode::FormErr => "FORMERR".to_string(),
        ResponseCode::ServFail => "SERVFAIL".to_string(),
        ResponseCode::NXDomain => "NXDOMAIN".to_string(),
        ResponseCode::NotImp => "NOTIMP".to_string(),
        ResponseCode::Refused => "REFUSED".to_string(),
        other => format!("{other:?}").to_uppercase(),
    }
}

/// `hickory-resolver` backed querier
///
/// A process-wide budget of in-flight queries is shared by every check using
/// this querier, independent of any per-check concurrency limit.
#[derive(Debug, Clone)]
pub struct HickoryQuerier {
    in_flight: Arc<Semaphore>,
}

impl Default for HickoryQuerier {
    fn default() -> Self {
        Self::new(Self::DEFAULT_IN_FLIGHT)
    }
}

impl HickoryQuerier {
    pub const DEFAULT_IN_FLIGHT: usize = 64;

    pub fn new(max_in_flight: usize) -> Self {
        Self { in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))) }
    }

    fn resolver_for(&self, servers: &[IpAddr], timeout: Duration) -> Result<TokioAsyncResolver, DnsQueryError> {
        if servers.is_empty() {
            let (config, mut opts) = hickory_resolver::system_conf::read_system_conf()
                .map_err(|e| DnsQueryError::Transport(format!("Failed to read system resolver config: {e}")))?;
            opts.timeout = timeout;
            opts.attempts = 1;
            return Ok(TokioAsyncResolver::tokio(config, opts));
        }

        let group = NameServerConfigGroup::from_ips_clear(servers, 53, true);
        let config = ResolverConfig::from_parts(None, vec![], group);
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;
        opts.use_hosts_file = false;
        Ok(TokioAsyncResolver::tokio(config, opts))
    }
}

#[async_trait::async_trait]
impl DnsQuerier for HickoryQuerier {
    async fn lookup(
        &self,
        name: &str,
        record_type: RecordType,
        servers: &[IpAddr],
        timeout: Duration,
    ) -> Result<DnsAnswer, DnsQueryError> {
        let fqdn = parse_name(name)?;
        let resolver = self.resolver_for(servers, timeout)?;

        let work = async {
            let _permit = self
                .in_flight
                .acquire()
                .await
                .map_err(|e| DnsQueryError::Transport(e.to_string()))?;
            resolver.lookup(fqdn, record_type).await.map_err(|e| {
                debug!(name, %record_type, error = %e, "DNS lookup failed");
                classify_resolve_error(&e)
            })
        };
        // The resolver enforces `timeout` per attempt; this bounds the budget wait and the whole lookup.
        let lookup = tokio::time::timeout(timeout + Duration::from_millis(250), work)
            .await
            .map_err(|_| DnsQueryError::Timeout)??;

        let ttl = lookup.record_iter().map(|record| record.ttl()).min();
        let records: Vec<String> = lookup
            .iter()
            .filter(|rdata| rdata.record_type() == record_type)
            .map(format_rdata)
            .collect();

        if records.is_empty() {
            return Err(DnsQueryError::NoAnswer);
        }

        Ok(DnsAnswer { records, ttl })
    }

    async fn probe(
        &self,
        name: &str,
        record_type: RecordType,
        server: IpAddr,
        options: ProbeOptions,
        timeout: Duration,
    ) -> Result<ResponseFlags, DnsQueryError> {
        let fqdn = parse_name(name)?;

        let mut message = Message::new();
        message
            .set_id(rand::random::<u16>())
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(options.recursion_desired);
        message.add_query(Query::query(fqdn, record_type));

        if options.dnssec_ok {
            let mut edns = Edns::new();
            edns.set_dnssec_ok(true);
            edns.set_max_payload(4096);
            message.set_edns(edns);
            message.set_authentic_data(true);
        }

        let request = message.to_vec().map_err(|e| DnsQueryError::Transport(e.to_string()))?;
        let id = message.id();

        let bind: SocketAddr = match server {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };

        let exchange = async {
            let _permit = self
                .in_flight
                .acquire()
                .await
                .map_err(|e| DnsQueryError::Transport(e.to_string()))?;
            let transport = |e: std::io::Error| DnsQueryError::Transport(e.to_string());

            let socket = UdpSocket::bind(bind).await.map_err(transport)?;
            socket.send_to(&request, SocketAddr::new(server, 53)).await.map_err(transport)?;

            let mut buffer = vec![0u8; 4096];
            loop {
                let (len, _) = socket.recv_from(&mut buffer).await.map_err(transport)?;
                if let Ok(response) = Message::from_vec(&buffer[..len]) {
                    if response.id() == id {
                        return Ok::<Message, DnsQueryError>(response);
                    }
                }
            }
        };

        let response = tokio::time::timeout(timeout, exchange).await.map_err(|_| DnsQueryError::Timeout)??;

        Ok(ResponseFlags {
            response_code: rcode_text(response.response_code()),
            authoritative: response.authoritative(),
            authentic_data: response.authentic_data(),
            recursion_desired: response.recursion_desired(),
            recursion_available: response.recursion_available(),
            truncated: response.truncated(),
        })
    }

    fn system_nameserver(&self) -> Option<IpAddr> {
        let (config, _) = hickory_resolver::system_conf::read_system_conf().ok()?;
        config.name_servers().first().map(|ns| ns.socket_addr.ip())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record_type() {
        assert_eq!(parse_record_type("a"), Some(RecordType::A));
        assert_eq!(parse_record_type(" mx "), Some(RecordType::MX));
        assert_eq!(parse_record_type("Txt"), Some(RecordType::TXT));
        assert_eq!(parse_record_type("NOPE"), None);
        assert_eq!(parse_record_type(""), None);
    }

    #[test]
    fn test_parse_name_is_absolute() {
        let name = parse_name("www.example.com").unwrap();
        assert!(name.is_fqdn());
        assert_eq!(name.to_string(), "www.example.com.");
    }

    #[test]
    fn test_flags_text() {
        let flags = ResponseFlags {
            response_code: "NOERROR".into(),
            authoritative: true,
            recursion_desired: false,
            ..Default::default()
        };
        assert_eq!(flags.to_text(), "QR AA");

        let flags = ResponseFlags {
            response_code: "SERVFAIL".into(),
            recursion_desired: true,
            recursion_available: true,
            authentic_data: true,
            ..Default::default()
        };
        assert_eq!(flags.to_text(), "QR RD RA AD");
        assert!(flags.is_server_failure());
    }

    #[test]
    fn test_rcode_text() {
        assert_eq!(rcode_text(ResponseCode::ServFail), "SERVFAIL");
        assert_eq!(rcode_text(ResponseCode::NXDomain), "NXDOMAIN");
    }

    #[tokio::test]
    async fn test_exhausted_budget_wait_is_bounded_by_timeout() {
        let querier = HickoryQuerier::new(1);
        let _held = Arc::clone(&querier.in_flight).acquire_owned().await.unwrap();
        let local: IpAddr = Ipv4Addr::LOCALHOST.into();
        let timeout = Duration::from_millis(100);

        let probe = querier.probe("example.com", RecordType::A, local, ProbeOptions::default(), timeout);
        let probed = tokio::time::timeout(Duration::from_secs(2), probe).await.expect("probe waited on the budget");
        assert_eq!(probed, Err(DnsQueryError::Timeout));

        let servers = [local];
        let lookup = querier.lookup("example.com", RecordType::A, &servers, timeout);
        let looked_up = tokio::time::timeout(Duration::from_secs(2), lookup).await.expect("lookup waited on the budget");
        assert_eq!(looked_up, Err(DnsQueryError::Timeout));
    }

    #[test]
    fn test_error_tags() {
        assert_eq!(DnsQueryError::NxDomain.tag(), "NXDOMAIN");
        assert_eq!(DnsQueryError::NxDomain.to_string(), "NXDOMAIN");
        assert_eq!(DnsQueryError::Transport("x".into()).tag(), "Transport");
    }
}
