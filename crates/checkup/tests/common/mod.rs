//! Shared fixtures: a scripted DNS querier and small test plugins.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use checkup::plugins::dns::{DnsAnswer, DnsQuerier, DnsQueryError, ProbeOptions, ResponseFlags};
use checkup::{CheckPlugin, CheckResult, PluginConfig, PluginRegistry, PluginType};
use hickory_proto::rr::RecordType;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn config(value: serde_json::Value) -> PluginConfig {
    PluginConfig::from_value(value).expect("config must be a JSON object")
}

/// Querier answering from fixed tables and recording every lookup
pub struct FakeQuerier {
    /// Answer for lookups without explicit servers
    pub system: Result<DnsAnswer, DnsQueryError>,
    /// Answers keyed by the single server queried
    pub servers: HashMap<IpAddr, Result<DnsAnswer, DnsQueryError>>,
    pub fallback: Result<DnsAnswer, DnsQueryError>,
    /// System-resolver answers for specific names, e.g. a zone's NS set
    pub named: HashMap<(String, RecordType), Result<DnsAnswer, DnsQueryError>>,
    /// Probe replies keyed by server; unknown servers time out
    pub probes: HashMap<IpAddr, Result<ResponseFlags, DnsQueryError>>,
    pub calls: Mutex<Vec<Vec<IpAddr>>>,
}

impl FakeQuerier {
    pub fn new(system: Result<DnsAnswer, DnsQueryError>) -> Self {
        Self {
            system,
            servers: HashMap::new(),
            fallback: Err(DnsQueryError::Timeout),
            named: HashMap::new(),
            probes: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn answering(records: &[&str]) -> Self {
        Self::new(Ok(answer(records)))
    }

    pub fn with_server(mut self, server: &str, reply: Result<DnsAnswer, DnsQueryError>) -> Self {
        self.servers.insert(server.parse().expect("valid ip"), reply);
        self
    }

    pub fn with_fallback(mut self, reply: Result<DnsAnswer, DnsQueryError>) -> Self {
        self.fallback = reply;
        self
    }

    pub fn with_record(mut self, name: &str, record_type: RecordType, reply: Result<DnsAnswer, DnsQueryError>) -> Self {
        self.named.insert((name.to_string(), record_type), reply);
        self
    }

    /// Make `domain` a zone served by `nameserver` at `address`
    pub fn with_zone(self, domain: &str, nameserver: &str, address: &str) -> Self {
        self.with_record(domain, RecordType::NS, Ok(answer(&[nameserver])))
            .with_record(nameserver, RecordType::A, Ok(answer(&[address])))
    }

    pub fn with_probe(mut self, server: &str, reply: Result<ResponseFlags, DnsQueryError>) -> Self {
        self.probes.insert(server.parse().expect("valid ip"), reply);
        self
    }

    /// Number of lookups sent to `server`
    pub fn calls_to(&self, server: &str) -> usize {
        let server: IpAddr = server.parse().expect("valid ip");
        self.calls.lock().unwrap().iter().filter(|servers| servers.as_slice() == [server]).count()
    }
}

pub fn answer(records: &[&str]) -> DnsAnswer {
    DnsAnswer::new(records.iter().map(|r| r.to_string()).collect())
}

/// Probe response header with the given rcode and AA/AD bits
pub fn flags(response_code: &str, authoritative: bool, authentic_data: bool) -> ResponseFlags {
    ResponseFlags { response_code: response_code.to_string(), authoritative, authentic_data, ..Default::default() }
}

#[async_trait::async_trait]
impl DnsQuerier for FakeQuerier {
    async fn lookup(
        &self,
        name: &str,
        record_type: RecordType,
        servers: &[IpAddr],
        _timeout: Duration,
    ) -> Result<DnsAnswer, DnsQueryError> {
        self.calls.lock().unwrap().push(servers.to_vec());
        if servers.is_empty() {
            if let Some(reply) = self.named.get(&(name.trim_end_matches('.').to_string(), record_type)) {
                return reply.clone();
            }
        }
        if record_type == RecordType::NS {
            return Err(DnsQueryError::NoAnswer);
        }
        match servers {
            [] => self.system.clone(),
            [server] => self.servers.get(server).cloned().unwrap_or_else(|| self.fallback.clone()),
            _ => self.fallback.clone(),
        }
    }

    async fn probe(
        &self,
        _name: &str,
        _record_type: RecordType,
        server: IpAddr,
        _options: ProbeOptions,
        _timeout: Duration,
    ) -> Result<ResponseFlags, DnsQueryError> {
        self.probes.get(&server).cloned().unwrap_or(Err(DnsQueryError::Timeout))
    }

    fn system_nameserver(&self) -> Option<IpAddr> {
        None
    }
}

/// Returns the result described by its config: `status` and `message`
pub struct StaticPlugin {
    config: PluginConfig,
}

#[async_trait::async_trait]
impl CheckPlugin for StaticPlugin {
    fn config(&self) -> &PluginConfig {
        &self.config
    }

    fn validate_config(&self) -> bool {
        self.config.get_str("status").is_some()
    }

    async fn run_check(&self) -> anyhow::Result<CheckResult> {
        let status = self.config.get_str("status").unwrap_or("success");
        let message = self.config.get_string_or("message", "static");
        Ok(CheckResult::from_status_str(status, message, 0.0, Default::default())?)
    }
}

impl PluginType for StaticPlugin {
    const NAME: &'static str = "static";
    const DESCRIPTION: &'static str = "Returns a fixed result";

    fn required_config() -> &'static [&'static str] {
        &["status"]
    }

    fn from_config(config: PluginConfig) -> Self {
        Self { config }
    }
}

/// Fails with an I/O error
pub struct FailingPlugin {
    config: PluginConfig,
}

#[async_trait::async_trait]
impl CheckPlugin for FailingPlugin {
    fn config(&self) -> &PluginConfig {
        &self.config
    }

    fn validate_config(&self) -> bool {
        true
    }

    async fn run_check(&self) -> anyhow::Result<CheckResult> {
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset by peer").into())
    }
}

impl PluginType for FailingPlugin {
    const NAME: &'static str = "failing";
    const DESCRIPTION: &'static str = "Always fails";

    fn required_config() -> &'static [&'static str] {
        &[]
    }

    fn from_config(config: PluginConfig) -> Self {
        Self { config }
    }
}

/// Panics while running
pub struct PanickingPlugin {
    config: PluginConfig,
}

#[async_trait::async_trait]
impl CheckPlugin for PanickingPlugin {
    fn config(&self) -> &PluginConfig {
        &self.config
    }

    fn validate_config(&self) -> bool {
        true
    }

    async fn run_check(&self) -> anyhow::Result<CheckResult> {
        panic!("plugin exploded");
    }
}

impl PluginType for PanickingPlugin {
    const NAME: &'static str = "panicking";
    const DESCRIPTION: &'static str = "Always panics";

    fn required_config() -> &'static [&'static str] {
        &[]
    }

    fn from_config(config: PluginConfig) -> Self {
        Self { config }
    }
}

/// Sleeps for `millis` before succeeding
pub struct SleepingPlugin {
    config: PluginConfig,
}

#[async_trait::async_trait]
impl CheckPlugin for SleepingPlugin {
    fn config(&self) -> &PluginConfig {
        &self.config
    }

    fn validate_config(&self) -> bool {
        true
    }

    async fn run_check(&self) -> anyhow::Result<CheckResult> {
        let millis = self.config.get_u64("millis").unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(CheckResult::success(format!("slept {millis}ms")))
    }
}

impl PluginType for SleepingPlugin {
    const NAME: &'static str = "sleeping";
    const DESCRIPTION: &'static str = "Sleeps, then succeeds";

    fn required_config() -> &'static [&'static str] {
        &[]
    }

    fn from_config(config: PluginConfig) -> Self {
        Self { config }
    }
}

/// Tracks how many instances run at the same time
#[derive(Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    pub peak: AtomicUsize,
}

pub struct GaugedPlugin {
    config: PluginConfig,
    gauge: Arc<ConcurrencyGauge>,
}

#[async_trait::async_trait]
impl CheckPlugin for GaugedPlugin {
    fn config(&self) -> &PluginConfig {
        &self.config
    }

    fn validate_config(&self) -> bool {
        true
    }

    async fn run_check(&self) -> anyhow::Result<CheckResult> {
        let now = self.gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
        Ok(CheckResult::success("measured"))
    }
}

impl PluginType for GaugedPlugin {
    const NAME: &'static str = "gauged";
    const DESCRIPTION: &'static str = "Records peak concurrency";

    fn required_config() -> &'static [&'static str] {
        &[]
    }

    fn from_config(config: PluginConfig) -> Self {
        Self { config, gauge: Arc::default() }
    }
}

/// Registry holding every test plugin; `gauged` shares `gauge`
pub fn test_registry(gauge: Arc<ConcurrencyGauge>) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register_type::<StaticPlugin>().unwrap();
    registry.register_type::<FailingPlugin>().unwrap();
    registry.register_type::<PanickingPlugin>().unwrap();
    registry.register_type::<SleepingPlugin>().unwrap();
    registry
        .register_type_with(move |config| GaugedPlugin { config, gauge: Arc::clone(&gauge) })
        .unwrap();
    registry
}
