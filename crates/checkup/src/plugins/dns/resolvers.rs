use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A recursive resolver queried during propagation checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverDescriptor {
    pub ip: IpAddr,
    pub name: String,
    pub provider: String,
}

impl ResolverDescriptor {
    pub fn new(ip: IpAddr, name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self { ip, name: name.into(), provider: provider.into() }
    }

    /// Resolver given only by address
    pub fn custom(ip: IpAddr) -> Self {
        Self { ip, name: ip.to_string(), provider: "Custom".into() }
    }
}

const PUBLIC_RESOLVERS: [(&str, &str, &str); 8] = [
    ("8.8.8.8", "Google DNS", "Google"),
    ("8.8.4.4", "Google DNS", "Google"),
    ("1.1.1.1", "Cloudflare", "Cloudflare"),
    ("1.0.0.1", "Cloudflare", "Cloudflare"),
    ("9.9.9.9", "Quad9", "Quad9"),
    ("149.112.112.112", "Quad9", "Quad9"),
    ("208.67.222.222", "OpenDNS", "OpenDNS"),
    ("208.67.220.220", "OpenDNS", "OpenDNS"),
];

/// Well-known public resolvers used when none are configured
pub fn default_public_resolvers() -> Vec<ResolverDescriptor> {
    PUBLIC_RESOLVERS
        .iter()
        .filter_map(|(ip, name, provider)| {
            ip.parse().ok().map(|ip| ResolverDescriptor::new(ip, *name, *provider))
        })
        .collect()
}

/// Parse a resolver list: IP strings or `{ip, name?, provider?}` objects
pub fn parse_resolvers(value: &Value) -> Result<Vec<ResolverDescriptor>, String> {
    let items = value.as_array().ok_or_else(|| "resolvers must be a list".to_string())?;

    items
        .iter()
        .map(|item| match item {
            Value::String(ip) => ip
                .trim()
                .parse::<IpAddr>()
                .map(ResolverDescriptor::custom)
                .map_err(|_| format!("invalid resolver IP address: {ip}")),
            Value::Object(entry) => {
                let ip = entry
                    .get("ip")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "resolver entry is missing 'ip'".to_string())?;
                let ip: IpAddr =
                    ip.trim().parse().map_err(|_| format!("invalid resolver IP address: {ip}"))?;
                let name = entry.get("name").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| ip.to_string());
                let provider = entry.get("provider").and_then(Value::as_str).unwrap_or("Unknown");
                Ok(ResolverDescriptor::new(ip, name, provider))
            }
            other => Err(format!("invalid resolver entry: {other}")),
        })
        .collect()
}

/// Parse one nameserver IP or a list of them
pub fn parse_nameservers(value: &Value) -> Result<Vec<IpAddr>, String> {
    let parse = |text: &str| text.trim().parse::<IpAddr>().map_err(|_| format!("invalid nameserver IP address: {text}"));

    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(ip) => parse(ip).map(|ip| vec![ip]),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().ok_or_else(|| format!("invalid nameserver entry: {item}")).and_then(parse))
            .collect(),
        other => Err(format!("invalid nameserver value: {other}")),
    }
}
