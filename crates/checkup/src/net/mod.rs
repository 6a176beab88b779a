//! Connection helpers shared by the TLS and mail plugins.

pub mod tls;

use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Open a TCP connection, failing after `connect_timeout`
pub async fn connect_tcp(host: &str, port: u16, connect_timeout: Duration) -> Result<TcpStream> {
    timeout(connect_timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| anyhow!("TCP connection to {}:{} timed out", host, port))?
        .map_err(|e| anyhow!("TCP connection to {}:{} failed: {}", host, port, e))
}

/// Host names are compared and reported without the DNS root dot.
pub fn trim_root_dot(name: &str) -> &str {
    name.strip_suffix('.').unwrap_or(name)
}
