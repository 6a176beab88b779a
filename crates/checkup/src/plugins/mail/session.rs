//! Line-oriented client session over plain or TLS streams.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tracing::trace;

use crate::net::{self, tls};

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Connection closed by server")]
    Closed,
}

impl MailError {
    pub fn error_type(&self) -> &'static str {
        match self {
            MailError::Connection(_) => "ConnectionError",
            MailError::Tls(_) => "TLSError",
            MailError::Protocol(_) => "ProtocolError",
            MailError::Authentication(_) => "AuthenticationError",
            MailError::Closed => "ConnectionClosed",
        }
    }
}

impl From<std::io::Error> for MailError {
    fn from(err: std::io::Error) -> Self {
        MailError::Connection(err.to_string())
    }
}

pub trait MailStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> MailStream for T {}

/// Lines longer than this are rejected instead of buffered
const MAX_LINE: usize = 64 * 1024;

pub struct MailSession {
    stream: BufStream<Box<dyn MailStream>>,
    secure: bool,
}

impl MailSession {
    /// Connect, wrapping the socket in TLS straight away when `implicit_tls` is set
    pub async fn connect(host: &str, port: u16, implicit_tls: bool, timeout: Duration) -> Result<Self, MailError> {
        let tcp = net::connect_tcp(host, port, timeout)
            .await
            .map_err(|e| MailError::Connection(e.to_string()))?;

        if implicit_tls {
            let stream = tls::handshake(tcp, host, true).await.map_err(|e| MailError::Tls(e.to_string()))?;
            Ok(Self::from_stream(Box::new(stream), true))
        } else {
            Ok(Self::from_stream(Box::new(tcp), false))
        }
    }

    pub fn from_stream(stream: Box<dyn MailStream>, secure: bool) -> Self {
        Self { stream: BufStream::new(stream), secure }
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Read one line without its CRLF terminator
    pub async fn read_line(&mut self) -> Result<String, MailError> {
        let mut line = String::new();
        let read = (&mut self.stream).take(MAX_LINE as u64 + 1).read_line(&mut line).await?;
        if read == 0 {
            return Err(MailError::Closed);
        }
        if read > MAX_LINE {
            return Err(MailError::Protocol("response line too long".into()));
        }

        let line = line.trim_end_matches(['\r', '\n']).to_string();
        trace!(line = %line, "S:");
        Ok(line)
    }

    pub async fn send_line(&mut self, line: &str) -> Result<(), MailError> {
        trace!(line = %redact(line), "C:");
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Upgrade the connection after a successful STARTTLS exchange
    pub async fn start_tls(self, host: &str) -> Result<Self, MailError> {
        let inner = self.stream.into_inner();
        let stream = tls::handshake(inner, host, true).await.map_err(|e| MailError::Tls(e.to_string()))?;
        Ok(Self::from_stream(Box::new(stream), true))
    }
}

/// Keep credentials out of trace logs
fn redact(line: &str) -> String {
    let upper = line.to_ascii_uppercase();
    for prefix in ["AUTH PLAIN ", "PASS ", "A001 LOGIN "] {
        if upper.starts_with(prefix) {
            return format!("{}***", &line[..prefix.len()]);
        }
    }
    line.to_string()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// One step of a scripted server: expected client line prefix and the reply to send
    pub(crate) type Step = (&'static str, &'static str);

    /// Session wired to an in-memory server that sends `greeting`, then answers each step.
    ///
    /// The returned handle yields every line the client sent.
    pub(crate) fn scripted(
        greeting: &'static str,
        steps: Vec<Step>,
    ) -> (MailSession, tokio::task::JoinHandle<Vec<String>>) {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let handle = tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut reader = BufReader::new(read);
            let mut received = Vec::new();

            write.write_all(greeting.as_bytes()).await.unwrap();
            for (expected, reply) in steps {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                let line = line.trim_end().to_string();
                assert!(line.starts_with(expected), "expected {:?}, got {:?}", expected, line);
                received.push(line);
                write.write_all(reply.as_bytes()).await.unwrap();
            }
            received
        });

        (MailSession::from_stream(Box::new(client), false), handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_credentials() {
        assert_eq!(redact("AUTH PLAIN AGZvbwBiYXI="), "AUTH PLAIN ***");
        assert_eq!(redact("pass secret"), "pass ***");
        assert_eq!(redact("EHLO checkup.local"), "EHLO checkup.local");
    }

    #[tokio::test]
    async fn test_read_and_send_lines() {
        let (mut session, server) = testing::scripted("+OK ready\r\n", vec![("QUIT", "+OK bye\r\n")]);

        assert_eq!(session.read_line().await.unwrap(), "+OK ready");
        session.send_line("QUIT").await.unwrap();
        assert_eq!(session.read_line().await.unwrap(), "+OK bye");
        assert!(matches!(session.read_line().await, Err(MailError::Closed)));
        assert_eq!(server.await.unwrap(), vec!["QUIT".to_string()]);
    }

    #[tokio::test]
    async fn test_overlong_line_is_rejected() {
        let (client, mut server) = tokio::io::duplex(4 * 1024);
        tokio::spawn(async move {
            let _ = server.write_all(&vec![b'x'; MAX_LINE * 2]).await;
        });
        let mut session = MailSession::from_stream(Box::new(client), false);

        let err = session.read_line().await.unwrap_err();
        assert!(matches!(err, MailError::Protocol(ref msg) if msg == "response line too long"));
    }

    #[tokio::test]
    async fn test_lines_are_crlf_terminated() {
        let mock = tokio_test::io::Builder::new()
            .read(b"220 ready\r\n")
            .write(b"EHLO checkup.local\r\n")
            .read(b"250 ok\n")
            .build();
        let mut session = MailSession::from_stream(Box::new(mock), false);

        assert_eq!(session.read_line().await.unwrap(), "220 ready");
        session.send_line("EHLO checkup.local").await.unwrap();
        assert_eq!(session.read_line().await.unwrap(), "250 ok");
    }
}
