use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

use super::session::{MailError, MailSession};
use crate::result::RawData;

const EHLO_NAME: &str = "checkup.local";

/// A possibly multi-line SMTP reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    fn expect(self, codes: &[u16], step: &str) -> Result<Self, MailError> {
        if codes.contains(&self.code) {
            Ok(self)
        } else {
            Err(MailError::Protocol(format!("{} failed: {} {}", step, self.code, self.text())))
        }
    }
}

pub async fn read_reply(session: &mut MailSession) -> Result<Reply, MailError> {
    let mut lines = Vec::new();
    loop {
        let line = session.read_line().await?;
        let code = line
            .get(..3)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| MailError::Protocol(format!("malformed SMTP reply: {}", line)))?;
        let more = line.as_bytes().get(3) == Some(&b'-');
        lines.push(line.get(4..).unwrap_or_default().to_string());
        if !more {
            return Ok(Reply { code, lines });
        }
    }
}

async fn command(session: &mut MailSession, line: &str) -> Result<Reply, MailError> {
    session.send_line(line).await?;
    read_reply(session).await
}

/// EHLO keywords mapped to their parameters
fn extensions(reply: &Reply) -> BTreeMap<String, String> {
    reply
        .lines
        .iter()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.splitn(2, ' ');
            let keyword = parts.next()?.trim().to_ascii_uppercase();
            if keyword.is_empty() {
                return None;
            }
            Some((keyword, parts.next().unwrap_or_default().trim().to_string()))
        })
        .collect()
}

async fn quit(session: &mut MailSession) {
    // The server may drop the connection without replying
    if session.send_line("QUIT").await.is_ok() {
        let _ = read_reply(session).await;
    }
}

/// Greeting and EHLO only; reports the advertised extensions
pub async fn basic(session: &mut MailSession, raw: &mut RawData) -> Result<String, MailError> {
    let greeting = read_reply(session).await?.expect(&[220], "Greeting")?;
    raw.insert("greeting".into(), greeting.text().into());

    let ehlo = command(session, &format!("EHLO {}", EHLO_NAME)).await?;
    raw.insert("ehlo_code".into(), ehlo.code.into());
    raw.insert("ehlo_message".into(), ehlo.text().into());
    let ehlo = ehlo.expect(&[250], "EHLO")?;

    let extensions = extensions(&ehlo);
    let supports_tls = extensions.contains_key("STARTTLS");
    raw.insert("supports_tls".into(), supports_tls.into());
    raw.insert(
        "extensions".into(),
        Value::Object(extensions.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect()),
    );

    quit(session).await;

    let names: Vec<&str> = extensions.keys().map(String::as_str).collect();
    Ok(if names.is_empty() {
        "SMTP server is operational".to_string()
    } else {
        format!("SMTP server is operational. Supports: {}", names.join(", "))
    })
}

/// Options of the authenticated SMTP path
#[derive(Debug, Clone, Default)]
pub struct SmtpOptions {
    pub starttls: bool,
    pub credentials: Option<(String, String)>,
    pub test_message: Option<TestMessage>,
}

#[derive(Debug, Clone)]
pub struct TestMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

fn auth_plain(user: &str, password: &str) -> String {
    STANDARD.encode(format!("\0{}\0{}", user, password))
}

/// Optional STARTTLS upgrade, AUTH PLAIN and an optional test message
pub async fn full(
    mut session: MailSession,
    host: &str,
    options: &SmtpOptions,
    raw: &mut RawData,
) -> Result<String, MailError> {
    let greeting = read_reply(&mut session).await?.expect(&[220], "Greeting")?;
    raw.insert("greeting".into(), greeting.text().into());

    let ehlo = command(&mut session, &format!("EHLO {}", EHLO_NAME)).await?.expect(&[250], "EHLO")?;
    raw.insert("ehlo_code".into(), ehlo.code.into());

    if options.starttls && !session.is_secure() {
        let reply = command(&mut session, "STARTTLS").await?.expect(&[220], "STARTTLS")?;
        raw.insert("tls_response".into(), reply.text().into());
        session = session.start_tls(host).await?;
        command(&mut session, &format!("EHLO {}", EHLO_NAME)).await?.expect(&[250], "EHLO after STARTTLS")?;
    }
    raw.insert("tls".into(), session.is_secure().into());

    let mut parts = vec!["SMTP server is operational".to_string()];

    if let Some((user, password)) = &options.credentials {
        let reply = command(&mut session, &format!("AUTH PLAIN {}", auth_plain(user, password))).await?;
        match reply.code {
            235 => {
                raw.insert("authenticated".into(), true.into());
                parts.push(format!("authentication successful for user {}", user));
            }
            530 | 534 | 535 | 538 => {
                return Err(MailError::Authentication(format!("SMTP authentication failed for user {}", user)));
            }
            _ => return Err(MailError::Protocol(format!("AUTH failed: {} {}", reply.code, reply.text()))),
        }
    }

    if let Some(message) = &options.test_message {
        command(&mut session, &format!("MAIL FROM:<{}>", message.from)).await?.expect(&[250], "MAIL FROM")?;
        command(&mut session, &format!("RCPT TO:<{}>", message.to)).await?.expect(&[250, 251], "RCPT TO")?;
        command(&mut session, "DATA").await?.expect(&[354], "DATA")?;

        session.send_line(&format!("From: {}", message.from)).await?;
        session.send_line(&format!("To: {}", message.to)).await?;
        session.send_line(&format!("Subject: {}", message.subject)).await?;
        session.send_line("").await?;
        for line in message.body.lines() {
            // Dot-stuffing keeps a leading "." from ending the data section
            if line.starts_with('.') {
                session.send_line(&format!(".{}", line)).await?;
            } else {
                session.send_line(line).await?;
            }
        }
        let accepted = command(&mut session, ".").await?.expect(&[250], "Message submission")?;
        raw.insert("test_send_success".into(), true.into());
        raw.insert("test_send_response".into(), accepted.text().into());
        parts.push(format!("test message sent to {}", message.to));
    }

    quit(&mut session).await;
    Ok(parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::super::session::testing::scripted;
    use super::*;

    #[test]
    fn test_auth_plain_encoding() {
        assert_eq!(auth_plain("user", "pass"), "AHVzZXIAcGFzcw==");
    }

    #[test]
    fn test_extensions_parse() {
        let reply = Reply {
            code: 250,
            lines: vec!["mx.example.com".into(), "SIZE 35882577".into(), "starttls".into(), "AUTH PLAIN LOGIN".into()],
        };
        let ext = extensions(&reply);
        assert_eq!(ext.get("SIZE").map(String::as_str), Some("35882577"));
        assert!(ext.contains_key("STARTTLS"));
        assert_eq!(ext.get("AUTH").map(String::as_str), Some("PLAIN LOGIN"));
    }

    #[tokio::test]
    async fn test_multiline_reply() {
        let (mut session, _server) =
            scripted("250-first\r\n250-second\r\n250 last\r\n", vec![]);
        let reply = read_reply(&mut session).await.unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(reply.lines, vec!["first", "second", "last"]);
    }

    #[tokio::test]
    async fn test_basic_reports_extensions() {
        let (mut session, server) = scripted(
            "220 mx.example.com ESMTP\r\n",
            vec![
                ("EHLO", "250-mx.example.com\r\n250-PIPELINING\r\n250 STARTTLS\r\n"),
                ("QUIT", "221 bye\r\n"),
            ],
        );
        let mut raw = RawData::new();
        let message = basic(&mut session, &mut raw).await.unwrap();

        assert_eq!(message, "SMTP server is operational. Supports: PIPELINING, STARTTLS");
        assert_eq!(raw["supports_tls"], Value::Bool(true));
        assert_eq!(raw["ehlo_code"], Value::from(250));
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_full_auth_and_send() {
        let (session, server) = scripted(
            "220 ready\r\n",
            vec![
                ("EHLO", "250 ok\r\n"),
                ("AUTH PLAIN", "235 accepted\r\n"),
                ("MAIL FROM:<a@example.com>", "250 ok\r\n"),
                ("RCPT TO:<b@example.com>", "250 ok\r\n"),
                ("DATA", "354 go ahead\r\n"),
                ("From:", ""),
                ("To:", ""),
                ("Subject:", ""),
                ("", ""),
                ("..hidden", ""),
                (".", "250 queued\r\n"),
                ("QUIT", "221 bye\r\n"),
            ],
        );
        let options = SmtpOptions {
            starttls: false,
            credentials: Some(("user".into(), "secret".into())),
            test_message: Some(TestMessage {
                from: "a@example.com".into(),
                to: "b@example.com".into(),
                subject: "probe".into(),
                body: ".hidden".into(),
            }),
        };
        let mut raw = RawData::new();
        let message = full(session, "mx.example.com", &options, &mut raw).await.unwrap();

        assert!(message.contains("authentication successful for user user"));
        assert!(message.contains("test message sent to b@example.com"));
        assert_eq!(raw["test_send_success"], Value::Bool(true));
        let sent = server.await.unwrap();
        assert_eq!(sent[9], "..hidden");
    }

    #[tokio::test]
    async fn test_full_rejected_credentials() {
        let (session, _server) = scripted(
            "220 ready\r\n",
            vec![("EHLO", "250 ok\r\n"), ("AUTH PLAIN", "535 5.7.8 bad credentials\r\n")],
        );
        let options = SmtpOptions { credentials: Some(("user".into(), "wrong".into())), ..Default::default() };
        let err = full(session, "mx.example.com", &options, &mut RawData::new()).await.unwrap_err();
        assert!(matches!(err, MailError::Authentication(_)));
    }
}
