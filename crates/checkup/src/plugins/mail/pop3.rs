use super::session::{MailError, MailSession};
use crate::result::RawData;

async fn command(session: &mut MailSession, line: &str) -> Result<String, MailError> {
    session.send_line(line).await?;
    session.read_line().await
}

async fn greeting(session: &mut MailSession, raw: &mut RawData) -> Result<(), MailError> {
    let greeting = session.read_line().await?;
    raw.insert("greeting".into(), greeting.clone().into());
    if greeting.starts_with("+OK") {
        Ok(())
    } else {
        Err(MailError::Protocol(format!("unexpected POP3 greeting: {}", greeting)))
    }
}

async fn quit(session: &mut MailSession) {
    let _ = command(session, "QUIT").await;
}

/// Greeting and CAPA
pub async fn basic(session: &mut MailSession, raw: &mut RawData) -> Result<String, MailError> {
    greeting(session, raw).await?;

    let mut capabilities = Vec::new();
    let status = command(session, "CAPA").await?;
    if status.starts_with("+OK") {
        loop {
            let line = session.read_line().await?;
            if line == "." {
                break;
            }
            capabilities.push(line);
        }
    }
    raw.insert("capabilities".into(), capabilities.clone().into());

    quit(session).await;

    Ok(if capabilities.is_empty() {
        "POP3 server is operational".to_string()
    } else {
        format!("POP3 server is operational. Capabilities: {}", capabilities.join(", "))
    })
}

/// USER/PASS and a mailbox STAT
pub async fn full(session: &mut MailSession, user: &str, password: &str, raw: &mut RawData) -> Result<String, MailError> {
    greeting(session, raw).await?;

    let reply = command(session, &format!("USER {}", user)).await?;
    if !reply.starts_with("+OK") {
        return Err(MailError::Authentication(format!("POP3 server rejected user {}", user)));
    }
    let reply = command(session, &format!("PASS {}", password)).await?;
    if !reply.starts_with("+OK") {
        return Err(MailError::Authentication(format!("POP3 login failed for user {}", user)));
    }
    raw.insert("authenticated".into(), true.into());

    // +OK <count> <octets>
    let stat = command(session, "STAT").await?;
    let mut fields = stat.split_whitespace().skip(1);
    let count = fields.next().and_then(|n| n.parse::<u64>().ok());
    let size = fields.next().and_then(|n| n.parse::<u64>().ok());

    quit(session).await;

    match (stat.starts_with("+OK"), count) {
        (true, Some(count)) => {
            raw.insert("mailbox_message_count".into(), count.into());
            if let Some(size) = size {
                raw.insert("mailbox_size".into(), size.into());
            }
            Ok(format!(
                "POP3 server is operational, authentication successful for user {}, {} messages in mailbox",
                user, count
            ))
        }
        _ => Ok(format!("POP3 server is operational, authentication successful for user {}", user)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::session::testing::scripted;
    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn test_basic_reads_capa_list() {
        let (mut session, _server) = scripted(
            "+OK POP3 ready\r\n",
            vec![("CAPA", "+OK list follows\r\nUSER\r\nUIDL\r\n.\r\n"), ("QUIT", "+OK bye\r\n")],
        );
        let mut raw = RawData::new();
        let message = basic(&mut session, &mut raw).await.unwrap();

        assert_eq!(message, "POP3 server is operational. Capabilities: USER, UIDL");
        assert_eq!(raw["capabilities"], serde_json::json!(["USER", "UIDL"]));
    }

    #[tokio::test]
    async fn test_basic_without_capa() {
        let (mut session, _server) =
            scripted("+OK ready\r\n", vec![("CAPA", "-ERR unknown command\r\n"), ("QUIT", "+OK\r\n")]);
        let message = basic(&mut session, &mut RawData::new()).await.unwrap();
        assert_eq!(message, "POP3 server is operational");
    }

    #[tokio::test]
    async fn test_full_stat() {
        let (mut session, server) = scripted(
            "+OK ready\r\n",
            vec![
                ("USER alice", "+OK\r\n"),
                ("PASS secret", "+OK logged in\r\n"),
                ("STAT", "+OK 3 1024\r\n"),
                ("QUIT", "+OK bye\r\n"),
            ],
        );
        let mut raw = RawData::new();
        let message = full(&mut session, "alice", "secret", &mut raw).await.unwrap();

        assert!(message.ends_with("3 messages in mailbox"));
        assert_eq!(raw["mailbox_size"], Value::from(1024u64));
        assert_eq!(server.await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_full_bad_password() {
        let (mut session, _server) = scripted(
            "+OK ready\r\n",
            vec![("USER alice", "+OK\r\n"), ("PASS", "-ERR invalid password\r\n")],
        );
        let err = full(&mut session, "alice", "nope", &mut RawData::new()).await.unwrap_err();
        assert!(matches!(err, MailError::Authentication(_)));
    }
}
