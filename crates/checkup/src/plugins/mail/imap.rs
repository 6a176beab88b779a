use super::session::{MailError, MailSession};
use crate::result::RawData;

/// Capabilities worth calling out in the result message
const NOTABLE_CAPABILITIES: [&str; 5] = ["IMAP4REV1", "STARTTLS", "IDLE", "UIDPLUS", "AUTH=PLAIN"];

/// Untagged lines and the tagged completion line of one command
struct Response {
    untagged: Vec<String>,
    status: String,
}

impl Response {
    fn is_ok(&self, tag: &str) -> bool {
        self.status.starts_with(&format!("{} OK", tag))
    }
}

async fn command(session: &mut MailSession, tag: &str, command: &str) -> Result<Response, MailError> {
    session.send_line(&format!("{} {}", tag, command)).await?;

    let prefix = format!("{} ", tag);
    let mut untagged = Vec::new();
    loop {
        let line = session.read_line().await?;
        if line.starts_with(&prefix) {
            return Ok(Response { untagged, status: line });
        }
        untagged.push(line);
    }
}

async fn greeting(session: &mut MailSession, raw: &mut RawData) -> Result<(), MailError> {
    let greeting = session.read_line().await?;
    raw.insert("greeting".into(), greeting.clone().into());
    if greeting.starts_with("* OK") || greeting.starts_with("* PREAUTH") {
        Ok(())
    } else {
        Err(MailError::Protocol(format!("unexpected IMAP greeting: {}", greeting)))
    }
}

/// Quote a string for use as an IMAP astring
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Greeting and CAPABILITY
pub async fn basic(session: &mut MailSession, raw: &mut RawData) -> Result<String, MailError> {
    greeting(session, raw).await?;

    let response = command(session, "a001", "CAPABILITY").await?;
    if !response.is_ok("a001") {
        return Err(MailError::Protocol(format!("CAPABILITY failed: {}", response.status)));
    }

    let capabilities: Vec<String> = response
        .untagged
        .iter()
        .filter_map(|line| line.strip_prefix("* CAPABILITY "))
        .flat_map(|caps| caps.split_whitespace().map(str::to_string))
        .collect();
    raw.insert("capabilities".into(), capabilities.join(" ").into());

    let _ = command(session, "a002", "LOGOUT").await;

    let notable: Vec<&str> = NOTABLE_CAPABILITIES
        .iter()
        .copied()
        .filter(|wanted| capabilities.iter().any(|cap| cap.eq_ignore_ascii_case(wanted)))
        .collect();

    Ok(if notable.is_empty() {
        "IMAP server is operational".to_string()
    } else {
        format!("IMAP server is operational. Capabilities: {}", notable.join(", "))
    })
}

/// LOGIN and a read-only look at the inbox
pub async fn full(session: &mut MailSession, user: &str, password: &str, raw: &mut RawData) -> Result<String, MailError> {
    greeting(session, raw).await?;

    let login = command(session, "a001", &format!("LOGIN {} {}", quote(user), quote(password))).await?;
    if !login.is_ok("a001") {
        return Err(MailError::Authentication(format!("IMAP login failed for user {}", user)));
    }
    raw.insert("authenticated".into(), true.into());

    let examine = command(session, "a002", "EXAMINE INBOX").await?;
    let count = examine
        .untagged
        .iter()
        .filter_map(|line| line.strip_prefix("* ")?.strip_suffix(" EXISTS")?.trim().parse::<u64>().ok())
        .last();

    let _ = command(session, "a003", "LOGOUT").await;

    match (examine.is_ok("a002"), count) {
        (true, Some(count)) => {
            raw.insert("mailbox_message_count".into(), count.into());
            Ok(format!(
                "IMAP server is operational, authentication successful for user {}, {} messages in INBOX",
                user, count
            ))
        }
        _ => Ok(format!("IMAP server is operational, authentication successful for user {}", user)),
    }
}
