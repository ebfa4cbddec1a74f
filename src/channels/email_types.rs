//! Email-specific types — the normalized message record and its parser.

use chrono::{DateTime, Utc};
use mail_parser::{HeaderName, MessageParser, MimeHeaders, PartType};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::channels::email::strip_html;

/// A file carried by a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    #[serde(skip)]
    pub data: Vec<u8>,
}

/// Canonical view of one inbound message.
///
/// Header fields are kept as written; nothing here is validated. Absent
/// bodies are normal (e.g. attachment-only mail).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    /// Raw `From` header.
    pub sender: String,
    /// Raw `To` header.
    pub recipient: String,
    /// Decoded subject.
    pub subject: String,
    /// Raw `Date` header.
    pub date: String,
    pub plain_body: Option<String>,
    pub html_body: Option<String>,
    /// Attachments in mailbox order.
    pub attachments: Vec<Attachment>,
    /// `Auto-Submitted` header (RFC 3834), if any.
    #[serde(default)]
    pub auto_submitted: Option<String>,
}

impl NormalizedMessage {
    /// Bare address from the `From` header (`Ann <ann@x.com>` → `ann@x.com`).
    pub fn sender_address(&self) -> String {
        bare_address(&self.sender)
    }

    /// Parsed `Date` header, or now if it cannot be parsed.
    pub fn received_at(&self) -> DateTime<Utc> {
        match parse_date(&self.date) {
            Some(date) => date,
            None => {
                warn!(date = %self.date, "Unparseable Date header, using current time");
                Utc::now()
            }
        }
    }

    /// True for machine-generated mail: auto-replies, notifications and
    /// our own outbound replies.
    pub fn is_auto_submitted(&self) -> bool {
        self.auto_submitted
            .as_deref()
            .is_some_and(|v| !v.trim().eq_ignore_ascii_case("no"))
    }

    /// Plain body, else the HTML body stripped of markup.
    pub fn body_text(&self) -> Option<String> {
        self.plain_body
            .clone()
            .or_else(|| self.html_body.as_deref().map(strip_html))
    }
}

/// Parse raw RFC 5322 bytes. Never fails: unparseable input yields an empty
/// record and a warning.
pub fn normalize(raw: &[u8]) -> NormalizedMessage {
    let Some(message) = MessageParser::default().parse(raw) else {
        warn!(bytes = raw.len(), "Message could not be parsed, treating as empty");
        return NormalizedMessage::default();
    };

    let mut normalized = NormalizedMessage {
        sender: message.header_raw(HeaderName::From).map(unfold).unwrap_or_default(),
        recipient: message.header_raw(HeaderName::To).map(unfold).unwrap_or_default(),
        subject: message
            .subject()
            .map(|s| s.to_string())
            .unwrap_or_default(),
        date: message.header_raw(HeaderName::Date).map(unfold).unwrap_or_default(),
        auto_submitted: message
            .headers()
            .iter()
            .find(|h| h.name().eq_ignore_ascii_case("Auto-Submitted"))
            .and_then(|h| h.value().as_text())
            .map(|v| v.trim().to_string()),
        ..Default::default()
    };

    for part in &message.parts {
        let is_attachment = part
            .content_disposition()
            .is_some_and(|d| d.ctype().eq_ignore_ascii_case("attachment"));

        if is_attachment {
            let content_type = part
                .content_type()
                .map(|ct| match ct.subtype() {
                    Some(sub) => format!("{}/{}", ct.ctype(), sub),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".to_string());
            normalized.attachments.push(Attachment {
                filename: part.attachment_name().unwrap_or("attachment").to_string(),
                content_type: content_type.to_ascii_lowercase(),
                data: part.contents().to_vec(),
            });
            continue;
        }

        match &part.body {
            PartType::Text(text) if normalized.plain_body.is_none() && is_text_plain(part) => {
                normalized.plain_body = Some(text.to_string());
            }
            PartType::Html(html) if normalized.html_body.is_none() => {
                normalized.html_body = Some(html.to_string());
            }
            _ => {}
        }
    }

    normalized
}

/// `text/plain`, or no content type at all (RFC 2045 default).
fn is_text_plain(part: &mail_parser::MessagePart<'_>) -> bool {
    part.content_type().is_none_or(|ct| {
        ct.ctype().eq_ignore_ascii_case("text")
            && ct.subtype().is_none_or(|sub| sub.eq_ignore_ascii_case("plain"))
    })
}

/// Undo header folding and trim.
fn unfold(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn bare_address(header: &str) -> String {
    if let (Some(start), Some(end)) = (header.rfind('<'), header.rfind('>'))
        && start < end
    {
        return header[start + 1..end].trim().to_string();
    }
    header
        .split_whitespace()
        .last()
        .unwrap_or_default()
        .trim_matches(|c| c == '<' || c == '>' || c == '"')
        .to_string()
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    // Drop a trailing "(UTC)"-style comment.
    let trimmed = match trimmed.find('(') {
        Some(pos) => trimmed[..pos].trim_end(),
        None => trimmed,
    };
    DateTime::parse_from_rfc2822(trimmed)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
