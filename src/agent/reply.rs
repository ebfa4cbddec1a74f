//! Reply extraction — pulls subject and body out of the engine's final text.

use std::sync::LazyLock;

use regex::Regex;

pub const DEFAULT_SUBJECT: &str = "Email Processed";
pub const DEFAULT_BODY: &str = "Your email was received and processed.";

static SUBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<subject>(.*?)</subject>").expect("valid regex"));
static BODY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<body>(.*?)</body>").expect("valid regex"));

/// Subject and body of an outgoing reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyEnvelope {
    pub subject: String,
    pub body: String,
}

/// Extract the reply from `text`.
///
/// A missing `<subject>` falls back to [`DEFAULT_SUBJECT`], a missing
/// `<body>` to the whole text. Neither field is ever left blank.
pub fn compose_reply(text: &str) -> ReplyEnvelope {
    let subject = tag(&SUBJECT_RE, text)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SUBJECT);
    let body = match tag(&BODY_RE, text) {
        Some(body) if !body.is_empty() => body,
        None if !text.trim().is_empty() => text,
        _ => DEFAULT_BODY,
    };
    ReplyEnvelope {
        subject: subject.to_string(),
        body: body.to_string(),
    }
}

fn tag<'a>(re: &Regex, text: &'a str) -> Option<&'a str> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}
