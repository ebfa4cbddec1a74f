//! Email settings and outbound SMTP via lettre.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::header::{Header, HeaderName, HeaderValue};
use lettre::message::{Mailbox as Address, MultiPart};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{Message, SmtpTransport, Transport};
use tracing::info;

use crate::channels::auth::TokenSource;
use crate::config::{env_lookup, parse_var};
use crate::error::{ChannelError, ConfigError};

// ── Configuration ───────────────────────────────────────────────────

/// Mail server endpoints, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub from_address: String,
}

impl EmailConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let imap_host = lookup("EMAIL_IMAP_HOST")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("EMAIL_IMAP_HOST".to_string()))?;
        let username = lookup("EMAIL_USERNAME")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("EMAIL_USERNAME".to_string()))?;

        let imap_port = parse_var(&lookup, "EMAIL_IMAP_PORT", 993u16)?;
        let smtp_host = lookup("EMAIL_SMTP_HOST")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| imap_host.replace("imap", "smtp"));
        let smtp_port = parse_var(&lookup, "EMAIL_SMTP_PORT", 587u16)?;
        let from_address = lookup("EMAIL_FROM_ADDRESS")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| username.clone());

        Ok(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            from_address,
        })
    }
}

// ── Outbound ────────────────────────────────────────────────────────

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Optional HTML alternative to `body`.
    pub html: Option<String>,
}

impl OutboundEmail {
    pub fn plain(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            html: None,
        }
    }
}

/// Sends mail. Failures are final; callers do not retry.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), ChannelError>;
}

/// SMTP mailer. Port 465 uses implicit TLS, anything else STARTTLS.
pub struct SmtpMailer {
    config: EmailConfig,
    auth: Arc<dyn TokenSource>,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig, auth: Arc<dyn TokenSource>) -> Self {
        Self { config, auth }
    }
}

/// Build the lettre message for `email`.
/// `Auto-Submitted` (RFC 3834). Every message FinBot sends carries
/// `auto-replied` so it is never processed as new mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoSubmitted(String);

impl AutoSubmitted {
    pub fn auto_replied() -> Self {
        Self("auto-replied".to_string())
    }
}

impl Header for AutoSubmitted {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("Auto-Submitted")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.trim().to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

pub fn build_message(from: &str, email: &OutboundEmail) -> Result<Message, ChannelError> {
    let from: Address = from
        .parse()
        .map_err(|e| ChannelError::smtp_failed(format!("Invalid from address: {e}")))?;
    let to: Address = email
        .to
        .parse()
        .map_err(|e| ChannelError::smtp_failed(format!("Invalid to address: {e}")))?;

    let builder = Message::builder()
        .from(from)
        .to(to)
        .subject(&email.subject)
        .header(AutoSubmitted::auto_replied());
    let message = match &email.html {
        Some(html) => builder.multipart(MultiPart::alternative_plain_html(
            email.body.clone(),
            html.clone(),
        )),
        None => builder.body(email.body.clone()),
    };
    message.map_err(|e| ChannelError::smtp_failed(format!("Failed to build email: {e}")))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<(), ChannelError> {
        let message = build_message(&self.config.from_address, email)?;
        let credential = self.auth.get_valid_token().await?;
        let creds = Credentials::new(
            self.auth.username().to_string(),
            credential.secret().to_string(),
        );

        let builder = if self.config.smtp_port == 465 {
            SmtpTransport::relay(&self.config.smtp_host)
        } else {
            SmtpTransport::starttls_relay(&self.config.smtp_host)
        }
        .map_err(|e| ChannelError::smtp_failed(format!("SMTP relay error: {e}")))?
        .port(self.config.smtp_port)
        .credentials(creds);

        let transport = if credential.is_oauth() {
            builder.authentication(vec![Mechanism::Xoauth2]).build()
        } else {
            builder.build()
        };

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| ChannelError::smtp_failed(format!("SMTP task failed: {e}")))?
            .map_err(|e| ChannelError::smtp_failed(format!("SMTP send failed: {e}")))?;

        info!(to = %email.to, subject = %email.subject, "Email sent");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Check if a sender email is in the allowlist.
///
/// - Empty list → deny all
/// - `*` in list → allow all
/// - `@domain.com` or `domain.com` → domain match
/// - `user@domain.com` → exact email match
pub fn is_sender_allowed(allowed: &[String], email: &str) -> bool {
    if allowed.is_empty() {
        return false;
    }
    if allowed.iter().any(|a| a == "*") {
        return true;
    }
    let email_lower = email.to_lowercase();
    allowed.iter().any(|a| {
        if a.starts_with('@') {
            email_lower.ends_with(&a.to_lowercase())
        } else if a.contains('@') {
            a.eq_ignore_ascii_case(email)
        } else {
            email_lower.ends_with(&format!("@{}", a.to_lowercase()))
        }
    })
}

/// Strip HTML tags, dropping `<style>`/`<script>` contents, and collapse
/// whitespace.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    let mut tag = String::new();
    let mut skipping: Option<&str> = None;

    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let name = tag
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                match (skipping, name.as_str()) {
                    (None, "style") => skipping = Some("/style"),
                    (None, "script") => skipping = Some("/script"),
                    (Some(end), n) if n == end => skipping = None,
                    _ => {}
                }
                // Block-level breaks keep words apart.
                result.push(' ');
            }
            _ if in_tag => tag.push(ch),
            _ if skipping.is_none() => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    // ── Allowlist ───────────────────────────────────────────────────

    #[test]
    fn allowlist_empty_denies_all() {
        assert!(!is_sender_allowed(&[], "anyone@example.com"));
    }

    #[test]
    fn allowlist_wildcard_allows_all() {
        let allowed = vec!["*".to_string()];
        assert!(is_sender_allowed(&allowed, "anyone@example.com"));
    }

    #[test]
    fn allowlist_exact_email_match() {
        let allowed = vec!["me@example.com".to_string()];
        assert!(is_sender_allowed(&allowed, "me@example.com"));
        assert!(is_sender_allowed(&allowed, "ME@Example.com"));
        assert!(!is_sender_allowed(&allowed, "other@example.com"));
    }

    #[test]
    fn allowlist_domain_forms() {
        let allowed = vec!["@bank.com".to_string(), "utility.org".to_string()];
        assert!(is_sender_allowed(&allowed, "bills@bank.com"));
        assert!(is_sender_allowed(&allowed, "noreply@utility.org"));
        assert!(!is_sender_allowed(&allowed, "x@notutility.org"));
        assert!(!is_sender_allowed(&allowed, "x@evil.com"));
    }

    // ── strip_html ──────────────────────────────────────────────────

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<p>Hello <b>world</b></p>"), "Hello world");
    }

    #[test]
    fn strip_html_drops_style_and_script() {
        let html = "<html><style>p { color: red }</style><p>Due</p><script>x()</script>soon</html>";
        assert_eq!(strip_html(html), "Due soon");
    }

    #[test]
    fn strip_html_keeps_words_apart_across_tags() {
        assert_eq!(strip_html("<td>Amount</td><td>$20</td>"), "Amount $20");
    }

    #[test]
    fn strip_html_plain_text_passthrough() {
        assert_eq!(strip_html("no tags here"), "no tags here");
        assert_eq!(strip_html(""), "");
    }

    // ── Config ──────────────────────────────────────────────────────

    #[test]
    fn config_requires_imap_host() {
        let err = EmailConfig::from_vars(vars(&[("EMAIL_USERNAME", "me@x.com")]));
        assert!(matches!(err, Err(ConfigError::MissingEnvVar(k)) if k == "EMAIL_IMAP_HOST"));
    }

    #[test]
    fn config_requires_username() {
        let err = EmailConfig::from_vars(vars(&[("EMAIL_IMAP_HOST", "imap.x.com")]));
        assert!(matches!(err, Err(ConfigError::MissingEnvVar(k)) if k == "EMAIL_USERNAME"));
    }

    #[test]
    fn config_derives_defaults() {
        let cfg = EmailConfig::from_vars(vars(&[
            ("EMAIL_IMAP_HOST", "imap.gmail.com"),
            ("EMAIL_USERNAME", "me@gmail.com"),
        ]))
        .unwrap();
        assert_eq!(cfg.imap_port, 993);
        assert_eq!(cfg.smtp_host, "smtp.gmail.com");
        assert_eq!(cfg.smtp_port, 587);
        assert_eq!(cfg.from_address, "me@gmail.com");
    }

    #[test]
    fn config_rejects_bad_port() {
        let err = EmailConfig::from_vars(vars(&[
            ("EMAIL_IMAP_HOST", "imap.x.com"),
            ("EMAIL_USERNAME", "me@x.com"),
            ("EMAIL_SMTP_PORT", "lots"),
        ]));
        assert!(matches!(err, Err(ConfigError::InvalidValue { .. })));
    }

    // ── Message building ────────────────────────────────────────────

    #[test]
    fn builds_plain_message() {
        let email = OutboundEmail::plain("you@x.com", "Paid", "All settled.");
        let message = build_message("me@x.com", &email).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Paid"));
        assert!(raw.contains("All settled."));
    }

    #[test]
    fn outbound_mail_is_marked_auto_replied() {
        let email = OutboundEmail::plain("me@x.com", "Bill stored", "Done.");
        let message = build_message("me@x.com", &email).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Auto-Submitted: auto-replied\r\n"), "{raw}");

        let echoed = crate::channels::normalize(raw.as_bytes());
        assert!(echoed.is_auto_submitted());
    }

    #[test]
    fn builds_alternative_when_html_present() {
        let mut email = OutboundEmail::plain("you@x.com", "Paid", "All settled.");
        email.html = Some("<p>All settled.</p>".into());
        let message = build_message("me@x.com", &email).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("text/html"));
    }

    #[test]
    fn invalid_recipient_is_send_failure() {
        let email = OutboundEmail::plain("not an address", "s", "b");
        let err = build_message("me@x.com", &email).unwrap_err();
        assert!(matches!(err, ChannelError::SendFailed { .. }));
    }
}
