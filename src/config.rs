//! Configuration types.
//!
//! Every config struct is built from environment variables (a `.env` file is
//! loaded into the environment by `main` first). The `from_vars` variants take
//! a lookup function so tests never have to touch the process environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Gmail and most providers drop IDLE sessions after 29-30 minutes.
pub const MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(29 * 60);

/// Parse an optional variable, falling back to `default` when unset.
pub(crate) fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("cannot parse '{raw}'"),
                })
        }
        _ => Ok(default),
    }
}

/// Split a comma-separated variable into trimmed, non-empty entries.
pub(crate) fn list_var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Vec<String> {
    lookup(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub(crate) fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Watch loop timing and folder selection.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Folder opened read-only.
    pub mailbox: String,
    /// Upper bound of a single IDLE wait.
    pub idle_timeout: Duration,
    /// Pause before reconnecting after a transport failure.
    pub reconnect_backoff: Duration,
    /// Pause between two drain cycles.
    pub drain_pause: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            mailbox: "INBOX".to_string(),
            idle_timeout: Duration::from_secs(25 * 60),
            reconnect_backoff: Duration::from_secs(5),
            drain_pause: Duration::from_secs(1),
        }
    }
}

impl WatcherConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mailbox = lookup("EMAIL_MAILBOX")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.mailbox);

        let idle_secs = parse_var(
            &lookup,
            "WATCH_IDLE_TIMEOUT_SECS",
            defaults.idle_timeout.as_secs(),
        )?;
        let idle_timeout = Duration::from_secs(idle_secs);
        if idle_timeout.is_zero() || idle_timeout >= MAX_IDLE_TIMEOUT {
            return Err(ConfigError::InvalidValue {
                key: "WATCH_IDLE_TIMEOUT_SECS".to_string(),
                message: format!(
                    "must be between 1 and {} seconds",
                    MAX_IDLE_TIMEOUT.as_secs() - 1
                ),
            });
        }

        let backoff_secs = parse_var(
            &lookup,
            "WATCH_RECONNECT_BACKOFF_SECS",
            defaults.reconnect_backoff.as_secs(),
        )?;
        let pause_ms = parse_var(
            &lookup,
            "WATCH_DRAIN_PAUSE_MS",
            defaults.drain_pause.as_millis() as u64,
        )?;

        Ok(Self {
            mailbox,
            idle_timeout,
            reconnect_backoff: Duration::from_secs(backoff_secs),
            drain_pause: Duration::from_millis(pause_ms),
        })
    }
}

/// Who the watcher works for and what it is allowed to answer.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent name recorded in audit logs.
    pub name: String,
    /// User identifier placed in every decision context.
    pub user_id: String,
    /// User display name used in the system prompt.
    pub user_name: String,
    /// The user's own address (alerts go here).
    pub user_email: String,
    /// Sender allowlist; see [`crate::channels::email::is_sender_allowed`].
    pub authorized_senders: Vec<String>,
    /// Upper bound on model round-trips per message.
    pub max_turns: usize,
    /// Directory for per-message reasoning logs; `None` disables them.
    pub audit_dir: Option<PathBuf>,
    /// Emit the step-by-step reasoning trace to the log.
    pub show_reasoning: bool,
}

impl AgentConfig {
    /// Build from the environment. `user_email` defaults the name and the
    /// allowlist, matching a mailbox that only answers its owner.
    pub fn from_env(user_email: &str) -> Result<Self, ConfigError> {
        Self::from_vars(user_email, env_lookup)
    }

    pub fn from_vars(
        user_email: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut authorized_senders = list_var(&lookup, "EMAIL_AUTHORIZED_SENDERS");
        if authorized_senders.is_empty() {
            authorized_senders.push(user_email.to_string());
        }

        let audit_dir = match lookup("FINBOT_AUDIT_DIR") {
            Some(v) if v.eq_ignore_ascii_case("off") => None,
            Some(v) if !v.trim().is_empty() => Some(PathBuf::from(v.trim())),
            _ => Some(PathBuf::from("logs")),
        };

        let max_turns = parse_var(&lookup, "FINBOT_MAX_TURNS", 10usize)?;
        if max_turns == 0 {
            return Err(ConfigError::InvalidValue {
                key: "FINBOT_MAX_TURNS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            name: "FinBot".to_string(),
            user_id: lookup("FINBOT_USER_ID").unwrap_or_else(|| "default".to_string()),
            user_name: lookup("FINBOT_USER_NAME").unwrap_or_else(|| user_email.to_string()),
            user_email: user_email.to_string(),
            authorized_senders,
            max_turns,
            audit_dir,
            show_reasoning: parse_var(&lookup, "FINBOT_SHOW_REASONING", false)?,
        })
    }
}
