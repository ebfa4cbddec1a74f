//! Mailbox connection — the async seam the watch loop drives.
//!
//! [`ImapMailbox`] owns a blocking [`ImapSession`] and runs each command on
//! `spawn_blocking`, moving the session into the task and back so exactly one
//! owner holds it at any time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::channels::auth::{Credential, TokenSource};
use crate::channels::email::EmailConfig;
use crate::channels::imap::{self, IdleOutcome, ImapError, ImapSession, TlsStream};
use crate::error::ChannelError;

/// Result of one bounded wait for mailbox changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSignal {
    /// The server reported a change (raw untagged lines).
    Notified(Vec<String>),
    /// The wait expired without a notification.
    TimedOut,
}

impl ChangeSignal {
    /// Whether any notification announced new messages.
    pub fn has_new_messages(&self) -> bool {
        match self {
            Self::Notified(lines) => lines.iter().any(|l| l.ends_with("EXISTS")),
            Self::TimedOut => false,
        }
    }
}

impl From<IdleOutcome> for ChangeSignal {
    fn from(outcome: IdleOutcome) -> Self {
        match outcome {
            IdleOutcome::Notified(lines) => Self::Notified(lines),
            IdleOutcome::TimedOut => Self::TimedOut,
        }
    }
}

/// A read-only view of one mail folder.
///
/// Every failure is a lost connection as far as callers are concerned.
#[async_trait]
pub trait Mailbox: Send {
    /// Open an authenticated session and return the folder's next UID.
    async fn connect(&mut self) -> Result<u32, ChannelError>;

    /// Block up to `timeout` for a change notification.
    async fn watch(&mut self, timeout: Duration) -> Result<ChangeSignal, ChannelError>;

    /// UIDs strictly greater than `cursor`, ascending.
    async fn search_since(&mut self, cursor: u32) -> Result<Vec<u32>, ChannelError>;

    /// Raw source of one message.
    async fn fetch(&mut self, uid: u32) -> Result<Vec<u8>, ChannelError>;

    /// Best-effort logout; never fails.
    async fn disconnect(&mut self);

    /// Tear down and rebuild the session, returning the fresh next UID.
    async fn reconnect(&mut self) -> Result<u32, ChannelError> {
        self.disconnect().await;
        self.connect().await
    }
}

/// IMAP-backed mailbox.
pub struct ImapMailbox {
    config: EmailConfig,
    folder: String,
    auth: Arc<dyn TokenSource>,
    session: Option<ImapSession<TlsStream>>,
}

impl ImapMailbox {
    pub fn new(config: EmailConfig, folder: impl Into<String>, auth: Arc<dyn TokenSource>) -> Self {
        Self {
            config,
            folder: folder.into(),
            auth,
            session: None,
        }
    }

    /// Run one blocking command against the session.
    async fn with_session<T, F>(&mut self, op: F) -> Result<T, ChannelError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession<TlsStream>) -> Result<T, ImapError> + Send + 'static,
    {
        let mut session = self
            .session
            .take()
            .ok_or_else(|| ChannelError::imap_lost("not connected"))?;

        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut session);
            (session, result)
        })
        .await
        .map_err(|e| ChannelError::imap_lost(format!("IMAP task panicked: {e}")))?;

        self.session = Some(session);
        result.map_err(|e| ChannelError::imap_lost(e.to_string()))
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn connect(&mut self) -> Result<u32, ChannelError> {
        let credential = self.auth.get_valid_token().await?;
        let host = self.config.imap_host.clone();
        let port = self.config.imap_port;
        let username = self.auth.username().to_string();
        let folder = self.folder.clone();

        info!(host = %host, user = %username, "Connecting to IMAP");
        let (session, status) = tokio::task::spawn_blocking(move || {
            let mut session = imap::connect_tls(&host, port)?;
            match &credential {
                Credential::Password(_) => session.login(&username, credential.secret())?,
                Credential::OAuthToken(_) => {
                    session.authenticate_xoauth2(&username, credential.secret())?
                }
            }
            let status = session.examine(&folder)?;
            Ok::<_, ImapError>((session, status))
        })
        .await
        .map_err(|e| ChannelError::imap_lost(format!("IMAP connect task panicked: {e}")))?
        .map_err(|e| ChannelError::imap_lost(e.to_string()))?;

        info!(
            folder = %self.folder,
            uid_next = status.uid_next,
            uid_validity = ?status.uid_validity,
            exists = status.exists,
            "Folder opened read-only"
        );
        self.session = Some(session);
        Ok(status.uid_next)
    }

    async fn watch(&mut self, timeout: Duration) -> Result<ChangeSignal, ChannelError> {
        debug!(timeout = ?timeout, "IDLE start");
        let outcome = self.with_session(move |s| s.idle(timeout)).await?;
        debug!(outcome = ?outcome, "IDLE returned");
        Ok(outcome.into())
    }

    async fn search_since(&mut self, cursor: u32) -> Result<Vec<u32>, ChannelError> {
        self.with_session(move |s| s.uid_search_since(cursor)).await
    }

    async fn fetch(&mut self, uid: u32) -> Result<Vec<u8>, ChannelError> {
        self.with_session(move |s| s.uid_fetch(uid)).await
    }

    async fn disconnect(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let result = tokio::task::spawn_blocking(move || session.logout()).await;
        match result {
            Ok(Ok(())) => debug!("IMAP logout complete"),
            Ok(Err(e)) => warn!(error = %e, "IMAP logout failed (ignored)"),
            Err(e) => warn!(error = %e, "IMAP logout task failed (ignored)"),
        }
    }
}
