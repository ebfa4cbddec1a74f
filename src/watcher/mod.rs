//! Mailbox watch loop.
//!
//! Drives a [`Mailbox`] through the [`WatchMachine`]: wait for a change,
//! drain everything above the cursor in UID order, hand each message to a
//! [`MessageHandler`], and reconnect with a fixed backoff whenever the
//! connection drops. Messages are handled strictly one at a time.

pub mod state;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::channels::{Mailbox, NormalizedMessage, normalize};
use crate::config::WatcherConfig;
use crate::error::Error;

pub use state::{Effect, WatchEvent, WatchMachine, WatchState, transition};

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Sender not on the allowlist; nothing was done.
    Skipped,
    /// Actions ran and the reply was suppressed.
    Suppressed,
    /// Actions ran and a reply was sent.
    Replied,
}

/// Consumes normalized messages, one at a time.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, uid: u32, message: NormalizedMessage) -> Result<HandleOutcome, Error>;
}

/// The watch loop driver.
pub struct MailWatcher<M, H> {
    mailbox: M,
    handler: H,
    config: WatcherConfig,
    machine: WatchMachine,
    pending: Effect,
    /// A previous session exists and must be torn down on the next connect.
    stale_session: bool,
}

impl<M: Mailbox, H: MessageHandler> MailWatcher<M, H> {
    pub fn new(mailbox: M, handler: H, config: WatcherConfig) -> Self {
        Self {
            mailbox,
            handler,
            config,
            machine: WatchMachine::new(),
            pending: Effect::Connect,
            stale_session: false,
        }
    }

    pub fn state(&self) -> WatchState {
        self.machine.state()
    }

    pub fn cursor(&self) -> Option<u32> {
        self.machine.cursor()
    }

    pub fn mailbox(&self) -> &M {
        &self.mailbox
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Run forever. Stop it by dropping the future.
    pub async fn run(&mut self) {
        info!(folder = %self.config.mailbox, "Mail watcher started");
        loop {
            self.step().await;
        }
    }

    /// Perform the pending effect and record the next one.
    pub async fn step(&mut self) {
        let effect = std::mem::replace(&mut self.pending, Effect::Ignore);
        let next = match effect {
            Effect::Connect => self.connect().await,
            Effect::Wait { pause } => self.wait(pause).await,
            Effect::Drain { since } => self.drain(since).await,
            Effect::Recover { reason } => self.recover(&reason).await,
            Effect::Continue | Effect::Ignore => self.machine.resume_effect(),
        };

        self.pending = match next {
            Effect::Ignore | Effect::Continue => {
                warn!(state = %self.machine.state(), "Unexpected event, resuming current state");
                self.machine.resume_effect()
            }
            effect => effect,
        };
    }

    async fn connect(&mut self) -> Effect {
        let connected = if std::mem::take(&mut self.stale_session) {
            self.mailbox.reconnect().await
        } else {
            self.mailbox.connect().await
        };
        match connected {
            Ok(uid_next) => {
                let effect = self.machine.on_event(WatchEvent::Connected { uid_next });
                info!(cursor = ?self.machine.cursor(), "Watching for new mail");
                effect
            }
            Err(e) => self.transport_failed("connect", e.to_string()),
        }
    }

    async fn wait(&mut self, pause: bool) -> Effect {
        if pause && !self.config.drain_pause.is_zero() {
            tokio::time::sleep(self.config.drain_pause).await;
        }
        match self.mailbox.watch(self.config.idle_timeout).await {
            Ok(signal) => {
                debug!(new_mail = signal.has_new_messages(), "Wait ended");
                self.machine.on_event(WatchEvent::WaitEnded(signal))
            }
            Err(e) => self.transport_failed("idle", e.to_string()),
        }
    }

    async fn drain(&mut self, since: u32) -> Effect {
        let uids = match self.mailbox.search_since(since).await {
            Ok(uids) => uids,
            Err(e) => return self.transport_failed("search", e.to_string()),
        };
        if !uids.is_empty() {
            info!(count = uids.len(), since, "New messages");
        }

        for uid in uids {
            let raw = match self.mailbox.fetch(uid).await {
                Ok(raw) => raw,
                Err(e) => return self.transport_failed("fetch", e.to_string()),
            };

            let message = normalize(&raw);
            match self.handler.handle(uid, message).await {
                Ok(outcome) => info!(uid, outcome = ?outcome, "Message handled"),
                Err(e) => error!(uid, stage = "handle", error = %e, "Message processing failed"),
            }
            self.machine.on_event(WatchEvent::MessageCompleted { uid });
        }

        self.machine.on_event(WatchEvent::DrainFinished)
    }

    async fn recover(&mut self, reason: &str) -> Effect {
        warn!(reason, backoff = ?self.config.reconnect_backoff, "Connection lost, reconnecting");
        self.stale_session = true;
        tokio::time::sleep(self.config.reconnect_backoff).await;
        self.machine.on_event(WatchEvent::BackoffElapsed)
    }

    fn transport_failed(&mut self, stage: &str, reason: String) -> Effect {
        error!(stage, error = %reason, cursor = ?self.machine.cursor(), "Mailbox transport failure");
        self.machine.on_event(WatchEvent::TransportFailed { reason })
    }
}
