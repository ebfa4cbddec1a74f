//! Urgent alert delivery.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::channels::email::{Mailer, OutboundEmail};
use crate::error::ChannelError;

/// Subject line for alert emails.
pub const ALERT_SUBJECT: &str = "URGENT: FinBot alert";

/// Delivers an urgent notice to the user out of band.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, user_email: &str, message: &str) -> Result<(), ChannelError>;
}

/// Sends alerts as a separate email to the user.
pub struct EmailAlertNotifier {
    mailer: Arc<dyn Mailer>,
}

impl EmailAlertNotifier {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl AlertNotifier for EmailAlertNotifier {
    async fn notify(&self, user_email: &str, message: &str) -> Result<(), ChannelError> {
        let email = OutboundEmail::plain(user_email, ALERT_SUBJECT, message);
        self.mailer.send(&email).await
    }
}

/// Writes alerts to the log only.
pub struct LogAlertNotifier;

#[async_trait]
impl AlertNotifier for LogAlertNotifier {
    async fn notify(&self, user_email: &str, message: &str) -> Result<(), ChannelError> {
        warn!(user = %user_email, alert = %message, "URGENT ALERT");
        Ok(())
    }
}
