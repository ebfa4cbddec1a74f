//! Mail I/O: the IMAP connection, credentials, normalization and SMTP.

pub mod alert;
pub mod auth;
pub mod email;
pub mod email_types;
pub mod imap;
pub mod mailbox;

pub use alert::{AlertNotifier, EmailAlertNotifier, LogAlertNotifier};
pub use auth::{Credential, TokenSource};
pub use email::{EmailConfig, Mailer, OutboundEmail, SmtpMailer};
pub use email_types::{Attachment, NormalizedMessage, normalize};
pub use mailbox::{ChangeSignal, ImapMailbox, Mailbox};
